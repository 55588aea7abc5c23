use sprig_collision::{time_of_impact, ToiState};
use sprig_core::{BodyId, ContactId};

use crate::{Body, StepConf, ToiStepStats};

use super::{World, WorldFlags};

/// Latest time of impact still handled within the current step
const MAX_TOI: f32 = 1.0 - f32::EPSILON / 2.0;

#[derive(Default)]
struct ToiUpdates {
    updated: u32,
    at_max_sub_steps: u32,
    max_dist_iters: u32,
    max_toi_iters: u32,
    max_root_iters: u32,
}

impl World {
    /// Resolves the impacts of fast moving bodies missed by the regular solve.
    ///
    /// Impacts are handled in order of their time of impact. Each one advances the two bodies to
    /// the impact and solves the island formed with their other contacts over the remainder of
    /// the step. With sub stepping a single impact is handled per call, leaving the step
    /// incomplete.
    pub(super) fn solve_toi(&mut self, conf: &StepConf) -> ToiStepStats {
        sprig_core::profile_function!();

        let mut stats = ToiStepStats::default();

        if self.is_step_complete() {
            for &id in &self.body_list {
                self.bodies[id].sweep.alpha0 = 0.0;
            }

            for &(_, id) in &self.contact_list {
                let contact = &mut self.contacts[id];
                contact.toi = None;
                contact.toi_count = 0;
            }
        }

        loop {
            let updates = self.update_contact_tois(conf);
            stats.contacts_updated_toi += updates.updated;
            stats.contacts_at_max_sub_steps += updates.at_max_sub_steps;
            stats.max_dist_iters = stats.max_dist_iters.max(updates.max_dist_iters);
            stats.max_toi_iters = stats.max_toi_iters.max(updates.max_toi_iters);
            stats.max_root_iters = stats.max_root_iters.max(updates.max_root_iters);

            let Some((id, toi, ties)) = self.soonest_contact() else {
                self.flags |= WorldFlags::STEP_COMPLETE;
                break;
            };

            stats.contacts_found += ties;
            stats.sub_steps += 1;

            self.solve_toi_contact(id, toi, conf, &mut stats);

            stats.contacts_added += self.find_new_contacts();

            if conf.do_sub_stepping {
                self.flags -= WorldFlags::STEP_COMPLETE;
                break;
            }
        }

        stats
    }

    /// Computes the time of impact of every contact which lacks one
    fn update_contact_tois(&mut self, conf: &StepConf) -> ToiUpdates {
        let toi_conf = conf.toi_conf();
        let mut updates = ToiUpdates::default();

        for i in 0..self.contact_list.len() {
            let id = self.contact_list[i].1;
            let contact = &self.contacts[id];

            if contact.toi.is_some() || !contact.is_enabled() || contact.is_sensor() {
                continue;
            }

            let body_a = &self.bodies[contact.body_a];
            let body_b = &self.bodies[contact.body_b];

            let is_active = |body: &Body| body.is_awake() && body.is_speedable();
            if !is_active(body_a) && !is_active(body_b) {
                continue;
            }

            if !body_a.is_impenetrable() && !body_b.is_impenetrable() {
                continue;
            }

            if contact.toi_count >= conf.max_sub_steps {
                updates.at_max_sub_steps += 1;
                tracing::debug!(%id, toi_count = contact.toi_count, "contact reached max sub steps");
                continue;
            }

            let (a, b) = (contact.body_a, contact.body_b);
            let proxy_a = self.fixtures[contact.fixture_a].shape.child(contact.child_a);
            let proxy_b = self.fixtures[contact.fixture_b].shape.child(contact.child_b);

            // Bring both sweeps to the same start
            let alpha0 = body_a.sweep.alpha0.max(body_b.sweep.alpha0);
            for body in [a, b] {
                let sweep = &mut self.bodies[body].sweep;
                if sweep.alpha0 < alpha0 {
                    sweep.advance0(alpha0);
                }
            }

            let output = time_of_impact(
                &proxy_a,
                &self.bodies[a].sweep.normalized(),
                &proxy_b,
                &self.bodies[b].sweep.normalized(),
                &toi_conf,
            );

            updates.updated += 1;
            updates.max_dist_iters = updates.max_dist_iters.max(output.stats.max_dist_iters);
            updates.max_toi_iters = updates.max_toi_iters.max(output.stats.toi_iters);
            updates.max_root_iters = updates.max_root_iters.max(output.stats.max_root_iters);

            let toi = if output.state == ToiState::Touching {
                (alpha0 + (1.0 - alpha0) * output.t).min(1.0)
            } else {
                1.0
            };

            self.contacts[id].toi = Some(toi);
        }

        updates
    }

    /// Returns the contact with the soonest time of impact and how many contacts share it
    fn soonest_contact(&self) -> Option<(ContactId, f32, u32)> {
        let mut min_toi = MAX_TOI;
        let mut found = None;
        let mut ties = 0;

        for &(_, id) in &self.contact_list {
            let contact = &self.contacts[id];
            if !contact.is_enabled() || contact.is_sensor() {
                continue;
            }

            let Some(toi) = contact.toi else {
                continue;
            };

            if toi < min_toi {
                min_toi = toi;
                found = Some(id);
                ties = 1;
            } else if toi == min_toi && found.is_some() {
                ties += 1;
            }
        }

        found.map(|id| (id, min_toi, ties))
    }

    fn solve_toi_contact(
        &mut self,
        id: ContactId,
        toi: f32,
        conf: &StepConf,
        stats: &mut ToiStepStats,
    ) {
        let contact = &self.contacts[id];
        let (a, b) = (contact.body_a, contact.body_b);

        let backup_a = self.bodies[a].sweep;
        let backup_b = self.bodies[b].sweep;
        self.bodies[a].advance(toi);
        self.bodies[b].advance(toi);

        self.update_contact(id, conf);

        let contact = &mut self.contacts[id];
        contact.toi = None;
        contact.toi_count += 1;

        if !contact.is_enabled() || !contact.is_touching() {
            contact.set_enabled(false);
            self.bodies[a].restore(backup_a);
            self.bodies[b].restore(backup_b);

            stats.contacts_skipped_touching += 1;
            tracing::debug!(%id, toi, "impact rolled back");
            return;
        }

        stats.contacts_updated_touching += 1;
        stats.islands_found += 1;

        self.marks.bodies.reset(self.bodies.size());
        self.marks.contacts.reset(self.contacts.size());
        self.island.clear();

        for body in [a, b] {
            self.marks.bodies.set(body);
            self.bodies[body].set_awake_flag();
            self.island.bodies.push(body);
        }

        self.marks.contacts.set(id);
        self.island.contacts.push(id);

        for body in [a, b] {
            if self.bodies[body].is_accelerable() {
                self.gather_toi_contacts(body, toi, conf);
            }
        }

        let h = (1.0 - toi) * conf.delta_time;
        let island = self.solve_toi_island(conf, h);
        stats.add_island(island);

        for i in 0..self.island.bodies.len() {
            let body = self.island.bodies[i];
            if !self.bodies[body].is_accelerable() {
                continue;
            }

            let (xf0, xf1) = (self.bodies[body].sweep.transform0(), self.bodies[body].xf);
            stats.proxies_moved += self.synchronize_body(
                body,
                xf0,
                xf1,
                conf.displace_multiplier,
                conf.aabb_extension,
            );

            let body = &self.bodies[body];
            for &(_, contact) in &body.contacts {
                self.contacts[contact].toi = None;
            }
        }
    }

    /// Adds the touching contacts of `body` to the island, advancing the bodies on their other
    /// side to the time of impact
    fn gather_toi_contacts(&mut self, body: BodyId, toi: f32, conf: &StepConf) {
        let contacts: Vec<_> = self.bodies[body].contacts.iter().map(|v| v.1).collect();

        for id in contacts {
            let contact = &self.contacts[id];
            if self.marks.contacts.get(id) || contact.is_sensor() {
                continue;
            }

            let other = contact.other_body(body);
            if !self.bodies[body].is_impenetrable() && !self.bodies[other].is_impenetrable() {
                continue;
            }

            let backup = self.bodies[other].sweep;
            if !self.marks.bodies.get(other) {
                self.bodies[other].advance(toi);
            }

            self.update_contact(id, conf);

            let contact = &self.contacts[id];
            if !contact.is_enabled() || !contact.is_touching() {
                self.bodies[other].restore(backup);
                continue;
            }

            self.marks.contacts.set(id);
            self.island.contacts.push(id);

            if !self.marks.bodies.get(other) {
                self.marks.bodies.set(other);
                self.bodies[other].set_awake_flag();
                self.island.bodies.push(other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::vec2;
    use sprig_collision::{Disk, Polygon};

    use crate::{BodyConf, FixtureConf};

    use super::*;

    fn wall_and_bullet(world: &mut World) -> BodyId {
        let wall = world.create_body(&BodyConf::default()).unwrap();
        world
            .create_fixture(wall, Polygon::new_box(5.0, 0.05), &FixtureConf::new(), false)
            .unwrap();

        let bullet = world
            .create_body(
                &BodyConf::dynamic()
                    .with_location(vec2(0.0, 5.0))
                    .with_linear_velocity(vec2(0.0, -200.0)),
            )
            .unwrap();
        world
            .create_fixture(bullet, Disk::new(0.1), &FixtureConf::new().with_density(1.0), true)
            .unwrap();

        bullet
    }

    #[test]
    fn fast_body_stops_at_wall() {
        crate::init_logging();
        let mut world = World::default();
        let bullet = wall_and_bullet(&mut world);

        let conf = StepConf::new(1.0 / 60.0);
        let mut sub_steps = 0;
        for _ in 0..10 {
            sub_steps += world.step(&conf).unwrap().toi.sub_steps;
        }

        assert!(sub_steps > 0);
        assert!(world.is_step_complete());
        assert!(world.body(bullet).unwrap().location().y > 0.0);
    }

    #[test]
    fn fast_body_tunnels_without_toi() {
        crate::init_logging();
        let mut world = World::default();
        let bullet = wall_and_bullet(&mut world);

        let conf = StepConf::new(1.0 / 60.0).with_toi(false);
        for _ in 0..3 {
            world.step(&conf).unwrap();
        }

        assert!(world.body(bullet).unwrap().location().y < 0.0);
    }

    #[test]
    fn sub_stepping_leaves_step_incomplete() {
        crate::init_logging();
        let mut world = World::default();
        wall_and_bullet(&mut world);

        let conf = StepConf::new(1.0 / 60.0).with_sub_stepping(true);
        world.step(&conf).unwrap();

        let stats = world.step(&conf).unwrap();
        assert_eq!(stats.toi.sub_steps, 1);
        assert!(!world.is_step_complete());

        // The regular solve is skipped until every impact is resolved
        let stats = world.step(&conf).unwrap();
        assert_eq!(stats.reg.islands_found, 0);
    }
}
