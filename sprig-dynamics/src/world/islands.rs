use sprig_core::BodyId;

use crate::{
    solver::{
        solve_position_constraints, BodyConstraint, ConstraintSolverConf, PositionConstraint,
        TimeStep, VelocityConf, VelocityConstraint,
    },
    step::IslandStats,
    RegStepStats, StepConf,
};

use super::World;

impl World {
    /// Solves every island of awake bodies over the full step.
    ///
    /// Proxies of the moved bodies are synchronized and new contacts searched for afterwards.
    pub(super) fn solve_reg(&mut self, conf: &StepConf, dt_ratio: f32) -> RegStepStats {
        sprig_core::profile_function!();

        let mut stats = RegStepStats::default();
        let step = TimeStep::new(conf.delta_time, dt_ratio, conf.do_warm_start);

        self.marks.bodies.reset(self.bodies.size());
        self.marks.contacts.reset(self.contacts.size());
        self.marks.joints.reset(self.joints.size());

        for i in 0..self.body_list.len() {
            let seed = self.body_list[i];
            let body = &self.bodies[seed];

            if self.marks.bodies.get(seed)
                || !body.is_speedable()
                || !body.is_awake()
                || !body.is_enabled()
            {
                continue;
            }

            stats.islands_found += 1;
            self.build_island(seed);

            let island = self.solve_reg_island(conf, &step);
            tracing::trace!(
                bodies = self.island.bodies.len(),
                contacts = self.island.contacts.len(),
                joints = self.island.joints.len(),
                ?island,
                "solved island"
            );
            stats.add_island(island);

            // Static bodies may take part in any number of islands
            for &body in &self.island.bodies {
                if !self.bodies[body].is_speedable() {
                    self.marks.bodies.unset(body);
                }
            }
        }

        for i in 0..self.body_list.len() {
            let id = self.body_list[i];
            let body = &self.bodies[id];

            if !self.marks.bodies.get(id) || !body.is_speedable() {
                continue;
            }

            let (xf0, xf1) = (body.sweep.transform0(), body.xf);
            stats.proxies_moved += self.synchronize_body(
                id,
                xf0,
                xf1,
                conf.displace_multiplier,
                conf.aabb_extension,
            );
        }

        stats.contacts_added = self.find_new_contacts();
        stats
    }

    /// Gathers the bodies, contacts and joints connected to `seed` into the island.
    ///
    /// Traversal does not continue through bodies which can not move.
    fn build_island(&mut self, seed: BodyId) {
        self.island.clear();

        let mut stack = vec![seed];
        self.marks.bodies.set(seed);

        while let Some(id) = stack.pop() {
            self.island.bodies.push(id);
            self.bodies[id].set_awake_flag();

            let body = &self.bodies[id];
            if !body.is_speedable() {
                continue;
            }

            for &(_, contact_id) in &body.contacts {
                if self.marks.contacts.get(contact_id) {
                    continue;
                }

                let contact = &self.contacts[contact_id];
                if !contact.is_enabled() || !contact.is_touching() || contact.is_sensor() {
                    continue;
                }

                self.marks.contacts.set(contact_id);
                self.island.contacts.push(contact_id);

                let other = contact.other_body(id);
                if !self.marks.bodies.get(other) {
                    self.marks.bodies.set(other);
                    stack.push(other);
                }
            }

            for &(joint_id, other) in &body.joints {
                if self.marks.joints.get(joint_id) {
                    continue;
                }

                if other.is_some_and(|other| !self.bodies[other].is_enabled()) {
                    continue;
                }

                self.marks.joints.set(joint_id);
                self.island.joints.push(joint_id);

                if let Some(other) = other {
                    if !self.marks.bodies.get(other) {
                        self.marks.bodies.set(other);
                        stack.push(other);
                    }
                }
            }
        }
    }

    /// Loads the island bodies into the constraint store, along with fixed copies of bodies
    /// referenced by island joints from outside of it
    fn load_island_constraints(&mut self, h: f32) {
        self.constraints.reset(self.bodies.size());

        for &id in &self.island.bodies {
            self.constraints
                .insert(id, BodyConstraint::new(&self.bodies[id], h));
        }

        for &joint in &self.island.joints {
            for body in self.joints[joint].bodies() {
                if !self.constraints.contains(body) {
                    self.constraints
                        .insert(body, BodyConstraint::fixed(&self.bodies[body]));
                }
            }
        }
    }

    fn contact_constraints(
        &self,
        step: &TimeStep,
        conf: &StepConf,
    ) -> (Vec<PositionConstraint>, Vec<VelocityConstraint>) {
        let velocity_conf = VelocityConf {
            velocity_threshold: conf.velocity_threshold,
            block_solve: conf.do_blocksolve,
        };

        self.island
            .contacts
            .iter()
            .map(|&id| {
                let contact = &self.contacts[id];
                let manifold = &self.manifolds[id];
                let radius_a = self.fixtures[contact.fixture_a]
                    .shape
                    .vertex_radius(contact.child_a);
                let radius_b = self.fixtures[contact.fixture_b]
                    .shape
                    .vertex_radius(contact.child_b);

                (
                    PositionConstraint::new(contact, manifold, radius_a, radius_b),
                    VelocityConstraint::new(
                        id,
                        contact,
                        manifold,
                        radius_a,
                        radius_b,
                        &self.constraints,
                        step,
                        &velocity_conf,
                    ),
                )
            })
            .unzip()
    }

    fn solve_reg_island(&mut self, conf: &StepConf, step: &TimeStep) -> IslandStats {
        let h = step.dt;
        let solver_conf = ConstraintSolverConf::regular(conf);

        for &id in &self.island.bodies {
            let sweep = &mut self.bodies[id].sweep;
            sweep.pos0 = sweep.pos1;
        }

        self.load_island_constraints(h);
        let (positions, mut velocities) = self.contact_constraints(step, conf);

        if step.warm_start {
            for constraint in &velocities {
                constraint.warm_start(&mut self.constraints);
            }
        }

        for &joint in &self.island.joints {
            self.joints[joint].init_velocity(&mut self.constraints, step, &solver_conf);
        }

        let mut velocity_iterations = 0;
        for _ in 0..conf.reg_velocity_iterations {
            velocity_iterations += 1;

            let mut joints_ok = true;
            for &joint in &self.island.joints {
                joints_ok &= self.joints[joint].solve_velocity(&mut self.constraints, step);
            }

            let max_increment = velocities
                .iter_mut()
                .map(|v| v.solve(&mut self.constraints))
                .fold(0.0, f32::max);

            if joints_ok && max_increment <= conf.reg_min_momentum {
                break;
            }
        }

        for &id in &self.island.bodies {
            let mut bc = self.constraints.get(Some(id));
            bc.integrate(h, conf.max_translation, conf.max_rotation);
            self.constraints.set(Some(id), bc);
        }

        let mut position_iterations = 0;
        let mut solved = false;
        for _ in 0..conf.reg_position_iterations {
            position_iterations += 1;

            let min_separation =
                solve_position_constraints(&positions, &mut self.constraints, &solver_conf);

            let mut joints_ok = true;
            for &joint in &self.island.joints {
                joints_ok &= self.joints[joint].solve_position(&mut self.constraints, &solver_conf);
            }

            if min_separation >= conf.reg_min_separation && joints_ok {
                solved = true;
                break;
            }
        }

        for constraint in &velocities {
            constraint.store_impulses(&mut self.manifolds[constraint.contact]);
        }

        self.store_island_bodies();

        if let Some(listener) = self.contact_listener.as_deref_mut() {
            let iterations = solved.then_some(position_iterations);
            for constraint in &velocities {
                listener.post_solve(
                    constraint.contact,
                    &self.contacts[constraint.contact],
                    &constraint.impulses(),
                    iterations,
                );
            }
        }

        IslandStats {
            solved,
            velocity_iterations,
            position_iterations,
            bodies_slept: self.sleep_island(h, solved, conf),
        }
    }

    /// Writes the solved constraints back to the speedable island bodies, flagging the contacts
    /// of moved bodies for updating
    fn store_island_bodies(&mut self) {
        for &id in &self.island.bodies {
            let body = &mut self.bodies[id];
            if !body.is_speedable() {
                continue;
            }

            let bc = self.constraints.get(Some(id));
            if body.update(bc.position, bc.velocity) {
                for &(_, contact) in &body.contacts {
                    self.contacts[contact].flag_for_updating();
                }
            }
        }
    }

    /// Advances the under-active time of the island bodies and puts them to sleep once every one
    /// of them has been still for long enough
    fn sleep_island(&mut self, h: f32, solved: bool, conf: &StepConf) -> u32 {
        let linear_tolerance_sq = conf.linear_sleep_tolerance * conf.linear_sleep_tolerance;
        let angular_tolerance_sq = conf.angular_sleep_tolerance * conf.angular_sleep_tolerance;

        let mut min_under_active = f32::INFINITY;
        for &id in &self.island.bodies {
            let body = &mut self.bodies[id];
            if !body.is_speedable() {
                continue;
            }

            let velocity = body.velocity;
            if !body.is_sleeping_allowed()
                || velocity.angular * velocity.angular > angular_tolerance_sq
                || velocity.linear.length_squared() > linear_tolerance_sq
            {
                body.under_active_time = 0.0;
            } else {
                body.under_active_time += h;
            }

            min_under_active = min_under_active.min(body.under_active_time);
        }

        if !solved || min_under_active < conf.min_still_time_to_sleep {
            return 0;
        }

        let mut slept = 0;
        for &id in &self.island.bodies {
            let body = &mut self.bodies[id];
            if body.is_speedable() && body.is_awake() {
                body.unset_awake();
                slept += 1;
            }
        }

        slept
    }

    /// Solves the island gathered for an impact over the remainder `h` of the step.
    ///
    /// Positions are solved from the start of the remainder, after which velocities are solved
    /// without warm starting. Impulses are not stored.
    pub(super) fn solve_toi_island(&mut self, conf: &StepConf, h: f32) -> IslandStats {
        let solver_conf = ConstraintSolverConf::toi(conf);

        self.load_island_constraints(0.0);

        let positions: Vec<_> = self
            .island
            .contacts
            .iter()
            .map(|&id| {
                let contact = &self.contacts[id];
                PositionConstraint::new(
                    contact,
                    &self.manifolds[id],
                    self.fixtures[contact.fixture_a]
                        .shape
                        .vertex_radius(contact.child_a),
                    self.fixtures[contact.fixture_b]
                        .shape
                        .vertex_radius(contact.child_b),
                )
            })
            .collect();

        let mut position_iterations = 0;
        let mut solved = false;
        for _ in 0..conf.toi_position_iterations {
            position_iterations += 1;

            let min_separation =
                solve_position_constraints(&positions, &mut self.constraints, &solver_conf);
            if min_separation >= conf.toi_min_separation {
                solved = true;
                break;
            }
        }

        // The solved positions become the start of the remaining sweep
        for &id in &self.island.bodies {
            let position = self.constraints.get(Some(id)).position;
            let body = &mut self.bodies[id];
            if body.is_speedable() {
                body.sweep.pos0 = position;
            }
        }

        let step = TimeStep::new(h, 1.0, false);
        let (_, mut velocities) = self.contact_constraints(&step, conf);

        let mut velocity_iterations = 0;
        for _ in 0..conf.toi_velocity_iterations {
            velocity_iterations += 1;

            let max_increment = velocities
                .iter_mut()
                .map(|v| v.solve(&mut self.constraints))
                .fold(0.0, f32::max);

            if max_increment <= conf.toi_min_momentum {
                break;
            }
        }

        for &id in &self.island.bodies {
            let mut bc = self.constraints.get(Some(id));
            bc.integrate(h, conf.max_translation, conf.max_rotation);
            self.constraints.set(Some(id), bc);
        }

        self.store_island_bodies();

        if let Some(listener) = self.contact_listener.as_deref_mut() {
            let iterations = solved.then_some(position_iterations);
            for constraint in &velocities {
                listener.post_solve(
                    constraint.contact,
                    &self.contacts[constraint.contact],
                    &constraint.impulses(),
                    iterations,
                );
            }
        }

        IslandStats {
            solved,
            velocity_iterations,
            position_iterations,
            bodies_slept: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::vec2;
    use sprig_collision::{Disk, Polygon};

    use crate::{BodyConf, FixtureConf, World};

    use super::*;

    fn ground(world: &mut World) {
        let ground = world.create_body(&BodyConf::default()).unwrap();
        world
            .create_fixture(ground, Polygon::new_box(20.0, 0.5), &FixtureConf::new(), false)
            .unwrap();
    }

    fn ball(world: &mut World, x: f32, y: f32) -> BodyId {
        let body = world
            .create_body(
                &BodyConf::dynamic()
                    .with_location(vec2(x, y))
                    .with_linear_acceleration(vec2(0.0, -10.0)),
            )
            .unwrap();
        world
            .create_fixture(body, Disk::new(0.5), &FixtureConf::new().with_density(1.0), true)
            .unwrap();
        body
    }

    #[test]
    fn separate_stacks_form_separate_islands() {
        crate::init_logging();
        let mut world = World::default();
        ground(&mut world);
        ball(&mut world, -5.0, 0.99);
        ball(&mut world, 5.0, 0.99);

        let conf = StepConf::new(1.0 / 60.0);
        world.step(&conf).unwrap();
        let stats = world.step(&conf).unwrap();
        assert_eq!(stats.reg.islands_found, 2);
    }

    #[test]
    fn falling_body_moves() {
        crate::init_logging();
        let mut world = World::default();
        let body = ball(&mut world, 0.0, 10.0);

        let conf = StepConf::new(0.1);
        world.step(&conf).unwrap();

        let body = world.body(body).unwrap();
        assert!((body.linear_velocity().y + 1.0).abs() < 1e-5);
        assert!((body.location().y - 9.9).abs() < 1e-5);
    }

    #[test]
    fn resting_island_sleeps() {
        crate::init_logging();
        let mut world = World::default();
        ground(&mut world);
        let body = ball(&mut world, 0.0, 1.0);

        let conf = StepConf::new(1.0 / 60.0);
        let mut slept = 0;
        for _ in 0..240 {
            slept += world.step(&conf).unwrap().reg.bodies_slept;
        }

        assert_eq!(slept, 1);
        assert!(!world.body(body).unwrap().is_awake());
        assert!(world.body(body).unwrap().location().y > 0.9);
    }
}
