use glam::Vec2;
use sprig_collision::MassData;
use sprig_core::{BodyId, EntityKind, Error, FixtureId, Result, Velocity};

use crate::{BodyConf, BodyFlags, BodyType};

use super::{World, WorldFlags};

impl World {
    pub fn create_body(&mut self, conf: &BodyConf) -> Result<BodyId> {
        self.check_unlocked()?;

        if self.body_list.len() >= self.conf.max_bodies {
            return Err(Error::CapacityExceeded {
                kind: EntityKind::Body,
                max: self.conf.max_bodies,
            });
        }

        if !(conf.location.is_finite() && conf.angle.is_finite()) {
            return Err(Error::invalid_argument(format!(
                "body placement must be finite, got {} at {}",
                conf.location, conf.angle
            )));
        }

        let id = self.bodies.allocate(crate::Body::new(conf));
        self.body_list.push(id);

        tracing::debug!(%id, ?conf.body_type, "created body");
        Ok(id)
    }

    /// Destroys a body along with its joints, contacts and fixtures.
    ///
    /// The destruction listener is notified of every joint and fixture destroyed this way.
    pub fn destroy_body(&mut self, id: BodyId) -> Result<()> {
        self.check_unlocked()?;
        self.body(id)?;

        let joints: Vec<_> = self.bodies[id].joints.iter().map(|v| v.0).collect();
        for joint in joints {
            if self.joints.contains(joint) {
                self.notify_joint_destroyed(joint);
                self.destroy_joint_internal(joint);
            }
        }

        self.destroy_body_contacts(id);

        let fixtures = std::mem::take(&mut self.bodies[id].fixtures);
        for fixture in fixtures {
            if let Some(listener) = self.destruction_listener.as_deref_mut() {
                listener.fixture(fixture);
            }

            self.destroy_proxies(fixture);
            self.fixtures_for_proxies.retain(|&v| v != fixture);
            self.fixtures.free(fixture);
        }

        self.bodies_for_proxies.retain(|&v| v != id);
        self.body_list.retain(|&v| v != id);
        self.bodies.free(id);

        tracing::debug!(%id, "destroyed body");
        Ok(())
    }

    /// Teleports the origin of a body.
    ///
    /// Contacts are updated and proxies synchronized during the next step.
    pub fn set_transform(&mut self, id: BodyId, location: Vec2, angle: f32) -> Result<()> {
        self.check_unlocked()?;

        if !(location.is_finite() && angle.is_finite()) {
            return Err(Error::invalid_argument("body placement must be finite"));
        }

        self.body_mut(id)?.set_transform(location, angle);
        self.flag_contacts_for_updating(id);

        if !self.bodies_for_proxies.contains(&id) {
            self.bodies_for_proxies.push(id);
        }

        Ok(())
    }

    pub fn set_type(&mut self, id: BodyId, body_type: BodyType) -> Result<()> {
        self.check_unlocked()?;

        let body = self.body_mut(id)?;
        if body.body_type == body_type {
            return Ok(());
        }

        body.set_type_flags(body_type);
        self.reset_mass_data(id)?;

        self.destroy_body_contacts(id);

        // Let the broad phase find new contacts for the changed rules
        let fixtures = self.bodies[id].fixtures.clone();
        for fixture in fixtures {
            self.touch_proxies(fixture);
        }

        if body_type == BodyType::Static {
            let body = &mut self.bodies[id];
            body.sweep.pos0 = body.sweep.pos1;
            if !self.bodies_for_proxies.contains(&id) {
                self.bodies_for_proxies.push(id);
            }
        }

        Ok(())
    }

    /// Enables or disables a body.
    ///
    /// A disabled body does not take part in collision or solving. Disabling destroys the
    /// contacts and proxies of the body right away, enabling queues its fixtures for proxy
    /// creation.
    pub fn set_enabled(&mut self, id: BodyId, enabled: bool) -> Result<()> {
        self.check_unlocked()?;

        let body = self.body_mut(id)?;
        if body.is_enabled() == enabled {
            return Ok(());
        }

        body.flags.set(BodyFlags::ENABLED, enabled);
        let fixtures = body.fixtures.clone();

        if enabled {
            for fixture in fixtures {
                if !self.fixtures_for_proxies.contains(&fixture) {
                    self.fixtures_for_proxies.push(fixture);
                }
            }
        } else {
            self.destroy_body_contacts(id);
            for fixture in fixtures {
                self.destroy_proxies(fixture);
            }
        }

        Ok(())
    }

    pub fn set_awake(&mut self, id: BodyId) -> Result<()> {
        self.check_unlocked()?;
        self.body_mut(id)?.set_awake();
        Ok(())
    }

    /// Puts a body to sleep, unless sleeping is disallowed for it
    pub fn unset_awake(&mut self, id: BodyId) -> Result<()> {
        self.check_unlocked()?;
        self.body_mut(id)?.unset_awake();
        Ok(())
    }

    /// Sets the velocity of a speedable body, waking it if non-zero
    pub fn set_velocity(&mut self, id: BodyId, velocity: Velocity) -> Result<()> {
        self.check_unlocked()?;
        if !(velocity.linear.is_finite() && velocity.angular.is_finite()) {
            return Err(Error::invalid_argument("velocity must be finite"));
        }

        self.body_mut(id)?.set_velocity(velocity);
        Ok(())
    }

    pub fn set_acceleration(&mut self, id: BodyId, linear: Vec2, angular: f32) -> Result<()> {
        self.check_unlocked()?;
        if !(linear.is_finite() && angular.is_finite()) {
            return Err(Error::invalid_argument("acceleration must be finite"));
        }

        self.body_mut(id)?.set_acceleration(linear, angular);
        Ok(())
    }

    pub fn set_damping(&mut self, id: BodyId, linear: f32, angular: f32) -> Result<()> {
        self.check_unlocked()?;
        let body = self.body_mut(id)?;
        body.linear_damping = linear;
        body.angular_damping = angular;
        Ok(())
    }

    pub fn set_mass_data(&mut self, id: BodyId, data: &MassData) -> Result<()> {
        self.check_unlocked()?;
        self.body_mut(id)?.set_mass_data(data);
        Ok(())
    }

    /// Recomputes the mass of a body from the density of its fixtures
    pub fn reset_mass_data(&mut self, id: BodyId) -> Result<()> {
        self.check_unlocked()?;

        let body = self.body(id)?;
        let data = MassData::sum(body.fixtures.iter().map(|&fixture| {
            let fixture = &self.fixtures[fixture];
            fixture.shape.mass_data(fixture.density)
        }));

        self.bodies[id].set_mass_data(&data);
        Ok(())
    }

    pub fn set_fixed_rotation(&mut self, id: BodyId, fixed_rotation: bool) -> Result<()> {
        self.check_unlocked()?;
        let body = self.body_mut(id)?;
        if body.is_fixed_rotation() == fixed_rotation {
            return Ok(());
        }

        body.flags.set(BodyFlags::FIXED_ROTATION, fixed_rotation);
        body.velocity.angular = 0.0;
        self.reset_mass_data(id)
    }

    /// Marks a body for continuous collision against other dynamic bodies
    pub fn set_bullet(&mut self, id: BodyId, bullet: bool) -> Result<()> {
        self.check_unlocked()?;
        self.body_mut(id)?.set_bullet(bullet);
        Ok(())
    }

    pub fn set_sleeping_allowed(&mut self, id: BodyId, allowed: bool) -> Result<()> {
        self.check_unlocked()?;
        let body = self.body_mut(id)?;
        body.flags.set(BodyFlags::AUTO_SLEEP, allowed);
        if !allowed {
            body.set_awake();
        }

        Ok(())
    }

    pub(crate) fn flag_contacts_for_updating(&mut self, id: BodyId) {
        for &(_, contact) in &self.bodies[id].contacts {
            self.contacts[contact].flag_for_updating();
        }
    }

    /// Queues the proxies of `fixture` for pairing so that contacts are searched for them
    pub(crate) fn touch_proxies(&mut self, fixture: FixtureId) {
        let proxies = &self.fixtures[fixture].proxies;
        if proxies.is_empty() {
            return;
        }

        self.proxies_for_pairing.extend_from_slice(proxies);
        self.flags |= WorldFlags::NEW_FIXTURES;
    }
}

#[cfg(test)]
mod tests {
    use glam::vec2;
    use sprig_collision::{Disk, Polygon};

    use crate::{FixtureConf, StepConf};

    use super::*;

    #[test]
    fn capacity_is_enforced() {
        crate::init_logging();
        let mut world = World::new(crate::WorldConf::default().with_max_bodies(2)).unwrap();
        world.create_body(&BodyConf::default()).unwrap();
        world.create_body(&BodyConf::default()).unwrap();

        assert_eq!(
            world.create_body(&BodyConf::default()),
            Err(Error::CapacityExceeded {
                kind: EntityKind::Body,
                max: 2
            })
        );
        assert_eq!(world.body_count(), 2);
    }

    #[test]
    fn ids_are_recycled() {
        crate::init_logging();
        let mut world = World::default();
        let a = world.create_body(&BodyConf::default()).unwrap();
        let b = world.create_body(&BodyConf::default()).unwrap();

        world.destroy_body(a).unwrap();
        assert!(world.body(a).is_err());
        assert!(world.body(b).is_ok());
        assert_eq!(world.create_body(&BodyConf::default()).unwrap(), a);
        assert_eq!(world.bodies().map(|v| v.0).collect::<Vec<_>>(), [b, a]);
    }

    #[test]
    fn mass_from_fixtures() {
        crate::init_logging();
        let mut world = World::default();
        let body = world.create_body(&BodyConf::dynamic()).unwrap();
        world
            .create_fixture(
                body,
                Polygon::new_box(1.0, 0.5),
                &FixtureConf::new().with_density(2.0),
                true,
            )
            .unwrap();

        let body = world.body(body).unwrap();
        assert!((body.mass() - 4.0).abs() < 1e-5);
        assert!(body.inv_rot_inertia() > 0.0);
    }

    #[test]
    fn disabling_removes_proxies() {
        crate::init_logging();
        let mut world = World::default();
        let body = world.create_body(&BodyConf::dynamic()).unwrap();
        world
            .create_fixture(body, Disk::new(0.5), &FixtureConf::new(), false)
            .unwrap();

        world.step(&StepConf::new(0.0)).unwrap();
        assert_eq!(world.proxy_count(), 1);

        world.set_enabled(body, false).unwrap();
        assert_eq!(world.proxy_count(), 0);

        world.set_enabled(body, true).unwrap();
        world.step(&StepConf::new(0.0)).unwrap();
        assert_eq!(world.proxy_count(), 1);
    }

    #[test]
    fn static_type_stops_body() {
        crate::init_logging();
        let mut world = World::default();
        let body = world
            .create_body(&BodyConf::dynamic().with_linear_velocity(vec2(1.0, 0.0)))
            .unwrap();

        world.set_type(body, BodyType::Static).unwrap();
        let body = world.body(body).unwrap();
        assert_eq!(body.velocity(), Velocity::ZERO);
        assert_eq!(body.inv_mass(), 0.0);
        assert!(!body.is_awake());
    }
}
