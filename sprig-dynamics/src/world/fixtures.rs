use sprig_collision::Shape;
use sprig_core::{BodyId, EntityKind, Error, FixtureId, Result};

use crate::{
    fixture::{validate_friction, validate_restitution},
    Filter, Fixture, FixtureConf,
};

use super::World;

impl World {
    /// Attaches a shape to a body.
    ///
    /// Broad phase proxies for the fixture are created during the next step. If `reset_mass` is
    /// set and the fixture has a density, the mass of the body is recomputed.
    pub fn create_fixture(
        &mut self,
        body: BodyId,
        shape: impl Into<Shape>,
        conf: &FixtureConf,
        reset_mass: bool,
    ) -> Result<FixtureId> {
        let shape = shape.into();

        conf.validate()?;
        for child in 0..shape.child_count() {
            let radius = shape.vertex_radius(child);
            if !(radius >= self.conf.min_vertex_radius && radius <= self.conf.max_vertex_radius) {
                return Err(Error::invalid_argument(format!(
                    "vertex radius {radius} is outside of [{}, {}]",
                    self.conf.min_vertex_radius, self.conf.max_vertex_radius
                )));
            }
        }

        self.check_unlocked()?;
        let enabled = self.body(body)?.is_enabled();

        if self.fixtures.used() >= self.conf.max_fixtures {
            return Err(Error::CapacityExceeded {
                kind: EntityKind::Fixture,
                max: self.conf.max_fixtures,
            });
        }

        let density = conf.density;
        let id = self.fixtures.allocate(Fixture::new(body, shape, conf));
        self.bodies[body].fixtures.push(id);

        if enabled {
            self.fixtures_for_proxies.push(id);
        }

        if reset_mass && density > 0.0 {
            self.reset_mass_data(body)?;
        }

        tracing::debug!(%id, %body, "created fixture");
        Ok(id)
    }

    /// Detaches and destroys a fixture along with its contacts and proxies
    pub fn destroy_fixture(&mut self, id: FixtureId, reset_mass: bool) -> Result<()> {
        self.check_unlocked()?;
        let body = self.fixture(id)?.body;

        let contacts: Vec<_> = self.bodies[body]
            .contacts
            .iter()
            .map(|v| v.1)
            .filter(|&contact| self.contacts[contact].involves_fixture(id))
            .collect();

        self.destroy_contact_set(&contacts);

        self.destroy_proxies(id);
        self.fixtures_for_proxies.retain(|&v| v != id);
        self.bodies[body].fixtures.retain(|&v| v != id);
        self.fixtures.free(id);

        if reset_mass {
            self.reset_mass_data(body)?;
        }

        Ok(())
    }

    /// Turns a fixture into a sensor, or back.
    ///
    /// Sensors detect overlap without generating a collision response.
    pub fn set_sensor(&mut self, id: FixtureId, is_sensor: bool) -> Result<()> {
        self.check_unlocked()?;
        let fixture = self.fixture_mut(id)?;
        if fixture.is_sensor == is_sensor {
            return Ok(());
        }

        fixture.is_sensor = is_sensor;
        let body = fixture.body;

        self.flag_contacts_for_updating(body);
        self.bodies[body].set_awake();
        Ok(())
    }

    pub fn set_filter_data(&mut self, id: FixtureId, filter: Filter) -> Result<()> {
        self.check_unlocked()?;
        self.fixture_mut(id)?.filter = filter;
        self.refilter(id)
    }

    /// Re-evaluates the filtering of every contact of a fixture during the next step
    pub fn refilter(&mut self, id: FixtureId) -> Result<()> {
        self.check_unlocked()?;
        let body = self.fixture(id)?.body;

        for &(_, contact) in &self.bodies[body].contacts {
            let contact = &mut self.contacts[contact];
            if contact.involves_fixture(id) {
                contact.flag_for_filtering();
            }
        }

        self.touch_proxies(id);
        Ok(())
    }

    /// Sets the friction of a fixture.
    ///
    /// Existing contacts keep the friction they were created with.
    pub fn set_friction(&mut self, id: FixtureId, friction: f32) -> Result<()> {
        self.check_unlocked()?;
        validate_friction(friction)?;
        self.fixture_mut(id)?.friction = friction;
        Ok(())
    }

    pub fn set_restitution(&mut self, id: FixtureId, restitution: f32) -> Result<()> {
        self.check_unlocked()?;
        validate_restitution(restitution)?;
        self.fixture_mut(id)?.restitution = restitution;
        Ok(())
    }

    /// Sets the density of a fixture. The mass of the body is not recomputed.
    pub fn set_density(&mut self, id: FixtureId, density: f32) -> Result<()> {
        self.check_unlocked()?;
        if !(density >= 0.0) {
            return Err(Error::invalid_argument(format!(
                "density must be non-negative, got {density}"
            )));
        }

        self.fixture_mut(id)?.density = density;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glam::vec2;
    use sprig_collision::{Disk, Polygon};

    use crate::{BodyConf, StepConf, WorldConf};

    use super::*;

    #[test]
    fn rejects_out_of_range_radius() {
        crate::init_logging();
        let mut world = World::new(WorldConf::default().with_vertex_radius(0.1, 1.0)).unwrap();
        let body = world.create_body(&BodyConf::default()).unwrap();

        let tiny = world.create_fixture(body, Disk::new(0.05), &FixtureConf::new(), false);
        assert!(matches!(tiny, Err(Error::InvalidArgument(_))));

        let huge = world.create_fixture(body, Disk::new(2.0), &FixtureConf::new(), false);
        assert!(matches!(huge, Err(Error::InvalidArgument(_))));

        // Polygons have a skin of twice the linear slop
        let poly = world.create_fixture(body, Polygon::new_box(1.0, 1.0), &FixtureConf::new(), false);
        assert!(matches!(poly, Err(Error::InvalidArgument(_))));

        assert!(world
            .create_fixture(body, Disk::new(0.5), &FixtureConf::new(), false)
            .is_ok());
        assert_eq!(world.fixture_count(), 1);
    }

    #[test]
    fn rejects_unknown_body() {
        crate::init_logging();
        let mut world = World::default();
        let body = world.create_body(&BodyConf::default()).unwrap();
        world.destroy_body(body).unwrap();

        assert_eq!(
            world.create_fixture(body, Disk::new(0.5), &FixtureConf::new(), false),
            Err(Error::NotFound {
                kind: EntityKind::Body,
                index: body.index()
            })
        );
    }

    #[test]
    fn destroy_removes_contacts() {
        crate::init_logging();
        let mut world = World::default();
        let a = world.create_body(&BodyConf::default()).unwrap();
        world
            .create_fixture(a, Polygon::new_box(2.0, 0.5), &FixtureConf::new(), false)
            .unwrap();

        let b = world
            .create_body(&BodyConf::dynamic().with_location(vec2(0.0, 0.9)))
            .unwrap();
        let disk = world
            .create_fixture(b, Disk::new(0.5), &FixtureConf::new().with_density(1.0), true)
            .unwrap();

        world.step(&StepConf::new(0.0)).unwrap();
        assert_eq!(world.contact_count(), 1);

        world.destroy_fixture(disk, true).unwrap();
        assert_eq!(world.contact_count(), 0);
        assert_eq!(world.proxy_count(), 1);
        assert!(world.body(b).unwrap().fixtures().is_empty());
        assert_eq!(world.body(a).unwrap().contacts().len(), 0);
    }

    #[test]
    fn refilter_destroys_contacts() {
        crate::init_logging();
        let mut world = World::default();
        let a = world.create_body(&BodyConf::default()).unwrap();
        world
            .create_fixture(a, Polygon::new_box(2.0, 0.5), &FixtureConf::new(), false)
            .unwrap();

        let b = world
            .create_body(&BodyConf::dynamic().with_location(vec2(0.0, 0.9)))
            .unwrap();
        let disk = world
            .create_fixture(b, Disk::new(0.5), &FixtureConf::new().with_density(1.0), true)
            .unwrap();

        world.step(&StepConf::new(0.0)).unwrap();
        assert_eq!(world.contact_count(), 1);

        world.set_filter_data(disk, Filter::new(0x2, 0x2)).unwrap();
        let stats = world.step(&StepConf::new(0.0)).unwrap();
        assert_eq!(stats.pre.contacts_destroyed, 1);
        assert_eq!(world.contact_count(), 0);
    }
}
