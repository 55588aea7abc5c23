//! The world owning every body, fixture, joint and contact, and the step pipeline advancing them.
//!
//! A step runs in phases:
//! 1. Broad phase proxies are created or destroyed for fixtures queued since the last step, and
//!    the proxies of teleported bodies are synchronized.
//! 2. Contacts whose proxies no longer overlap, or whose filtering rules changed, are destroyed.
//!    New contacts are found for proxies which moved.
//! 3. The manifolds of contacts between awake bodies are updated.
//! 4. Awake bodies are partitioned into islands which are solved independently.
//! 5. Continuous collision resolves the impacts the discrete solve missed.
mod bodies;
mod contacts;
mod fixtures;
mod islands;
mod joints;
mod proxies;
mod toi;

use std::ops::{ControlFlow, Deref, DerefMut};

use bitflags::bitflags;
use glam::Vec2;
use sprig_collision::{Aabb, DynamicTree, Manifold, ProxyId, WorldManifold};
use sprig_core::{
    Arena, BodyId, ContactId, EntityKind, Error, FixtureId, JointId, Result,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    island::{Island, IslandMarks},
    solver::BodyConstraints,
    Body, Contact, ContactKey, ContactListener, DestructionListener, Fixture, Joint, StepConf,
    StepStats,
};

/// Upper bound of entities addressable by a 16 bit id, minus the invalid id
const MAX_ENTITIES: usize = u16::MAX as usize - 1;

/// Capacity limits and shape constraints of a world
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WorldConf {
    pub max_bodies: usize,
    pub max_fixtures: usize,
    pub max_joints: usize,
    pub max_contacts: usize,
    /// Smallest vertex radius accepted for fixture shapes
    pub min_vertex_radius: f32,
    /// Largest vertex radius accepted for fixture shapes
    pub max_vertex_radius: f32,
}

impl Default for WorldConf {
    fn default() -> Self {
        Self {
            max_bodies: MAX_ENTITIES,
            max_fixtures: MAX_ENTITIES,
            max_joints: MAX_ENTITIES,
            max_contacts: MAX_ENTITIES * 32,
            min_vertex_radius: 0.01,
            max_vertex_radius: 255.0,
        }
    }
}

impl WorldConf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_bodies(mut self, max_bodies: usize) -> Self {
        self.max_bodies = max_bodies;
        self
    }

    pub fn with_max_fixtures(mut self, max_fixtures: usize) -> Self {
        self.max_fixtures = max_fixtures;
        self
    }

    pub fn with_max_joints(mut self, max_joints: usize) -> Self {
        self.max_joints = max_joints;
        self
    }

    pub fn with_max_contacts(mut self, max_contacts: usize) -> Self {
        self.max_contacts = max_contacts;
        self
    }

    pub fn with_vertex_radius(mut self, min: f32, max: f32) -> Self {
        self.min_vertex_radius = min;
        self.max_vertex_radius = max;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.min_vertex_radius >= 0.0 && self.min_vertex_radius <= self.max_vertex_radius) {
            return Err(Error::invalid_argument(format!(
                "vertex radius range [{}, {}] is empty",
                self.min_vertex_radius, self.max_vertex_radius
            )));
        }

        Ok(())
    }
}

/// User data of a broad phase proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeafData {
    pub body: BodyId,
    pub fixture: FixtureId,
    pub child: usize,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct WorldFlags: u8 {
        /// A step is in progress
        const LOCKED = 1 << 0;
        /// Every time of impact of the previous step was resolved
        const STEP_COMPLETE = 1 << 1;
        /// Proxies were added since contacts were last searched for
        const NEW_FIXTURES = 1 << 2;
    }
}

/// A physics world.
///
/// Entities are addressed by ids which stay valid until the entity is destroyed. Freed slots are
/// reused, most recently freed first.
pub struct World {
    conf: WorldConf,
    flags: WorldFlags,
    /// Inverse of the previous non-zero delta time
    inv_dt0: f32,

    bodies: Arena<BodyId, Body>,
    fixtures: Arena<FixtureId, Fixture>,
    joints: Arena<JointId, Joint>,
    contacts: Arena<ContactId, Contact>,
    /// Allocated in lockstep with `contacts`
    manifolds: Arena<ContactId, Manifold>,

    /// Bodies in creation order
    body_list: Vec<BodyId>,
    joint_list: Vec<JointId>,
    /// Contacts in creation order
    contact_list: Vec<(ContactKey, ContactId)>,

    tree: DynamicTree<LeafData>,
    /// Fixtures whose proxies are to be created or destroyed
    fixtures_for_proxies: Vec<FixtureId>,
    /// Teleported bodies whose proxies are to be synchronized
    bodies_for_proxies: Vec<BodyId>,
    /// Proxies which moved and are to be paired
    proxies_for_pairing: Vec<ProxyId>,

    island: Island,
    marks: IslandMarks,
    constraints: BodyConstraints,

    contact_listener: Option<Box<dyn ContactListener + Send>>,
    destruction_listener: Option<Box<dyn DestructionListener + Send>>,
}

impl Default for World {
    fn default() -> Self {
        Self::from_conf(WorldConf::default())
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("bodies", &self.body_list.len())
            .field("fixtures", &self.fixtures.used())
            .field("joints", &self.joint_list.len())
            .field("contacts", &self.contact_list.len())
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl World {
    pub fn new(conf: WorldConf) -> Result<Self> {
        conf.validate()?;
        Ok(Self::from_conf(conf))
    }

    fn from_conf(conf: WorldConf) -> Self {
        Self {
            conf,
            flags: WorldFlags::STEP_COMPLETE,
            inv_dt0: 0.0,
            bodies: Arena::new(),
            fixtures: Arena::new(),
            joints: Arena::new(),
            contacts: Arena::new(),
            manifolds: Arena::new(),
            body_list: Vec::new(),
            joint_list: Vec::new(),
            contact_list: Vec::new(),
            tree: DynamicTree::new(),
            fixtures_for_proxies: Vec::new(),
            bodies_for_proxies: Vec::new(),
            proxies_for_pairing: Vec::new(),
            island: Island::default(),
            marks: IslandMarks::default(),
            constraints: BodyConstraints::default(),
            contact_listener: None,
            destruction_listener: None,
        }
    }

    pub fn conf(&self) -> &WorldConf {
        &self.conf
    }

    /// Returns true while a step is in progress.
    ///
    /// A step which panicked leaves the world locked.
    pub fn is_locked(&self) -> bool {
        self.flags.contains(WorldFlags::LOCKED)
    }

    /// Returns false if sub-stepping left times of impact to resolve in the next step
    pub fn is_step_complete(&self) -> bool {
        self.flags.contains(WorldFlags::STEP_COMPLETE)
    }

    pub fn set_contact_listener(&mut self, listener: impl ContactListener + Send + 'static) {
        self.contact_listener = Some(Box::new(listener));
    }

    pub fn take_contact_listener(&mut self) -> Option<Box<dyn ContactListener + Send>> {
        self.contact_listener.take()
    }

    pub fn set_destruction_listener(&mut self, listener: impl DestructionListener + Send + 'static) {
        self.destruction_listener = Some(Box::new(listener));
    }

    pub fn take_destruction_listener(&mut self) -> Option<Box<dyn DestructionListener + Send>> {
        self.destruction_listener.take()
    }

    fn check_unlocked(&self) -> Result<()> {
        if self.is_locked() {
            Err(Error::WorldLocked)
        } else {
            Ok(())
        }
    }

    pub fn body(&self, id: BodyId) -> Result<&Body> {
        self.bodies.get(id).ok_or(Error::NotFound {
            kind: EntityKind::Body,
            index: id.index(),
        })
    }

    fn body_mut(&mut self, id: BodyId) -> Result<&mut Body> {
        self.bodies.get_mut(id).ok_or(Error::NotFound {
            kind: EntityKind::Body,
            index: id.index(),
        })
    }

    pub fn fixture(&self, id: FixtureId) -> Result<&Fixture> {
        self.fixtures.get(id).ok_or(Error::NotFound {
            kind: EntityKind::Fixture,
            index: id.index(),
        })
    }

    fn fixture_mut(&mut self, id: FixtureId) -> Result<&mut Fixture> {
        self.fixtures.get_mut(id).ok_or(Error::NotFound {
            kind: EntityKind::Fixture,
            index: id.index(),
        })
    }

    pub fn joint(&self, id: JointId) -> Result<&Joint> {
        self.joints.get(id).ok_or(Error::NotFound {
            kind: EntityKind::Joint,
            index: id.index(),
        })
    }

    pub fn contact(&self, id: ContactId) -> Result<&Contact> {
        self.contacts.get(id).ok_or(Error::NotFound {
            kind: EntityKind::Contact,
            index: id.index(),
        })
    }

    pub fn manifold(&self, id: ContactId) -> Result<&Manifold> {
        self.manifolds.get(id).ok_or(Error::NotFound {
            kind: EntityKind::Contact,
            index: id.index(),
        })
    }

    /// Evaluates the manifold of a contact at the current body transforms
    pub fn world_manifold(&self, id: ContactId) -> Result<WorldManifold> {
        let contact = self.contact(id)?;
        let manifold = self.manifold(id)?;

        let radius_a = self.fixtures[contact.fixture_a]
            .shape
            .vertex_radius(contact.child_a);
        let radius_b = self.fixtures[contact.fixture_b]
            .shape
            .vertex_radius(contact.child_b);

        Ok(WorldManifold::new(
            manifold,
            &self.bodies[contact.body_a].xf,
            radius_a,
            &self.bodies[contact.body_b].xf,
            radius_b,
        ))
    }

    /// Bodies in creation order
    pub fn bodies(&self) -> impl Iterator<Item = (BodyId, &Body)> {
        self.body_list.iter().map(|&id| (id, &self.bodies[id]))
    }

    pub fn joints(&self) -> impl Iterator<Item = (JointId, &Joint)> {
        self.joint_list.iter().map(|&id| (id, &self.joints[id]))
    }

    /// Contacts in creation order
    pub fn contacts(&self) -> impl Iterator<Item = (ContactId, &Contact)> {
        self.contact_list
            .iter()
            .map(|&(_, id)| (id, &self.contacts[id]))
    }

    pub fn body_count(&self) -> usize {
        self.body_list.len()
    }

    pub fn fixture_count(&self) -> usize {
        self.fixtures.used()
    }

    pub fn joint_count(&self) -> usize {
        self.joint_list.len()
    }

    pub fn contact_count(&self) -> usize {
        self.contact_list.len()
    }

    pub fn proxy_count(&self) -> usize {
        self.tree.leaf_count()
    }

    pub fn tree_height(&self) -> u32 {
        self.tree.height()
    }

    /// Visits the fixture children whose fattened bounds overlap `aabb` until `visit` returns
    /// false
    pub fn query_aabb(&self, aabb: &Aabb, mut visit: impl FnMut(FixtureId, usize) -> bool) {
        self.tree.query(aabb, |proxy| match self.tree.leaf_data(proxy) {
            Some(leaf) if !visit(leaf.fixture, leaf.child) => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        })
    }

    /// Sets the linear acceleration of every accelerable body
    pub fn set_gravity(&mut self, gravity: Vec2) -> Result<()> {
        self.check_unlocked()?;

        for &id in &self.body_list {
            let body = &mut self.bodies[id];
            let angular = body.angular_acceleration;
            body.set_acceleration(gravity, angular);
        }

        Ok(())
    }

    /// Moves the world origin to `new_origin`, translating everything by `-new_origin`.
    ///
    /// Useful for large worlds to keep coordinates close to the origin.
    pub fn shift_origin(&mut self, new_origin: Vec2) -> Result<()> {
        self.check_unlocked()?;

        for &id in &self.body_list {
            self.bodies[id].shift_origin(new_origin);
        }

        for &id in &self.joint_list {
            self.joints[id].shift_origin(new_origin);
        }

        self.tree.shift_origin(new_origin);
        Ok(())
    }

    /// Destroys every entity, notifying the destruction listener of each
    pub fn clear(&mut self) -> Result<()> {
        self.check_unlocked()?;

        if let Some(listener) = self.destruction_listener.as_deref_mut() {
            for &id in &self.joint_list {
                listener.joint(id);
            }

            for &id in &self.body_list {
                for &fixture in &self.bodies[id].fixtures {
                    listener.fixture(fixture);
                }

                listener.body(id);
            }
        }

        self.bodies.clear();
        self.fixtures.clear();
        self.joints.clear();
        self.contacts.clear();
        self.manifolds.clear();
        self.body_list.clear();
        self.joint_list.clear();
        self.contact_list.clear();
        self.tree.clear();
        self.fixtures_for_proxies.clear();
        self.bodies_for_proxies.clear();
        self.proxies_for_pairing.clear();
        self.flags = WorldFlags::STEP_COMPLETE;
        self.inv_dt0 = 0.0;

        Ok(())
    }

    /// Advances the world by `conf.delta_time`.
    ///
    /// Contact listeners are called from within the step. A zero delta time only updates the
    /// broad phase and the set of contacts.
    pub fn step(&mut self, conf: &StepConf) -> Result<StepStats> {
        let dt = conf.delta_time;
        let _span = tracing::info_span!("step", dt).entered();
        sprig_core::profile_function!();

        self.check_unlocked()?;
        if !(dt >= 0.0 && dt.is_finite()) {
            return Err(Error::invalid_argument(format!(
                "delta time must be finite and non-negative, got {dt}"
            )));
        }

        let stats = WorldLock::new(self).run_step(conf);

        tracing::trace!(?stats, "step finished");
        Ok(stats)
    }

    fn run_step(&mut self, conf: &StepConf) -> StepStats {
        let dt = conf.delta_time;
        let mut stats = StepStats::default();

        {
            let _span = tracing::debug_span!("proxies").entered();
            stats.pre.proxies_moved = self.create_and_destroy_proxies(conf.aabb_extension);
            stats.pre.proxies_moved += self.synchronize_queued(conf.aabb_extension);
        }

        {
            let _span = tracing::debug_span!("contacts").entered();
            stats.pre.contacts_destroyed = self.destroy_contacts();

            if self.flags.contains(WorldFlags::NEW_FIXTURES) {
                self.flags -= WorldFlags::NEW_FIXTURES;
                stats.pre.contacts_added = self.find_new_contacts();
            }
        }

        if dt != 0.0 {
            let inv_dt = 1.0 / dt;
            let dt_ratio = if self.inv_dt0 > 0.0 {
                dt * self.inv_dt0
            } else {
                1.0
            };

            {
                let _span = tracing::debug_span!("update_contacts").entered();
                let update = self.update_contacts(conf);
                stats.pre.contacts_ignored = update.ignored;
                stats.pre.contacts_updated = update.updated;
                stats.pre.contacts_skipped = update.skipped;
            }

            if self.is_step_complete() {
                let _span = tracing::debug_span!("solve_reg").entered();
                stats.reg = self.solve_reg(conf, dt_ratio);
            }

            if conf.do_toi {
                let _span = tracing::debug_span!("solve_toi").entered();
                stats.toi = self.solve_toi(conf);
            }

            self.inv_dt0 = inv_dt;
        }

        stats
    }
}

/// Keeps the world locked while alive, unlocking it on drop even when a listener panics
struct WorldLock<'a>(&'a mut World);

impl<'a> WorldLock<'a> {
    fn new(world: &'a mut World) -> Self {
        world.flags |= WorldFlags::LOCKED;
        Self(world)
    }
}

impl Deref for WorldLock<'_> {
    type Target = World;

    fn deref(&self) -> &World {
        self.0
    }
}

impl DerefMut for WorldLock<'_> {
    fn deref_mut(&mut self) -> &mut World {
        self.0
    }
}

impl Drop for WorldLock<'_> {
    fn drop(&mut self) {
        self.0.flags -= WorldFlags::LOCKED;
    }
}

#[cfg(test)]
mod tests {
    use glam::vec2;
    use sprig_collision::{Disk, Polygon};

    use sprig_core::Velocity;

    use crate::{joint::DistanceJointConf, BodyConf, Filter, FixtureConf};

    use super::*;

    #[test]
    fn rejects_empty_vertex_radius_range() {
        crate::init_logging();
        assert!(World::new(WorldConf::default().with_vertex_radius(1.0, 0.5)).is_err());
        assert!(World::new(WorldConf::default()).is_ok());
    }

    #[test]
    fn rejects_negative_delta_time() {
        crate::init_logging();
        let mut world = World::default();
        assert!(matches!(
            world.step(&StepConf::new(-1.0)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(!world.is_locked());
    }

    #[test]
    fn mutation_fails_while_locked() -> Result<()> {
        crate::init_logging();
        let mut world = World::default();

        let ground = world.create_body(&BodyConf::default())?;
        let body = world.create_body(&BodyConf::dynamic())?;
        let fixture = world.create_fixture(body, Disk::new(0.5), &FixtureConf::new(), false)?;
        let joint = world.create_joint(DistanceJointConf::new(ground, body))?;

        {
            let mut world = WorldLock::new(&mut world);
            assert!(world.is_locked());

            let locked = Err(Error::WorldLocked);

            assert_eq!(world.set_sensor(fixture, true), locked);
            assert_eq!(world.set_filter_data(fixture, Filter::default()), locked);
            assert_eq!(world.refilter(fixture), locked);
            assert_eq!(world.set_friction(fixture, 0.5), locked);
            assert_eq!(world.set_restitution(fixture, 0.5), locked);
            assert_eq!(world.set_density(fixture, 2.0), locked);

            assert_eq!(world.set_awake(body), locked);
            assert_eq!(world.unset_awake(body), locked);
            assert_eq!(world.set_velocity(body, Velocity::new(Vec2::X, 1.0)), locked);
            assert_eq!(world.set_acceleration(body, Vec2::NEG_Y, 0.0), locked);
            assert_eq!(world.set_damping(body, 0.1, 0.1), locked);
            assert_eq!(world.set_fixed_rotation(body, true), locked);
            assert_eq!(world.set_bullet(body, true), locked);
            assert_eq!(world.set_sleeping_allowed(body, false), locked);

            assert!(matches!(world.joint_mut(joint), Err(Error::WorldLocked)));
        }

        // Nothing changed, and the lock is released with the guard
        assert!(!world.is_locked());
        let fixture = world.fixture(fixture)?;
        assert!(!fixture.is_sensor());
        assert_eq!(fixture.density(), 0.0);
        assert!(!world.body(body)?.is_bullet());
        Ok(())
    }

    #[test]
    fn lock_is_released_on_unwind() {
        crate::init_logging();
        let mut world = World::default();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _lock = WorldLock::new(&mut world);
            panic!("failed mid step");
        }));

        assert!(result.is_err());
        assert!(!world.is_locked());
        assert!(world.create_body(&BodyConf::default()).is_ok());
    }

    #[test]
    fn zero_step_finds_contacts() -> Result<()> {
        crate::init_logging();
        let mut world = World::default();

        let ground = world.create_body(&BodyConf::default())?;
        world.create_fixture(ground, Polygon::new_box(5.0, 0.5), &FixtureConf::new(), false)?;

        let ball = world.create_body(&BodyConf::dynamic().with_location(vec2(0.0, 0.9)))?;
        world.create_fixture(ball, Disk::new(0.5), &FixtureConf::new().with_density(1.0), true)?;

        assert_eq!(world.proxy_count(), 0);

        let stats = world.step(&StepConf::new(0.0))?;
        assert_eq!(world.proxy_count(), 2);
        assert_eq!(stats.pre.contacts_added, 1);
        assert_eq!(world.contact_count(), 1);

        // Nothing moves without time passing
        assert_eq!(world.body(ball)?.location(), vec2(0.0, 0.9));
        assert!(world.contacts().all(|(_, c)| !c.is_touching()));
        Ok(())
    }

    #[test]
    fn query_stops_early() -> Result<()> {
        crate::init_logging();
        let mut world = World::default();

        for i in 0..4 {
            let body = world.create_body(&BodyConf::default().with_location(vec2(i as f32, 0.0)))?;
            world.create_fixture(body, Disk::new(0.4), &FixtureConf::new(), false)?;
        }

        world.step(&StepConf::new(0.0))?;

        let everything = Aabb::new(vec2(-10.0, -10.0), vec2(10.0, 10.0));
        let mut count = 0;
        world.query_aabb(&everything, |_, _| {
            count += 1;
            true
        });
        assert_eq!(count, 4);

        let mut count = 0;
        world.query_aabb(&everything, |_, _| {
            count += 1;
            false
        });
        assert_eq!(count, 1);
        Ok(())
    }

    #[test]
    fn shift_origin_moves_bodies() -> Result<()> {
        crate::init_logging();
        let mut world = World::default();
        let body = world.create_body(&BodyConf::dynamic().with_location(vec2(10.0, 5.0)))?;
        world.create_fixture(body, Disk::new(0.5), &FixtureConf::new(), false)?;
        world.step(&StepConf::new(0.0))?;

        world.shift_origin(vec2(10.0, 0.0))?;
        assert_eq!(world.body(body)?.location(), vec2(0.0, 5.0));

        let mut found = false;
        world.query_aabb(&Aabb::from_center(vec2(0.0, 5.0), Vec2::splat(0.1)), |_, _| {
            found = true;
            false
        });
        assert!(found);
        Ok(())
    }
}
