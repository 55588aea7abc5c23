use arrayvec::ArrayVec;
use bitflags::bitflags;
use sprig_collision::{ProxyId, MAX_MANIFOLD_POINTS};
use sprig_core::{BodyId, FixtureId};

/// Identifies a pair of broad phase proxies, smallest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContactKey(ProxyId, ProxyId);

impl ContactKey {
    pub fn new(a: ProxyId, b: ProxyId) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }

    pub fn proxy_a(&self) -> ProxyId {
        self.0
    }

    pub fn proxy_b(&self) -> ProxyId {
        self.1
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ContactFlags: u8 {
        /// Cleared by a pre-solve listener to ignore the contact for the current step
        const ENABLED = 1 << 0;
        /// The shapes overlap
        const TOUCHING = 1 << 1;
        /// Either fixture is a sensor
        const SENSOR = 1 << 2;
        /// The manifold is stale
        const NEEDS_UPDATING = 1 << 3;
        /// The filtering rules for the pair changed
        const NEEDS_FILTERING = 1 << 4;
    }
}

/// A potential collision between one child of each of two fixtures.
///
/// Contacts exist while the fattened bounds of the two children overlap in the broad phase; they
/// are touching only while the shapes themselves overlap.
#[derive(Debug, Clone)]
pub struct Contact {
    pub(crate) body_a: BodyId,
    pub(crate) fixture_a: FixtureId,
    pub(crate) child_a: usize,
    pub(crate) body_b: BodyId,
    pub(crate) fixture_b: FixtureId,
    pub(crate) child_b: usize,
    pub(crate) friction: f32,
    pub(crate) restitution: f32,
    pub(crate) tangent_speed: f32,
    pub(crate) toi: Option<f32>,
    pub(crate) toi_count: u32,
    pub(crate) flags: ContactFlags,
}

impl Contact {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        body_a: BodyId,
        fixture_a: FixtureId,
        child_a: usize,
        body_b: BodyId,
        fixture_b: FixtureId,
        child_b: usize,
        friction: f32,
        restitution: f32,
        is_sensor: bool,
    ) -> Self {
        assert_ne!(body_a, body_b, "contact between fixtures of the same body");

        let mut flags = ContactFlags::ENABLED | ContactFlags::NEEDS_UPDATING;
        flags.set(ContactFlags::SENSOR, is_sensor);

        Self {
            body_a,
            fixture_a,
            child_a,
            body_b,
            fixture_b,
            child_b,
            friction,
            restitution,
            tangent_speed: 0.0,
            toi: None,
            toi_count: 0,
            flags,
        }
    }

    pub fn body_a(&self) -> BodyId {
        self.body_a
    }

    pub fn fixture_a(&self) -> FixtureId {
        self.fixture_a
    }

    pub fn child_a(&self) -> usize {
        self.child_a
    }

    pub fn body_b(&self) -> BodyId {
        self.body_b
    }

    pub fn fixture_b(&self) -> FixtureId {
        self.fixture_b
    }

    pub fn child_b(&self) -> usize {
        self.child_b
    }

    /// Returns the body on the other side of the contact from `body`
    pub fn other_body(&self, body: BodyId) -> BodyId {
        if body == self.body_a {
            self.body_b
        } else {
            self.body_a
        }
    }

    pub fn flags(&self) -> ContactFlags {
        self.flags
    }

    pub fn is_enabled(&self) -> bool {
        self.flags.contains(ContactFlags::ENABLED)
    }

    /// Enables or disables the contact until the next update.
    ///
    /// Intended for pre-solve listeners, e.g. to implement one-way platforms.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.flags.set(ContactFlags::ENABLED, enabled);
    }

    pub fn is_touching(&self) -> bool {
        self.flags.contains(ContactFlags::TOUCHING)
    }

    pub fn is_sensor(&self) -> bool {
        self.flags.contains(ContactFlags::SENSOR)
    }

    pub fn needs_updating(&self) -> bool {
        self.flags.contains(ContactFlags::NEEDS_UPDATING)
    }

    pub fn needs_filtering(&self) -> bool {
        self.flags.contains(ContactFlags::NEEDS_FILTERING)
    }

    pub fn friction(&self) -> f32 {
        self.friction
    }

    pub fn set_friction(&mut self, friction: f32) {
        self.friction = friction;
    }

    pub fn restitution(&self) -> f32 {
        self.restitution
    }

    pub fn set_restitution(&mut self, restitution: f32) {
        self.restitution = restitution;
    }

    /// Surface speed along the tangent, for conveyor belts
    pub fn tangent_speed(&self) -> f32 {
        self.tangent_speed
    }

    pub fn set_tangent_speed(&mut self, speed: f32) {
        self.tangent_speed = speed;
    }

    /// Cached time of impact within the current step
    pub fn toi(&self) -> Option<f32> {
        self.toi
    }

    /// Number of times this contact was resolved by continuous collision this step
    pub fn toi_count(&self) -> u32 {
        self.toi_count
    }

    pub(crate) fn flag_for_updating(&mut self) {
        self.flags |= ContactFlags::NEEDS_UPDATING;
    }

    pub(crate) fn flag_for_filtering(&mut self) {
        self.flags |= ContactFlags::NEEDS_FILTERING;
    }

    pub(crate) fn involves_fixture(&self, fixture: FixtureId) -> bool {
        self.fixture_a == fixture || self.fixture_b == fixture
    }
}

/// Impulses applied by the solver at each manifold point
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ContactImpulses {
    pub normal: ArrayVec<f32, MAX_MANIFOLD_POINTS>,
    pub tangent: ArrayVec<f32, MAX_MANIFOLD_POINTS>,
}

impl ContactImpulses {
    pub fn max_normal(&self) -> f32 {
        self.normal.iter().copied().fold(0.0, f32::max)
    }
}

/// Geometric mean of the two frictions
pub fn mix_friction(a: f32, b: f32) -> f32 {
    (a * b).sqrt()
}

/// The bouncier of the two surfaces wins
pub fn mix_restitution(a: f32, b: f32) -> f32 {
    a.max(b)
}

#[cfg(test)]
mod tests {
    use glam::Vec2;
    use sprig_collision::{Aabb, DynamicTree};

    use super::*;

    #[test]
    fn key_is_ordered() {
        let mut tree = DynamicTree::new();
        let a = tree.insert(Aabb::from_center(Vec2::ZERO, Vec2::ONE), ());
        let b = tree.insert(Aabb::from_center(Vec2::X, Vec2::ONE), ());

        let key = ContactKey::new(b, a);
        assert_eq!(key, ContactKey::new(a, b));
        assert!(key.proxy_a() <= key.proxy_b());
    }

    #[test]
    fn mixing() {
        assert_eq!(mix_friction(0.0, 0.8), 0.0);
        assert!((mix_friction(0.4, 0.9) - 0.6).abs() < 1e-6);
        assert_eq!(mix_restitution(0.1, 0.5), 0.5);
    }
}
