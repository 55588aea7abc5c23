use bitflags::bitflags;
use glam::Vec2;
use sprig_collision::MassData;
use sprig_core::{
    math::cross_sv, BodyId, ContactId, FixtureId, JointId, Position, Sweep, Transform, Velocity,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ContactKey;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BodyType {
    /// Never moves and has infinite mass
    #[default]
    Static,
    /// Moves by its velocity alone and is unaffected by forces
    Kinematic,
    /// Fully simulated
    Dynamic,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BodyFlags: u16 {
        /// May have a non-zero velocity
        const SPEEDABLE = 1 << 0;
        /// May have a non-zero acceleration and responds to impulses
        const ACCELERABLE = 1 << 1;
        /// Participates in continuous collision against other bodies
        const IMPENETRABLE = 1 << 2;
        const FIXED_ROTATION = 1 << 3;
        const AUTO_SLEEP = 1 << 4;
        const AWAKE = 1 << 5;
        const ENABLED = 1 << 6;
        /// Requested continuous collision for a dynamic body
        const BULLET = 1 << 7;
    }
}

impl BodyFlags {
    fn for_type(body_type: BodyType) -> Self {
        match body_type {
            BodyType::Static => Self::IMPENETRABLE,
            BodyType::Kinematic => Self::IMPENETRABLE | Self::SPEEDABLE,
            BodyType::Dynamic => Self::SPEEDABLE | Self::ACCELERABLE,
        }
    }
}

/// Describes a body to be created
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyConf {
    pub body_type: BodyType,
    /// World position of the body origin
    pub location: Vec2,
    pub angle: f32,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
    pub linear_acceleration: Vec2,
    pub angular_acceleration: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub under_active_time: f32,
    pub allow_sleep: bool,
    pub awake: bool,
    pub fixed_rotation: bool,
    pub bullet: bool,
    pub enabled: bool,
}

impl Default for BodyConf {
    fn default() -> Self {
        Self {
            body_type: BodyType::Static,
            location: Vec2::ZERO,
            angle: 0.0,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            linear_acceleration: Vec2::ZERO,
            angular_acceleration: 0.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            under_active_time: 0.0,
            allow_sleep: true,
            awake: true,
            fixed_rotation: false,
            bullet: false,
            enabled: true,
        }
    }
}

impl BodyConf {
    pub fn new(body_type: BodyType) -> Self {
        Self {
            body_type,
            ..Default::default()
        }
    }

    pub fn dynamic() -> Self {
        Self::new(BodyType::Dynamic)
    }

    pub fn kinematic() -> Self {
        Self::new(BodyType::Kinematic)
    }

    pub fn with_location(mut self, location: Vec2) -> Self {
        self.location = location;
        self
    }

    pub fn with_angle(mut self, angle: f32) -> Self {
        self.angle = angle;
        self
    }

    pub fn with_linear_velocity(mut self, velocity: Vec2) -> Self {
        self.linear_velocity = velocity;
        self
    }

    pub fn with_angular_velocity(mut self, velocity: f32) -> Self {
        self.angular_velocity = velocity;
        self
    }

    pub fn with_linear_acceleration(mut self, acceleration: Vec2) -> Self {
        self.linear_acceleration = acceleration;
        self
    }

    pub fn with_angular_acceleration(mut self, acceleration: f32) -> Self {
        self.angular_acceleration = acceleration;
        self
    }

    pub fn with_linear_damping(mut self, damping: f32) -> Self {
        self.linear_damping = damping;
        self
    }

    pub fn with_angular_damping(mut self, damping: f32) -> Self {
        self.angular_damping = damping;
        self
    }

    pub fn with_allow_sleep(mut self, allow_sleep: bool) -> Self {
        self.allow_sleep = allow_sleep;
        self
    }

    pub fn with_awake(mut self, awake: bool) -> Self {
        self.awake = awake;
        self
    }

    pub fn with_fixed_rotation(mut self, fixed_rotation: bool) -> Self {
        self.fixed_rotation = fixed_rotation;
        self
    }

    pub fn with_bullet(mut self, bullet: bool) -> Self {
        self.bullet = bullet;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// A rigid body.
///
/// Bodies are owned by the [`World`](crate::World) and mutated through it. The body keeps the ids
/// of its fixtures, the joints attached to it along with the other body of each joint, and the
/// contacts it currently takes part in.
#[derive(Debug, Clone)]
pub struct Body {
    pub(crate) body_type: BodyType,
    pub(crate) flags: BodyFlags,
    pub(crate) xf: Transform,
    pub(crate) sweep: Sweep,
    pub(crate) velocity: Velocity,
    pub(crate) linear_acceleration: Vec2,
    pub(crate) angular_acceleration: f32,
    pub(crate) inv_mass: f32,
    pub(crate) inv_rot_i: f32,
    pub(crate) linear_damping: f32,
    pub(crate) angular_damping: f32,
    pub(crate) under_active_time: f32,
    pub(crate) fixtures: Vec<FixtureId>,
    pub(crate) joints: Vec<(JointId, Option<BodyId>)>,
    pub(crate) contacts: Vec<(ContactKey, ContactId)>,
}

impl Body {
    pub(crate) fn new(conf: &BodyConf) -> Self {
        let mut flags = BodyFlags::for_type(conf.body_type);
        if conf.bullet {
            flags |= BodyFlags::BULLET;
            if conf.body_type == BodyType::Dynamic {
                flags |= BodyFlags::IMPENETRABLE;
            }
        }

        flags.set(BodyFlags::FIXED_ROTATION, conf.fixed_rotation);
        flags.set(BodyFlags::AUTO_SLEEP, conf.allow_sleep);
        flags.set(BodyFlags::ENABLED, conf.enabled);

        if flags.contains(BodyFlags::SPEEDABLE) && (conf.awake || !conf.allow_sleep) {
            flags |= BodyFlags::AWAKE;
        }

        let xf = Transform::new(conf.location, conf.angle);
        let (inv_mass, velocity) = if flags.contains(BodyFlags::SPEEDABLE) {
            let inv_mass = if flags.contains(BodyFlags::ACCELERABLE) {
                1.0
            } else {
                0.0
            };
            (
                inv_mass,
                Velocity::new(conf.linear_velocity, conf.angular_velocity),
            )
        } else {
            (0.0, Velocity::ZERO)
        };

        let (linear_acceleration, angular_acceleration) =
            if flags.contains(BodyFlags::ACCELERABLE) {
                (conf.linear_acceleration, conf.angular_acceleration)
            } else {
                (Vec2::ZERO, 0.0)
            };

        Self {
            body_type: conf.body_type,
            flags,
            xf,
            sweep: Sweep::new(Position::new(conf.location, conf.angle), Vec2::ZERO),
            velocity,
            linear_acceleration,
            angular_acceleration,
            inv_mass,
            inv_rot_i: 0.0,
            linear_damping: conf.linear_damping,
            angular_damping: conf.angular_damping,
            under_active_time: conf.under_active_time,
            fixtures: Vec::new(),
            joints: Vec::new(),
            contacts: Vec::new(),
        }
    }

    pub fn body_type(&self) -> BodyType {
        self.body_type
    }

    pub fn flags(&self) -> BodyFlags {
        self.flags
    }

    /// Placement of the body origin
    pub fn transform(&self) -> &Transform {
        &self.xf
    }

    /// World position of the body origin
    pub fn location(&self) -> Vec2 {
        self.xf.p
    }

    pub fn angle(&self) -> f32 {
        self.sweep.pos1.angular
    }

    pub fn sweep(&self) -> &Sweep {
        &self.sweep
    }

    pub fn world_center(&self) -> Vec2 {
        self.sweep.pos1.linear
    }

    pub fn local_center(&self) -> Vec2 {
        self.sweep.local_center
    }

    pub fn velocity(&self) -> Velocity {
        self.velocity
    }

    pub fn linear_velocity(&self) -> Vec2 {
        self.velocity.linear
    }

    pub fn angular_velocity(&self) -> f32 {
        self.velocity.angular
    }

    pub fn linear_acceleration(&self) -> Vec2 {
        self.linear_acceleration
    }

    pub fn angular_acceleration(&self) -> f32 {
        self.angular_acceleration
    }

    pub fn mass(&self) -> f32 {
        if self.inv_mass != 0.0 {
            1.0 / self.inv_mass
        } else {
            0.0
        }
    }

    pub fn inv_mass(&self) -> f32 {
        self.inv_mass
    }

    /// Inverse rotational inertia about the center of mass
    pub fn inv_rot_inertia(&self) -> f32 {
        self.inv_rot_i
    }

    /// Rotational inertia about the body origin
    pub fn rot_inertia(&self) -> f32 {
        let center = self.sweep.local_center;
        if self.inv_rot_i != 0.0 {
            1.0 / self.inv_rot_i + self.mass() * center.dot(center)
        } else {
            0.0
        }
    }

    pub fn mass_data(&self) -> MassData {
        MassData {
            mass: self.mass(),
            center: self.sweep.local_center,
            i: self.rot_inertia(),
        }
    }

    pub fn linear_damping(&self) -> f32 {
        self.linear_damping
    }

    pub fn angular_damping(&self) -> f32 {
        self.angular_damping
    }

    /// Time spent below the sleep tolerances
    pub fn under_active_time(&self) -> f32 {
        self.under_active_time
    }

    pub fn is_speedable(&self) -> bool {
        self.flags.contains(BodyFlags::SPEEDABLE)
    }

    pub fn is_accelerable(&self) -> bool {
        self.flags.contains(BodyFlags::ACCELERABLE)
    }

    pub fn is_impenetrable(&self) -> bool {
        self.flags.contains(BodyFlags::IMPENETRABLE)
    }

    pub fn is_bullet(&self) -> bool {
        self.flags.contains(BodyFlags::BULLET)
    }

    pub fn is_fixed_rotation(&self) -> bool {
        self.flags.contains(BodyFlags::FIXED_ROTATION)
    }

    pub fn is_sleeping_allowed(&self) -> bool {
        self.flags.contains(BodyFlags::AUTO_SLEEP)
    }

    pub fn is_awake(&self) -> bool {
        self.flags.contains(BodyFlags::AWAKE)
    }

    pub fn is_enabled(&self) -> bool {
        self.flags.contains(BodyFlags::ENABLED)
    }

    pub fn fixtures(&self) -> &[FixtureId] {
        &self.fixtures
    }

    /// Joints attached to this body and the other body of each
    pub fn joints(&self) -> &[(JointId, Option<BodyId>)] {
        &self.joints
    }

    pub fn contacts(&self) -> &[(ContactKey, ContactId)] {
        &self.contacts
    }

    pub fn world_point(&self, local: Vec2) -> Vec2 {
        self.xf.apply(local)
    }

    pub fn world_vector(&self, local: Vec2) -> Vec2 {
        self.xf.q.rotate(local)
    }

    pub fn local_point(&self, world: Vec2) -> Vec2 {
        self.xf.inv_apply(world)
    }

    pub fn local_vector(&self, world: Vec2) -> Vec2 {
        self.xf.q.inv_rotate(world)
    }

    /// Velocity of a world point attached to the body
    pub fn velocity_at(&self, world: Vec2) -> Vec2 {
        self.velocity.linear + cross_sv(self.velocity.angular, world - self.sweep.pos1.linear)
    }

    /// Marks the body awake without touching the under-active time
    pub(crate) fn set_awake_flag(&mut self) {
        if self.is_speedable() {
            self.flags |= BodyFlags::AWAKE;
        }
    }

    pub(crate) fn set_awake(&mut self) {
        if self.is_speedable() {
            self.flags |= BodyFlags::AWAKE;
            self.under_active_time = 0.0;
        }
    }

    pub(crate) fn unset_awake(&mut self) {
        if !self.is_speedable() || self.is_sleeping_allowed() {
            self.flags -= BodyFlags::AWAKE;
            self.under_active_time = 0.0;
            self.velocity = Velocity::ZERO;
        }
    }

    pub(crate) fn set_velocity(&mut self, velocity: Velocity) {
        if velocity != Velocity::ZERO {
            if !self.is_speedable() {
                return;
            }
            self.set_awake();
        }

        self.velocity = velocity;
    }

    pub(crate) fn set_acceleration(&mut self, linear: Vec2, angular: f32) {
        if !self.is_accelerable() {
            return;
        }

        let grows = linear.length_squared() > self.linear_acceleration.length_squared()
            || angular.abs() > self.angular_acceleration.abs();
        let turns = linear.normalize_or_zero() != self.linear_acceleration.normalize_or_zero()
            || angular.signum() != self.angular_acceleration.signum();

        if grows || turns {
            self.set_awake();
        }

        self.linear_acceleration = linear;
        self.angular_acceleration = angular;
    }

    pub(crate) fn set_type_flags(&mut self, body_type: BodyType) {
        let kept = self.flags
            & (BodyFlags::FIXED_ROTATION
                | BodyFlags::AUTO_SLEEP
                | BodyFlags::ENABLED
                | BodyFlags::BULLET
                | BodyFlags::AWAKE);

        let mut flags = BodyFlags::for_type(body_type) | kept;
        if body_type == BodyType::Dynamic && flags.contains(BodyFlags::BULLET) {
            flags |= BodyFlags::IMPENETRABLE;
        }

        if !flags.contains(BodyFlags::SPEEDABLE) {
            flags -= BodyFlags::AWAKE;
            self.velocity = Velocity::ZERO;
            self.under_active_time = 0.0;
        }

        if !flags.contains(BodyFlags::ACCELERABLE) {
            self.linear_acceleration = Vec2::ZERO;
            self.angular_acceleration = 0.0;
        }

        self.body_type = body_type;
        self.flags = flags;
    }

    pub(crate) fn set_bullet(&mut self, bullet: bool) {
        self.flags.set(BodyFlags::BULLET, bullet);
        if self.body_type == BodyType::Dynamic {
            self.flags.set(BodyFlags::IMPENETRABLE, bullet);
        }
    }

    /// Applies new mass properties, moving the center of mass while preserving the velocity of
    /// the new center
    pub(crate) fn set_mass_data(&mut self, data: &MassData) {
        if !self.is_accelerable() {
            self.inv_mass = 0.0;
            self.inv_rot_i = 0.0;
            self.sweep = Sweep::new(
                Position::new(self.xf.p, self.sweep.pos1.angular),
                Vec2::ZERO,
            );
            return;
        }

        let mass = if data.mass > 0.0 {
            data.mass
        } else {
            tracing::debug!(mass = data.mass, "substituting unit mass for dynamic body");
            1.0
        };

        self.inv_mass = 1.0 / mass;

        let rot_i = data.i - mass * data.center.dot(data.center);
        self.inv_rot_i = if data.i > 0.0 && rot_i > 0.0 && !self.is_fixed_rotation() {
            1.0 / rot_i
        } else {
            0.0
        };

        let old_center = self.sweep.pos1.linear;
        let new_center = self.xf.apply(data.center);

        self.sweep.local_center = data.center;
        self.sweep.pos0.linear = new_center;
        self.sweep.pos1.linear = new_center;

        self.velocity.linear += cross_sv(self.velocity.angular, new_center - old_center);
    }

    /// Teleports the body origin
    pub(crate) fn set_transform(&mut self, location: Vec2, angle: f32) {
        self.xf = Transform::new(location, angle);
        let center = self.xf.apply(self.sweep.local_center);
        self.sweep = Sweep::new(Position::new(center, angle), self.sweep.local_center);
    }

    /// Moves the start of the sweep to `alpha` and places the body there
    pub(crate) fn advance(&mut self, alpha: f32) {
        self.sweep.advance0(alpha);
        self.sweep.pos1 = self.sweep.pos0;
        self.xf = self.sweep.transform1();
    }

    pub(crate) fn restore(&mut self, sweep: Sweep) {
        self.sweep = sweep;
        self.xf = sweep.transform1();
    }

    /// Puts the solved position at the end of the sweep.
    ///
    /// Returns true if the transform changed.
    pub(crate) fn update(&mut self, position: Position, velocity: Velocity) -> bool {
        self.velocity = velocity;
        self.sweep.pos1 = position;

        let xf = self.sweep.transform1();
        if xf != self.xf {
            self.xf = xf;
            true
        } else {
            false
        }
    }

    pub(crate) fn shift_origin(&mut self, new_origin: Vec2) {
        self.xf.p -= new_origin;
        self.sweep.pos0.linear -= new_origin;
        self.sweep.pos1.linear -= new_origin;
    }
}
