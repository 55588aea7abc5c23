//! Constraints between pairs of bodies.
//!
//! Every kind of joint has a configuration, used to create it through
//! [`World::create_joint`](crate::World::create_joint), and a solver state stored in the world as
//! a [`Joint`].
mod distance;
mod friction;
mod gear;
mod motor;
mod prismatic;
mod pulley;
mod revolute;
mod rope;
mod target;
mod weld;
mod wheel;

pub use distance::*;
pub use friction::*;
pub use gear::*;
pub use motor::*;
pub use prismatic::*;
pub use pulley::*;
pub use revolute::*;
pub use rope::*;
pub use target::*;
pub use weld::*;
pub use wheel::*;

use glam::{vec2, Mat2, Vec2};
use smallvec::SmallVec;
use sprig_core::{Arena, BodyId, JointId, Result, Rot};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    solver::{BodyConstraint, BodyConstraints, ConstraintSolverConf, TimeStep},
    Body,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum JointKind {
    Revolute,
    Prismatic,
    Distance,
    Pulley,
    Gear,
    Wheel,
    Weld,
    Friction,
    Rope,
    Motor,
    Target,
}

/// Describes a joint to create
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum JointConf {
    Revolute(RevoluteJointConf),
    Prismatic(PrismaticJointConf),
    Distance(DistanceJointConf),
    Pulley(PulleyJointConf),
    Gear(GearJointConf),
    Wheel(WheelJointConf),
    Weld(WeldJointConf),
    Friction(FrictionJointConf),
    Rope(RopeJointConf),
    Motor(MotorJointConf),
    Target(TargetJointConf),
}

macro_rules! impl_from_conf {
    ($($variant: ident($ty: ty)),* $(,)?) => {
        $(
            impl From<$ty> for JointConf {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_from_conf!(
    Revolute(RevoluteJointConf),
    Prismatic(PrismaticJointConf),
    Distance(DistanceJointConf),
    Pulley(PulleyJointConf),
    Gear(GearJointConf),
    Wheel(WheelJointConf),
    Weld(WeldJointConf),
    Friction(FrictionJointConf),
    Rope(RopeJointConf),
    Motor(MotorJointConf),
    Target(TargetJointConf),
);

impl JointConf {
    pub fn kind(&self) -> JointKind {
        match self {
            JointConf::Revolute(_) => JointKind::Revolute,
            JointConf::Prismatic(_) => JointKind::Prismatic,
            JointConf::Distance(_) => JointKind::Distance,
            JointConf::Pulley(_) => JointKind::Pulley,
            JointConf::Gear(_) => JointKind::Gear,
            JointConf::Wheel(_) => JointKind::Wheel,
            JointConf::Weld(_) => JointKind::Weld,
            JointConf::Friction(_) => JointKind::Friction,
            JointConf::Rope(_) => JointKind::Rope,
            JointConf::Motor(_) => JointKind::Motor,
            JointConf::Target(_) => JointKind::Target,
        }
    }

    pub fn collide_connected(&self) -> bool {
        match self {
            JointConf::Revolute(v) => v.collide_connected,
            JointConf::Prismatic(v) => v.collide_connected,
            JointConf::Distance(v) => v.collide_connected,
            JointConf::Pulley(v) => v.collide_connected,
            JointConf::Gear(v) => v.collide_connected,
            JointConf::Wheel(v) => v.collide_connected,
            JointConf::Weld(v) => v.collide_connected,
            JointConf::Friction(v) => v.collide_connected,
            JointConf::Rope(v) => v.collide_connected,
            JointConf::Motor(v) => v.collide_connected,
            JointConf::Target(v) => v.collide_connected,
        }
    }
}

/// Solver state of a joint
#[derive(Debug, Clone, PartialEq)]
pub enum Joint {
    Revolute(RevoluteJoint),
    Prismatic(PrismaticJoint),
    Distance(DistanceJoint),
    Pulley(PulleyJoint),
    Gear(GearJoint),
    Wheel(WheelJoint),
    Weld(WeldJoint),
    Friction(FrictionJoint),
    Rope(RopeJoint),
    Motor(MotorJoint),
    Target(TargetJoint),
}

macro_rules! dispatch {
    ($self: expr, $v: ident => $e: expr) => {
        match $self {
            Joint::Revolute($v) => $e,
            Joint::Prismatic($v) => $e,
            Joint::Distance($v) => $e,
            Joint::Pulley($v) => $e,
            Joint::Gear($v) => $e,
            Joint::Wheel($v) => $e,
            Joint::Weld($v) => $e,
            Joint::Friction($v) => $e,
            Joint::Rope($v) => $e,
            Joint::Motor($v) => $e,
            Joint::Target($v) => $e,
        }
    };
}

impl Joint {
    /// Creates the solver state of `conf`.
    ///
    /// Gear joints are resolved against the existing `joints` and the transforms of their bodies.
    pub(crate) fn new(
        conf: &JointConf,
        joints: &Arena<JointId, Joint>,
        bodies: &Arena<BodyId, Body>,
    ) -> Result<Self> {
        let joint = match conf {
            JointConf::Revolute(v) => Joint::Revolute(RevoluteJoint::new(v)),
            JointConf::Prismatic(v) => Joint::Prismatic(PrismaticJoint::new(v)),
            JointConf::Distance(v) => Joint::Distance(DistanceJoint::new(v)),
            JointConf::Pulley(v) => Joint::Pulley(PulleyJoint::new(v)?),
            JointConf::Gear(v) => Joint::Gear(GearJoint::new(v, joints, bodies)?),
            JointConf::Wheel(v) => Joint::Wheel(WheelJoint::new(v)),
            JointConf::Weld(v) => Joint::Weld(WeldJoint::new(v)),
            JointConf::Friction(v) => Joint::Friction(FrictionJoint::new(v)),
            JointConf::Rope(v) => Joint::Rope(RopeJoint::new(v)),
            JointConf::Motor(v) => Joint::Motor(MotorJoint::new(v)),
            JointConf::Target(v) => Joint::Target(TargetJoint::new(v)),
        };

        Ok(joint)
    }

    pub fn kind(&self) -> JointKind {
        match self {
            Joint::Revolute(_) => JointKind::Revolute,
            Joint::Prismatic(_) => JointKind::Prismatic,
            Joint::Distance(_) => JointKind::Distance,
            Joint::Pulley(_) => JointKind::Pulley,
            Joint::Gear(_) => JointKind::Gear,
            Joint::Wheel(_) => JointKind::Wheel,
            Joint::Weld(_) => JointKind::Weld,
            Joint::Friction(_) => JointKind::Friction,
            Joint::Rope(_) => JointKind::Rope,
            Joint::Motor(_) => JointKind::Motor,
            Joint::Target(_) => JointKind::Target,
        }
    }

    /// The first body, absent for target joints
    pub fn body_a(&self) -> Option<BodyId> {
        match self {
            Joint::Target(_) => None,
            Joint::Revolute(v) => Some(v.body_a),
            Joint::Prismatic(v) => Some(v.body_a),
            Joint::Distance(v) => Some(v.body_a),
            Joint::Pulley(v) => Some(v.body_a),
            Joint::Gear(v) => Some(v.body_a),
            Joint::Wheel(v) => Some(v.body_a),
            Joint::Weld(v) => Some(v.body_a),
            Joint::Friction(v) => Some(v.body_a),
            Joint::Rope(v) => Some(v.body_a),
            Joint::Motor(v) => Some(v.body_a),
        }
    }

    pub fn body_b(&self) -> BodyId {
        dispatch!(self, v => v.body_b)
    }

    /// Every body the joint acts on, including the two driver bodies of a gear
    pub fn bodies(&self) -> SmallVec<[BodyId; 4]> {
        let mut bodies: SmallVec<[BodyId; 4]> = self.body_a().into_iter().collect();
        bodies.push(self.body_b());

        if let Joint::Gear(v) = self {
            bodies.push(v.body_c);
            bodies.push(v.body_d);
        }

        bodies
    }

    pub fn collide_connected(&self) -> bool {
        dispatch!(self, v => v.collide_connected)
    }

    /// Anchor on body A in its local frame, or in world space for bodyless anchors
    pub fn local_anchor_a(&self) -> Vec2 {
        match self {
            Joint::Target(v) => v.target,
            Joint::Motor(_) => Vec2::ZERO,
            Joint::Revolute(v) => v.local_anchor_a,
            Joint::Prismatic(v) => v.local_anchor_a,
            Joint::Distance(v) => v.local_anchor_a,
            Joint::Pulley(v) => v.local_anchor_a,
            Joint::Gear(v) => v.local_anchor_a(),
            Joint::Wheel(v) => v.local_anchor_a,
            Joint::Weld(v) => v.local_anchor_a,
            Joint::Friction(v) => v.local_anchor_a,
            Joint::Rope(v) => v.local_anchor_a,
        }
    }

    pub fn local_anchor_b(&self) -> Vec2 {
        match self {
            Joint::Motor(_) => Vec2::ZERO,
            Joint::Revolute(v) => v.local_anchor_b,
            Joint::Prismatic(v) => v.local_anchor_b,
            Joint::Distance(v) => v.local_anchor_b,
            Joint::Pulley(v) => v.local_anchor_b,
            Joint::Gear(v) => v.local_anchor_b(),
            Joint::Wheel(v) => v.local_anchor_b,
            Joint::Weld(v) => v.local_anchor_b,
            Joint::Friction(v) => v.local_anchor_b,
            Joint::Rope(v) => v.local_anchor_b,
            Joint::Target(v) => v.local_anchor_b,
        }
    }

    /// Linear impulse applied to body B during the last step
    pub fn linear_reaction(&self) -> Vec2 {
        dispatch!(self, v => v.linear_reaction())
    }

    /// Angular impulse applied to body B during the last step
    pub fn angular_reaction(&self) -> f32 {
        dispatch!(self, v => v.angular_reaction())
    }

    pub(crate) fn shift_origin(&mut self, new_origin: Vec2) {
        match self {
            Joint::Pulley(v) => {
                v.ground_anchor_a -= new_origin;
                v.ground_anchor_b -= new_origin;
            }
            Joint::Target(v) => v.target -= new_origin,
            _ => {}
        }
    }

    pub(crate) fn init_velocity(
        &mut self,
        bodies: &mut BodyConstraints,
        step: &TimeStep,
        conf: &ConstraintSolverConf,
    ) {
        dispatch!(self, v => v.init_velocity(bodies, step, conf))
    }

    /// Returns true if no impulse changed
    pub(crate) fn solve_velocity(&mut self, bodies: &mut BodyConstraints, step: &TimeStep) -> bool {
        dispatch!(self, v => v.solve_velocity(bodies, step))
    }

    /// Returns true once the joint error is within tolerance
    pub(crate) fn solve_position(
        &self,
        bodies: &mut BodyConstraints,
        conf: &ConstraintSolverConf,
    ) -> bool {
        dispatch!(self, v => v.solve_position(bodies, conf))
    }
}

macro_rules! impl_downcast {
    ($($variant: ident($ty: ty) => $get: ident, $get_mut: ident;)*) => {
        impl Joint {
            $(
                pub fn $get(&self) -> Option<&$ty> {
                    match self {
                        Joint::$variant(v) => Some(v),
                        _ => None,
                    }
                }

                pub fn $get_mut(&mut self) -> Option<&mut $ty> {
                    match self {
                        Joint::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            )*
        }
    };
}

impl_downcast! {
    Revolute(RevoluteJoint) => as_revolute, as_revolute_mut;
    Prismatic(PrismaticJoint) => as_prismatic, as_prismatic_mut;
    Distance(DistanceJoint) => as_distance, as_distance_mut;
    Pulley(PulleyJoint) => as_pulley, as_pulley_mut;
    Gear(GearJoint) => as_gear, as_gear_mut;
    Wheel(WheelJoint) => as_wheel, as_wheel_mut;
    Weld(WeldJoint) => as_weld, as_weld_mut;
    Friction(FrictionJoint) => as_friction, as_friction_mut;
    Rope(RopeJoint) => as_rope, as_rope_mut;
    Motor(MotorJoint) => as_motor, as_motor_mut;
    Target(TargetJoint) => as_target, as_target_mut;
}

/// Lever arm from the center of mass to a local anchor
#[inline]
pub(crate) fn lever_arm(bc: &BodyConstraint, local_anchor: Vec2) -> Vec2 {
    Rot::from_angle(bc.position.angular).rotate(local_anchor - bc.local_center)
}

/// Effective mass matrix of a point-to-point constraint, before inversion
pub(crate) fn point_mass(a: &BodyConstraint, r_a: Vec2, b: &BodyConstraint, r_b: Vec2) -> Mat2 {
    let (m_a, i_a) = (a.inv_mass, a.inv_rot_i);
    let (m_b, i_b) = (b.inv_mass, b.inv_rot_i);

    let k11 = m_a + m_b + i_a * r_a.y * r_a.y + i_b * r_b.y * r_b.y;
    let k12 = -i_a * r_a.x * r_a.y - i_b * r_b.x * r_b.y;
    let k22 = m_a + m_b + i_a * r_a.x * r_a.x + i_b * r_b.x * r_b.x;

    Mat2::from_cols(vec2(k11, k12), vec2(k12, k22))
}

/// Applies the impulse `p` and angular impulse `l` to B, and their opposites to A
#[inline]
pub(crate) fn apply_point_impulse(
    a: &mut BodyConstraint,
    r_a: Vec2,
    b: &mut BodyConstraint,
    r_b: Vec2,
    p: Vec2,
    l: f32,
) {
    a.velocity.linear -= a.inv_mass * p;
    a.velocity.angular -= a.inv_rot_i * (r_a.perp_dot(p) + l);
    b.velocity.linear += b.inv_mass * p;
    b.velocity.angular += b.inv_rot_i * (r_b.perp_dot(p) + l);
}

/// Relative velocity of the anchor points
#[inline]
pub(crate) fn anchor_velocity(a: &BodyConstraint, r_a: Vec2, b: &BodyConstraint, r_b: Vec2) -> Vec2 {
    b.velocity.linear + sprig_core::math::cross_sv(b.velocity.angular, r_b)
        - a.velocity.linear
        - sprig_core::math::cross_sv(a.velocity.angular, r_a)
}

/// Softness parameters `(gamma, bias factor)` of a spring with the given effective mass
pub(crate) fn soft_constraint(mass: f32, frequency: f32, damping_ratio: f32, h: f32) -> (f32, f32) {
    let omega = std::f32::consts::TAU * frequency;
    let d = 2.0 * mass * damping_ratio * omega;
    let k = mass * omega * omega;

    let gamma = h * (d + h * k);
    let gamma = if gamma != 0.0 { 1.0 / gamma } else { 0.0 };

    (gamma, h * k * gamma)
}
