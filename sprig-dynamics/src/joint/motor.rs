use glam::{Mat2, Vec2};
use sprig_core::{math::inverse22, BodyId, Result, Rot};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    solver::{BodyConstraints, ConstraintSolverConf, TimeStep},
    World,
};

use super::{anchor_velocity, apply_point_impulse, lever_arm, point_mass};

/// Drives body B towards an offset from body A with limited force and torque
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MotorJointConf {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub collide_connected: bool,
    /// Target location of body B in the frame of body A
    pub linear_offset: Vec2,
    pub angular_offset: f32,
    pub max_force: f32,
    pub max_torque: f32,
    /// Fraction of the position error corrected per step, in `[0, 1]`
    pub correction_factor: f32,
}

impl MotorJointConf {
    pub fn new(body_a: BodyId, body_b: BodyId) -> Self {
        Self {
            body_a,
            body_b,
            collide_connected: false,
            linear_offset: Vec2::ZERO,
            angular_offset: 0.0,
            max_force: 1.0,
            max_torque: 1.0,
            correction_factor: 0.3,
        }
    }

    /// Keeps the current placement of B relative to A as the target
    pub fn at(world: &World, body_a: BodyId, body_b: BodyId) -> Result<Self> {
        let a = world.body(body_a)?;
        let b = world.body(body_b)?;

        Ok(Self {
            linear_offset: a.local_point(b.location()),
            angular_offset: b.angle() - a.angle(),
            ..Self::new(body_a, body_b)
        })
    }

    pub fn with_collide_connected(mut self, collide_connected: bool) -> Self {
        self.collide_connected = collide_connected;
        self
    }

    pub fn with_linear_offset(mut self, linear_offset: Vec2) -> Self {
        self.linear_offset = linear_offset;
        self
    }

    pub fn with_angular_offset(mut self, angular_offset: f32) -> Self {
        self.angular_offset = angular_offset;
        self
    }

    pub fn with_max_force(mut self, max_force: f32) -> Self {
        self.max_force = max_force;
        self
    }

    pub fn with_max_torque(mut self, max_torque: f32) -> Self {
        self.max_torque = max_torque;
        self
    }

    pub fn with_correction_factor(mut self, correction_factor: f32) -> Self {
        self.correction_factor = correction_factor.clamp(0.0, 1.0);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotorJoint {
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    pub(crate) collide_connected: bool,
    linear_offset: Vec2,
    angular_offset: f32,
    max_force: f32,
    max_torque: f32,
    correction_factor: f32,

    linear_impulse: Vec2,
    angular_impulse: f32,
    linear_mass: Mat2,
    angular_mass: f32,
    linear_error: Vec2,
    angular_error: f32,
    r_a: Vec2,
    r_b: Vec2,
}

impl MotorJoint {
    pub(crate) fn new(conf: &MotorJointConf) -> Self {
        Self {
            body_a: conf.body_a,
            body_b: conf.body_b,
            collide_connected: conf.collide_connected,
            linear_offset: conf.linear_offset,
            angular_offset: conf.angular_offset,
            max_force: conf.max_force,
            max_torque: conf.max_torque,
            correction_factor: conf.correction_factor,
            linear_impulse: Vec2::ZERO,
            angular_impulse: 0.0,
            linear_mass: Mat2::ZERO,
            angular_mass: 0.0,
            linear_error: Vec2::ZERO,
            angular_error: 0.0,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
        }
    }

    pub fn linear_offset(&self) -> Vec2 {
        self.linear_offset
    }

    pub fn set_linear_offset(&mut self, linear_offset: Vec2) {
        self.linear_offset = linear_offset;
    }

    pub fn angular_offset(&self) -> f32 {
        self.angular_offset
    }

    pub fn set_angular_offset(&mut self, angular_offset: f32) {
        self.angular_offset = angular_offset;
    }

    pub(crate) fn linear_reaction(&self) -> Vec2 {
        self.linear_impulse
    }

    pub(crate) fn angular_reaction(&self) -> f32 {
        self.angular_impulse
    }

    pub(crate) fn init_velocity(
        &mut self,
        bodies: &mut BodyConstraints,
        step: &TimeStep,
        _: &ConstraintSolverConf,
    ) {
        let mut a = bodies.get(Some(self.body_a));
        let mut b = bodies.get(Some(self.body_b));

        // Anchored at the body origins
        self.r_a = lever_arm(&a, Vec2::ZERO);
        self.r_b = lever_arm(&b, Vec2::ZERO);
        self.linear_mass = inverse22(point_mass(&a, self.r_a, &b, self.r_b));

        let inv = a.inv_rot_i + b.inv_rot_i;
        self.angular_mass = if inv > 0.0 { 1.0 / inv } else { 0.0 };

        let q_a = Rot::from_angle(a.position.angular);
        self.linear_error = b.position.linear + self.r_b
            - a.position.linear
            - self.r_a
            - q_a.rotate(self.linear_offset);
        self.angular_error = b.position.angular - a.position.angular - self.angular_offset;

        if step.warm_start {
            self.linear_impulse *= step.dt_ratio;
            self.angular_impulse *= step.dt_ratio;
            apply_point_impulse(
                &mut a,
                self.r_a,
                &mut b,
                self.r_b,
                self.linear_impulse,
                self.angular_impulse,
            );
        } else {
            self.linear_impulse = Vec2::ZERO;
            self.angular_impulse = 0.0;
        }

        bodies.set(Some(self.body_a), a);
        bodies.set(Some(self.body_b), b);
    }

    pub(crate) fn solve_velocity(&mut self, bodies: &mut BodyConstraints, step: &TimeStep) -> bool {
        let mut a = bodies.get(Some(self.body_a));
        let mut b = bodies.get(Some(self.body_b));
        let correction = step.inv_dt * self.correction_factor;

        let angular = {
            let cdot = b.velocity.angular - a.velocity.angular + correction * self.angular_error;
            let max_impulse = step.dt * self.max_torque;

            let old = self.angular_impulse;
            self.angular_impulse =
                (old - self.angular_mass * cdot).clamp(-max_impulse, max_impulse);
            let impulse = self.angular_impulse - old;

            a.velocity.angular -= a.inv_rot_i * impulse;
            b.velocity.angular += b.inv_rot_i * impulse;
            impulse
        };

        let linear = {
            let cdot =
                anchor_velocity(&a, self.r_a, &b, self.r_b) + correction * self.linear_error;
            let max_impulse = step.dt * self.max_force;

            let old = self.linear_impulse;
            self.linear_impulse = (old - self.linear_mass * cdot).clamp_length_max(max_impulse);
            let impulse = self.linear_impulse - old;

            apply_point_impulse(&mut a, self.r_a, &mut b, self.r_b, impulse, 0.0);
            impulse
        };

        bodies.set(Some(self.body_a), a);
        bodies.set(Some(self.body_b), b);

        angular == 0.0 && linear == Vec2::ZERO
    }

    pub(crate) fn solve_position(&self, _: &mut BodyConstraints, _: &ConstraintSolverConf) -> bool {
        true
    }
}
