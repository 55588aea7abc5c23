use glam::{Mat2, Vec2};
use sprig_core::{math::inverse22, BodyId, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    solver::{BodyConstraints, ConstraintSolverConf, TimeStep},
    World,
};

use super::{anchor_velocity, apply_point_impulse, lever_arm, point_mass};

/// Top-down friction: resists relative motion up to a maximum force and torque
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrictionJointConf {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub collide_connected: bool,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    pub max_force: f32,
    pub max_torque: f32,
}

impl FrictionJointConf {
    pub fn new(body_a: BodyId, body_b: BodyId) -> Self {
        Self {
            body_a,
            body_b,
            collide_connected: false,
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            max_force: 0.0,
            max_torque: 0.0,
        }
    }

    pub fn at(world: &World, body_a: BodyId, body_b: BodyId, anchor: Vec2) -> Result<Self> {
        let a = world.body(body_a)?;
        let b = world.body(body_b)?;

        Ok(Self {
            local_anchor_a: a.local_point(anchor),
            local_anchor_b: b.local_point(anchor),
            ..Self::new(body_a, body_b)
        })
    }

    pub fn with_collide_connected(mut self, collide_connected: bool) -> Self {
        self.collide_connected = collide_connected;
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
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrictionJoint {
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    pub(crate) collide_connected: bool,
    pub(crate) local_anchor_a: Vec2,
    pub(crate) local_anchor_b: Vec2,
    max_force: f32,
    max_torque: f32,

    linear_impulse: Vec2,
    angular_impulse: f32,
    linear_mass: Mat2,
    angular_mass: f32,
    r_a: Vec2,
    r_b: Vec2,
}

impl FrictionJoint {
    pub(crate) fn new(conf: &FrictionJointConf) -> Self {
        Self {
            body_a: conf.body_a,
            body_b: conf.body_b,
            collide_connected: conf.collide_connected,
            local_anchor_a: conf.local_anchor_a,
            local_anchor_b: conf.local_anchor_b,
            max_force: conf.max_force,
            max_torque: conf.max_torque,
            linear_impulse: Vec2::ZERO,
            angular_impulse: 0.0,
            linear_mass: Mat2::ZERO,
            angular_mass: 0.0,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
        }
    }

    pub fn max_force(&self) -> f32 {
        self.max_force
    }

    pub fn max_torque(&self) -> f32 {
        self.max_torque
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

        self.r_a = lever_arm(&a, self.local_anchor_a);
        self.r_b = lever_arm(&b, self.local_anchor_b);
        self.linear_mass = inverse22(point_mass(&a, self.r_a, &b, self.r_b));

        let inv = a.inv_rot_i + b.inv_rot_i;
        self.angular_mass = if inv > 0.0 { 1.0 / inv } else { 0.0 };

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

        let angular = {
            let cdot = b.velocity.angular - a.velocity.angular;
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
            let cdot = anchor_velocity(&a, self.r_a, &b, self.r_b);
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
