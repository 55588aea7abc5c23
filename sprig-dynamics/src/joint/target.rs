use glam::{Mat2, Vec2};
use sprig_core::{math::inverse22, BodyId, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    solver::{BodyConstraints, ConstraintSolverConf, TimeStep},
    World,
};

use super::{lever_arm, soft_constraint};

/// Pulls a point of a body towards a world space target with a soft spring.
///
/// Typically used to drag bodies around with the mouse.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TargetJointConf {
    pub body: BodyId,
    pub collide_connected: bool,
    /// World space point the anchor is pulled towards
    pub target: Vec2,
    pub local_anchor_b: Vec2,
    pub max_force: f32,
    /// Spring frequency in Hz
    pub frequency: f32,
    pub damping_ratio: f32,
}

impl TargetJointConf {
    pub fn new(body: BodyId) -> Self {
        Self {
            body,
            collide_connected: false,
            target: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            max_force: 0.0,
            frequency: 5.0,
            damping_ratio: 0.7,
        }
    }

    /// Grabs `body` at the world point `target`
    pub fn at(world: &World, body: BodyId, target: Vec2) -> Result<Self> {
        let b = world.body(body)?;

        Ok(Self {
            target,
            local_anchor_b: b.local_point(target),
            ..Self::new(body)
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

    pub fn with_spring(mut self, frequency: f32, damping_ratio: f32) -> Self {
        self.frequency = frequency;
        self.damping_ratio = damping_ratio;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetJoint {
    pub(crate) body_b: BodyId,
    pub(crate) collide_connected: bool,
    pub(crate) target: Vec2,
    pub(crate) local_anchor_b: Vec2,
    max_force: f32,
    frequency: f32,
    damping_ratio: f32,

    impulse: Vec2,
    gamma: f32,
    c: Vec2,
    mass: Mat2,
    r_b: Vec2,
}

impl TargetJoint {
    pub(crate) fn new(conf: &TargetJointConf) -> Self {
        Self {
            body_b: conf.body,
            collide_connected: conf.collide_connected,
            target: conf.target,
            local_anchor_b: conf.local_anchor_b,
            max_force: conf.max_force,
            frequency: conf.frequency,
            damping_ratio: conf.damping_ratio,
            impulse: Vec2::ZERO,
            gamma: 0.0,
            c: Vec2::ZERO,
            mass: Mat2::ZERO,
            r_b: Vec2::ZERO,
        }
    }

    pub fn target(&self) -> Vec2 {
        self.target
    }

    /// Moves the target. The body is not woken.
    pub fn set_target(&mut self, target: Vec2) {
        self.target = target;
    }

    pub fn max_force(&self) -> f32 {
        self.max_force
    }

    pub fn set_max_force(&mut self, max_force: f32) {
        self.max_force = max_force;
    }

    pub(crate) fn linear_reaction(&self) -> Vec2 {
        self.impulse
    }

    pub(crate) fn angular_reaction(&self) -> f32 {
        0.0
    }

    pub(crate) fn init_velocity(
        &mut self,
        bodies: &mut BodyConstraints,
        step: &TimeStep,
        _: &ConstraintSolverConf,
    ) {
        let mut b = bodies.get(Some(self.body_b));

        let mass = if b.inv_mass > 0.0 { 1.0 / b.inv_mass } else { 0.0 };
        let (gamma, beta) = soft_constraint(mass, self.frequency, self.damping_ratio, step.dt);
        self.gamma = gamma;

        self.r_b = lever_arm(&b, self.local_anchor_b);

        let (m, i) = (b.inv_mass, b.inv_rot_i);
        let r = self.r_b;
        let k = Mat2::from_cols(
            Vec2::new(m + i * r.y * r.y + gamma, -i * r.x * r.y),
            Vec2::new(-i * r.x * r.y, m + i * r.x * r.x + gamma),
        );
        self.mass = inverse22(k);

        self.c = (b.position.linear + self.r_b - self.target) * beta;

        // Slight rotational damping
        b.velocity.angular *= 0.98;

        if step.warm_start {
            self.impulse *= step.dt_ratio;
            b.velocity.linear += b.inv_mass * self.impulse;
            b.velocity.angular += b.inv_rot_i * self.r_b.perp_dot(self.impulse);
        } else {
            self.impulse = Vec2::ZERO;
        }

        bodies.set(Some(self.body_b), b);
    }

    pub(crate) fn solve_velocity(&mut self, bodies: &mut BodyConstraints, step: &TimeStep) -> bool {
        let mut b = bodies.get(Some(self.body_b));

        let cdot = b.velocity.linear + sprig_core::math::cross_sv(b.velocity.angular, self.r_b);

        let old = self.impulse;
        let impulse = self.mass * -(cdot + self.c + self.gamma * self.impulse);
        self.impulse = (old + impulse).clamp_length_max(step.dt * self.max_force);
        let impulse = self.impulse - old;

        b.velocity.linear += b.inv_mass * impulse;
        b.velocity.angular += b.inv_rot_i * self.r_b.perp_dot(impulse);

        bodies.set(Some(self.body_b), b);

        impulse == Vec2::ZERO
    }

    pub(crate) fn solve_position(&self, _: &mut BodyConstraints, _: &ConstraintSolverConf) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use glam::vec2;

    use crate::solver::BodyConstraint;

    use super::*;

    #[test]
    fn pulls_towards_target() {
        let mut bodies = BodyConstraints::default();
        bodies.reset(1);
        bodies.insert(
            BodyId::from_index(0),
            BodyConstraint {
                inv_mass: 1.0,
                inv_rot_i: 1.0,
                ..Default::default()
            },
        );

        let mut joint = TargetJoint::new(&TargetJointConf {
            target: vec2(1.0, 0.0),
            max_force: 1000.0,
            ..TargetJointConf::new(BodyId::from_index(0))
        });

        let step = TimeStep::new(1.0 / 60.0, 1.0, false);
        let conf = ConstraintSolverConf {
            resolution_rate: 0.2,
            linear_slop: 0.005,
            angular_slop: 0.035,
            max_linear_correction: 0.2,
            max_angular_correction: 0.14,
        };

        joint.init_velocity(&mut bodies, &step, &conf);
        assert!(!joint.solve_velocity(&mut bodies, &step));

        let b = bodies.get(Some(BodyId::from_index(0)));
        assert!(b.velocity.linear.x > 0.0);
        assert!(b.velocity.linear.y.abs() < 1e-6);
        assert!(joint.linear_reaction().x > 0.0);
    }

    #[test]
    fn force_is_limited() {
        let mut bodies = BodyConstraints::default();
        bodies.reset(1);
        bodies.insert(
            BodyId::from_index(0),
            BodyConstraint {
                inv_mass: 1.0,
                inv_rot_i: 1.0,
                ..Default::default()
            },
        );

        let mut joint = TargetJoint::new(&TargetJointConf {
            target: vec2(100.0, 0.0),
            max_force: 60.0,
            ..TargetJointConf::new(BodyId::from_index(0))
        });

        let step = TimeStep::new(1.0 / 60.0, 1.0, false);
        let conf = ConstraintSolverConf {
            resolution_rate: 0.2,
            linear_slop: 0.005,
            angular_slop: 0.035,
            max_linear_correction: 0.2,
            max_angular_correction: 0.14,
        };

        joint.init_velocity(&mut bodies, &step, &conf);
        joint.solve_velocity(&mut bodies, &step);

        let b = bodies.get(Some(BodyId::from_index(0)));
        assert!((b.velocity.linear.x - 1.0).abs() < 1e-4);
    }
}
