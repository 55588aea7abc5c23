use glam::{Mat2, Vec2};
use sprig_core::{math::solve22, BodyId, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    solver::{BodyConstraints, ConstraintSolverConf, TimeStep},
    World,
};

use super::{anchor_velocity, apply_point_impulse, lever_arm, point_mass};

/// Pins two bodies together at a shared point, leaving them free to rotate about it
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RevoluteJointConf {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub collide_connected: bool,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    /// Angle of B relative to A considered to be zero
    pub reference_angle: f32,
    pub enable_limit: bool,
    pub lower_angle: f32,
    pub upper_angle: f32,
    pub enable_motor: bool,
    pub motor_speed: f32,
    pub max_motor_torque: f32,
}

impl RevoluteJointConf {
    pub fn new(body_a: BodyId, body_b: BodyId) -> Self {
        Self {
            body_a,
            body_b,
            collide_connected: false,
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            reference_angle: 0.0,
            enable_limit: false,
            lower_angle: 0.0,
            upper_angle: 0.0,
            enable_motor: false,
            motor_speed: 0.0,
            max_motor_torque: 0.0,
        }
    }

    /// Joins the bodies at the world point `anchor` in their current placement
    pub fn at(world: &World, body_a: BodyId, body_b: BodyId, anchor: Vec2) -> Result<Self> {
        let a = world.body(body_a)?;
        let b = world.body(body_b)?;

        Ok(Self {
            local_anchor_a: a.local_point(anchor),
            local_anchor_b: b.local_point(anchor),
            reference_angle: b.angle() - a.angle(),
            ..Self::new(body_a, body_b)
        })
    }

    pub fn with_collide_connected(mut self, collide_connected: bool) -> Self {
        self.collide_connected = collide_connected;
        self
    }

    pub fn with_local_anchors(mut self, local_anchor_a: Vec2, local_anchor_b: Vec2) -> Self {
        self.local_anchor_a = local_anchor_a;
        self.local_anchor_b = local_anchor_b;
        self
    }

    pub fn with_reference_angle(mut self, reference_angle: f32) -> Self {
        self.reference_angle = reference_angle;
        self
    }

    pub fn with_limits(mut self, lower_angle: f32, upper_angle: f32) -> Self {
        self.enable_limit = true;
        self.lower_angle = lower_angle.min(upper_angle);
        self.upper_angle = upper_angle.max(lower_angle);
        self
    }

    pub fn with_motor(mut self, motor_speed: f32, max_motor_torque: f32) -> Self {
        self.enable_motor = true;
        self.motor_speed = motor_speed;
        self.max_motor_torque = max_motor_torque;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevoluteJoint {
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    pub(crate) collide_connected: bool,
    pub(crate) local_anchor_a: Vec2,
    pub(crate) local_anchor_b: Vec2,
    reference_angle: f32,
    enable_limit: bool,
    lower_angle: f32,
    upper_angle: f32,
    enable_motor: bool,
    motor_speed: f32,
    max_motor_torque: f32,

    impulse: Vec2,
    motor_impulse: f32,
    lower_impulse: f32,
    upper_impulse: f32,

    r_a: Vec2,
    r_b: Vec2,
    k: Mat2,
    axial_mass: f32,
    angle: f32,
}

impl RevoluteJoint {
    pub(crate) fn new(conf: &RevoluteJointConf) -> Self {
        Self {
            body_a: conf.body_a,
            body_b: conf.body_b,
            collide_connected: conf.collide_connected,
            local_anchor_a: conf.local_anchor_a,
            local_anchor_b: conf.local_anchor_b,
            reference_angle: conf.reference_angle,
            enable_limit: conf.enable_limit,
            lower_angle: conf.lower_angle,
            upper_angle: conf.upper_angle,
            enable_motor: conf.enable_motor,
            motor_speed: conf.motor_speed,
            max_motor_torque: conf.max_motor_torque,
            impulse: Vec2::ZERO,
            motor_impulse: 0.0,
            lower_impulse: 0.0,
            upper_impulse: 0.0,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            k: Mat2::ZERO,
            axial_mass: 0.0,
            angle: 0.0,
        }
    }

    pub fn reference_angle(&self) -> f32 {
        self.reference_angle
    }

    pub fn is_limit_enabled(&self) -> bool {
        self.enable_limit
    }

    pub fn limits(&self) -> (f32, f32) {
        (self.lower_angle, self.upper_angle)
    }

    pub fn is_motor_enabled(&self) -> bool {
        self.enable_motor
    }

    pub fn motor_speed(&self) -> f32 {
        self.motor_speed
    }

    pub fn set_motor_speed(&mut self, motor_speed: f32) {
        self.motor_speed = motor_speed;
    }

    pub fn motor_impulse(&self) -> f32 {
        self.motor_impulse
    }

    pub(crate) fn linear_reaction(&self) -> Vec2 {
        self.impulse
    }

    pub(crate) fn angular_reaction(&self) -> f32 {
        self.motor_impulse + self.lower_impulse - self.upper_impulse
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
        self.k = point_mass(&a, self.r_a, &b, self.r_b);

        let inv_axial = a.inv_rot_i + b.inv_rot_i;
        self.axial_mass = if inv_axial > 0.0 { 1.0 / inv_axial } else { 0.0 };
        let fixed_rotation = inv_axial == 0.0;

        self.angle = b.position.angular - a.position.angular - self.reference_angle;

        if !self.enable_limit || fixed_rotation {
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
        }

        if !self.enable_motor || fixed_rotation {
            self.motor_impulse = 0.0;
        }

        if step.warm_start {
            self.impulse *= step.dt_ratio;
            self.motor_impulse *= step.dt_ratio;
            self.lower_impulse *= step.dt_ratio;
            self.upper_impulse *= step.dt_ratio;

            let axial = self.motor_impulse + self.lower_impulse - self.upper_impulse;
            apply_point_impulse(&mut a, self.r_a, &mut b, self.r_b, self.impulse, axial);
        } else {
            self.impulse = Vec2::ZERO;
            self.motor_impulse = 0.0;
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
        }

        bodies.set(Some(self.body_a), a);
        bodies.set(Some(self.body_b), b);
    }

    pub(crate) fn solve_velocity(&mut self, bodies: &mut BodyConstraints, step: &TimeStep) -> bool {
        let mut a = bodies.get(Some(self.body_a));
        let mut b = bodies.get(Some(self.body_b));
        let (i_a, i_b) = (a.inv_rot_i, b.inv_rot_i);
        let fixed_rotation = i_a + i_b == 0.0;

        let mut unchanged = true;

        if self.enable_motor && !fixed_rotation {
            let cdot = b.velocity.angular - a.velocity.angular - self.motor_speed;
            let max_impulse = step.dt * self.max_motor_torque;

            let old = self.motor_impulse;
            self.motor_impulse =
                (old - self.axial_mass * cdot).clamp(-max_impulse, max_impulse);
            let impulse = self.motor_impulse - old;
            unchanged &= impulse == 0.0;

            a.velocity.angular -= i_a * impulse;
            b.velocity.angular += i_b * impulse;
        }

        if self.enable_limit && !fixed_rotation {
            // Lower limit
            {
                let c = self.angle - self.lower_angle;
                let cdot = b.velocity.angular - a.velocity.angular;
                let impulse = -self.axial_mass * (cdot + c.max(0.0) * step.inv_dt);

                let old = self.lower_impulse;
                self.lower_impulse = (old + impulse).max(0.0);
                let impulse = self.lower_impulse - old;
                unchanged &= impulse == 0.0;

                a.velocity.angular -= i_a * impulse;
                b.velocity.angular += i_b * impulse;
            }

            // Upper limit, with the sign of the constraint flipped
            {
                let c = self.upper_angle - self.angle;
                let cdot = a.velocity.angular - b.velocity.angular;
                let impulse = -self.axial_mass * (cdot + c.max(0.0) * step.inv_dt);

                let old = self.upper_impulse;
                self.upper_impulse = (old + impulse).max(0.0);
                let impulse = self.upper_impulse - old;
                unchanged &= impulse == 0.0;

                a.velocity.angular += i_a * impulse;
                b.velocity.angular -= i_b * impulse;
            }
        }

        let cdot = anchor_velocity(&a, self.r_a, &b, self.r_b);
        let impulse = solve22(self.k, -cdot);
        self.impulse += impulse;
        unchanged &= impulse == Vec2::ZERO;

        apply_point_impulse(&mut a, self.r_a, &mut b, self.r_b, impulse, 0.0);

        bodies.set(Some(self.body_a), a);
        bodies.set(Some(self.body_b), b);

        unchanged
    }

    pub(crate) fn solve_position(
        &self,
        bodies: &mut BodyConstraints,
        conf: &ConstraintSolverConf,
    ) -> bool {
        let mut a = bodies.get(Some(self.body_a));
        let mut b = bodies.get(Some(self.body_b));
        let (i_a, i_b) = (a.inv_rot_i, b.inv_rot_i);

        let mut angular_error = 0.0;

        if self.enable_limit && i_a + i_b != 0.0 {
            let angle = b.position.angular - a.position.angular - self.reference_angle;
            let max = conf.max_angular_correction;

            let c = if (self.upper_angle - self.lower_angle).abs() < 2.0 * conf.angular_slop {
                (angle - self.lower_angle).clamp(-max, max)
            } else if angle <= self.lower_angle {
                (angle - self.lower_angle + conf.angular_slop).clamp(-max, 0.0)
            } else if angle >= self.upper_angle {
                (angle - self.upper_angle - conf.angular_slop).clamp(0.0, max)
            } else {
                0.0
            };

            let impulse = -self.axial_mass * c;
            a.position.angular -= i_a * impulse;
            b.position.angular += i_b * impulse;
            angular_error = c.abs();
        }

        let r_a = lever_arm(&a, self.local_anchor_a);
        let r_b = lever_arm(&b, self.local_anchor_b);

        let c = b.position.linear + r_b - a.position.linear - r_a;
        let position_error = c.length();

        let impulse = -solve22(point_mass(&a, r_a, &b, r_b), c);

        a.position.linear -= a.inv_mass * impulse;
        a.position.angular -= i_a * r_a.perp_dot(impulse);
        b.position.linear += b.inv_mass * impulse;
        b.position.angular += i_b * r_b.perp_dot(impulse);

        bodies.set(Some(self.body_a), a);
        bodies.set(Some(self.body_b), b);

        position_error <= conf.linear_slop && angular_error <= conf.angular_slop
    }
}

#[cfg(test)]
mod tests {
    use glam::vec2;
    use sprig_core::Position;

    use crate::solver::BodyConstraint;

    use super::*;

    fn bodies(offset: Vec2) -> BodyConstraints {
        let mut bodies = BodyConstraints::default();
        bodies.reset(2);
        bodies.insert(BodyId::from_index(0), BodyConstraint::default());
        bodies.insert(
            BodyId::from_index(1),
            BodyConstraint {
                position: Position::new(offset, 0.0),
                inv_mass: 1.0,
                inv_rot_i: 1.0,
                ..Default::default()
            },
        );
        bodies
    }

    fn conf() -> ConstraintSolverConf {
        ConstraintSolverConf {
            resolution_rate: 0.2,
            linear_slop: 0.005,
            angular_slop: 0.035,
            max_linear_correction: 0.2,
            max_angular_correction: 0.14,
        }
    }

    #[test]
    fn pulls_anchors_together() {
        let mut bodies = bodies(vec2(1.1, 0.0));
        let joint = RevoluteJoint::new(
            &RevoluteJointConf::new(BodyId::from_index(0), BodyId::from_index(1))
                .with_local_anchors(Vec2::ZERO, vec2(-1.0, 0.0)),
        );

        let solved = (0..20).any(|_| joint.solve_position(&mut bodies, &conf()));
        assert!(solved);

        let b = bodies.get(Some(BodyId::from_index(1)));
        let anchor = b.position.linear + lever_arm(&b, vec2(-1.0, 0.0));
        assert!(anchor.length() <= 0.005, "{anchor}");
    }

    #[test]
    fn motor_drives_rotation() {
        let mut bodies = bodies(Vec2::ZERO);
        let mut joint = RevoluteJoint::new(
            &RevoluteJointConf::new(BodyId::from_index(0), BodyId::from_index(1))
                .with_motor(2.0, 1000.0),
        );

        let step = TimeStep::new(1.0 / 60.0, 1.0, true);
        joint.init_velocity(&mut bodies, &step, &conf());
        for _ in 0..10 {
            joint.solve_velocity(&mut bodies, &step);
        }

        let b = bodies.get(Some(BodyId::from_index(1)));
        assert!((b.velocity.angular - 2.0).abs() < 1e-4);
        assert!(joint.angular_reaction() > 0.0);
    }

    #[test]
    fn weak_motor_is_clamped() {
        let mut bodies = bodies(Vec2::ZERO);
        let mut joint = RevoluteJoint::new(
            &RevoluteJointConf::new(BodyId::from_index(0), BodyId::from_index(1))
                .with_motor(100.0, 6.0),
        );

        let step = TimeStep::new(0.5, 1.0, true);
        joint.init_velocity(&mut bodies, &step, &conf());
        joint.solve_velocity(&mut bodies, &step);
        joint.solve_velocity(&mut bodies, &step);

        assert_eq!(joint.motor_impulse(), 3.0);
    }
}
