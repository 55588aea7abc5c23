use glam::Vec2;
use sprig_core::{math::cross_sv, BodyId, Result, Rot};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    solver::{BodyConstraint, BodyConstraints, ConstraintSolverConf, TimeStep},
    World,
};

use super::{lever_arm, soft_constraint};

/// A wheel on a suspension: body B is free to rotate and moves along an axis of body A on a
/// spring
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WheelJointConf {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub collide_connected: bool,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    /// Suspension axis in the frame of body A
    pub local_axis_a: Vec2,
    pub enable_motor: bool,
    pub max_motor_torque: f32,
    pub motor_speed: f32,
    pub frequency: f32,
    pub damping_ratio: f32,
}

impl WheelJointConf {
    pub fn new(body_a: BodyId, body_b: BodyId) -> Self {
        Self {
            body_a,
            body_b,
            collide_connected: false,
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            local_axis_a: Vec2::X,
            enable_motor: false,
            max_motor_torque: 0.0,
            motor_speed: 0.0,
            frequency: 2.0,
            damping_ratio: 0.7,
        }
    }

    pub fn at(
        world: &World,
        body_a: BodyId,
        body_b: BodyId,
        anchor: Vec2,
        axis: Vec2,
    ) -> Result<Self> {
        let a = world.body(body_a)?;
        let b = world.body(body_b)?;

        Ok(Self {
            local_anchor_a: a.local_point(anchor),
            local_anchor_b: b.local_point(anchor),
            local_axis_a: a.local_vector(axis).normalize_or_zero(),
            ..Self::new(body_a, body_b)
        })
    }

    pub fn with_collide_connected(mut self, collide_connected: bool) -> Self {
        self.collide_connected = collide_connected;
        self
    }

    pub fn with_local_axis(mut self, local_axis_a: Vec2) -> Self {
        self.local_axis_a = local_axis_a.normalize_or_zero();
        self
    }

    pub fn with_motor(mut self, motor_speed: f32, max_motor_torque: f32) -> Self {
        self.enable_motor = true;
        self.motor_speed = motor_speed;
        self.max_motor_torque = max_motor_torque;
        self
    }

    pub fn with_spring(mut self, frequency: f32, damping_ratio: f32) -> Self {
        self.frequency = frequency;
        self.damping_ratio = damping_ratio;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WheelJoint {
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    pub(crate) collide_connected: bool,
    pub(crate) local_anchor_a: Vec2,
    pub(crate) local_anchor_b: Vec2,
    local_x_axis: Vec2,
    local_y_axis: Vec2,
    enable_motor: bool,
    max_motor_torque: f32,
    motor_speed: f32,
    frequency: f32,
    damping_ratio: f32,

    impulse: f32,
    motor_impulse: f32,
    spring_impulse: f32,

    ax: Vec2,
    ay: Vec2,
    s_ax: f32,
    s_bx: f32,
    s_ay: f32,
    s_by: f32,
    mass: f32,
    motor_mass: f32,
    spring_mass: f32,
    bias: f32,
    gamma: f32,
}

impl WheelJoint {
    pub(crate) fn new(conf: &WheelJointConf) -> Self {
        Self {
            body_a: conf.body_a,
            body_b: conf.body_b,
            collide_connected: conf.collide_connected,
            local_anchor_a: conf.local_anchor_a,
            local_anchor_b: conf.local_anchor_b,
            local_x_axis: conf.local_axis_a,
            local_y_axis: cross_sv(1.0, conf.local_axis_a),
            enable_motor: conf.enable_motor,
            max_motor_torque: conf.max_motor_torque,
            motor_speed: conf.motor_speed,
            frequency: conf.frequency,
            damping_ratio: conf.damping_ratio,
            impulse: 0.0,
            motor_impulse: 0.0,
            spring_impulse: 0.0,
            ax: Vec2::ZERO,
            ay: Vec2::ZERO,
            s_ax: 0.0,
            s_bx: 0.0,
            s_ay: 0.0,
            s_by: 0.0,
            mass: 0.0,
            motor_mass: 0.0,
            spring_mass: 0.0,
            bias: 0.0,
            gamma: 0.0,
        }
    }

    pub fn motor_speed(&self) -> f32 {
        self.motor_speed
    }

    pub fn set_motor_speed(&mut self, motor_speed: f32) {
        self.motor_speed = motor_speed;
    }

    pub fn spring(&self) -> (f32, f32) {
        (self.frequency, self.damping_ratio)
    }

    pub(crate) fn linear_reaction(&self) -> Vec2 {
        self.impulse * self.ay + self.spring_impulse * self.ax
    }

    pub(crate) fn angular_reaction(&self) -> f32 {
        self.motor_impulse
    }

    fn apply(&self, a: &mut BodyConstraint, b: &mut BodyConstraint, p: Vec2, l_a: f32, l_b: f32) {
        a.velocity.linear -= a.inv_mass * p;
        a.velocity.angular -= a.inv_rot_i * l_a;
        b.velocity.linear += b.inv_mass * p;
        b.velocity.angular += b.inv_rot_i * l_b;
    }

    pub(crate) fn init_velocity(
        &mut self,
        bodies: &mut BodyConstraints,
        step: &TimeStep,
        _: &ConstraintSolverConf,
    ) {
        let mut a = bodies.get(Some(self.body_a));
        let mut b = bodies.get(Some(self.body_b));
        let (m_a, i_a) = (a.inv_mass, a.inv_rot_i);
        let (m_b, i_b) = (b.inv_mass, b.inv_rot_i);

        let r_a = lever_arm(&a, self.local_anchor_a);
        let r_b = lever_arm(&b, self.local_anchor_b);
        let d = b.position.linear + r_b - a.position.linear - r_a;
        let q_a = Rot::from_angle(a.position.angular);

        // Point to line constraint
        self.ay = q_a.rotate(self.local_y_axis);
        self.s_ay = (d + r_a).perp_dot(self.ay);
        self.s_by = r_b.perp_dot(self.ay);

        let inv_mass = m_a + m_b + i_a * self.s_ay * self.s_ay + i_b * self.s_by * self.s_by;
        self.mass = if inv_mass > 0.0 { 1.0 / inv_mass } else { 0.0 };

        // Spring along the suspension axis
        self.ax = q_a.rotate(self.local_x_axis);
        self.s_ax = (d + r_a).perp_dot(self.ax);
        self.s_bx = r_b.perp_dot(self.ax);

        self.spring_mass = 0.0;
        self.bias = 0.0;
        self.gamma = 0.0;

        if self.frequency > 0.0 {
            let inv_mass = m_a + m_b + i_a * self.s_ax * self.s_ax + i_b * self.s_bx * self.s_bx;

            if inv_mass > 0.0 {
                let (gamma, bias_factor) =
                    soft_constraint(1.0 / inv_mass, self.frequency, self.damping_ratio, step.dt);
                self.gamma = gamma;
                self.bias = d.dot(self.ax) * bias_factor;

                let inv_mass = inv_mass + gamma;
                self.spring_mass = if inv_mass > 0.0 { 1.0 / inv_mass } else { 0.0 };
            }
        } else {
            self.spring_impulse = 0.0;
        }

        if self.enable_motor {
            let inv_mass = i_a + i_b;
            self.motor_mass = if inv_mass > 0.0 { 1.0 / inv_mass } else { 0.0 };
        } else {
            self.motor_mass = 0.0;
            self.motor_impulse = 0.0;
        }

        if step.warm_start {
            self.impulse *= step.dt_ratio;
            self.spring_impulse *= step.dt_ratio;
            self.motor_impulse *= step.dt_ratio;

            let p = self.impulse * self.ay + self.spring_impulse * self.ax;
            let l_a = self.impulse * self.s_ay + self.spring_impulse * self.s_ax + self.motor_impulse;
            let l_b = self.impulse * self.s_by + self.spring_impulse * self.s_bx + self.motor_impulse;
            self.apply(&mut a, &mut b, p, l_a, l_b);
        } else {
            self.impulse = 0.0;
            self.spring_impulse = 0.0;
            self.motor_impulse = 0.0;
        }

        bodies.set(Some(self.body_a), a);
        bodies.set(Some(self.body_b), b);
    }

    pub(crate) fn solve_velocity(&mut self, bodies: &mut BodyConstraints, step: &TimeStep) -> bool {
        let mut a = bodies.get(Some(self.body_a));
        let mut b = bodies.get(Some(self.body_b));

        let mut unchanged = true;

        // Spring
        {
            let cdot = self.ax.dot(b.velocity.linear - a.velocity.linear)
                + self.s_bx * b.velocity.angular
                - self.s_ax * a.velocity.angular;
            let impulse =
                -self.spring_mass * (cdot + self.bias + self.gamma * self.spring_impulse);
            self.spring_impulse += impulse;
            unchanged &= impulse == 0.0;

            let p = impulse * self.ax;
            self.apply(&mut a, &mut b, p, impulse * self.s_ax, impulse * self.s_bx);
        }

        // Rotational motor
        {
            let cdot = b.velocity.angular - a.velocity.angular - self.motor_speed;
            let max_impulse = step.dt * self.max_motor_torque;

            let old = self.motor_impulse;
            self.motor_impulse =
                (old - self.motor_mass * cdot).clamp(-max_impulse, max_impulse);
            let impulse = self.motor_impulse - old;
            unchanged &= impulse == 0.0;

            a.velocity.angular -= a.inv_rot_i * impulse;
            b.velocity.angular += b.inv_rot_i * impulse;
        }

        // Point to line
        {
            let cdot = self.ay.dot(b.velocity.linear - a.velocity.linear)
                + self.s_by * b.velocity.angular
                - self.s_ay * a.velocity.angular;
            let impulse = -self.mass * cdot;
            self.impulse += impulse;
            unchanged &= impulse == 0.0;

            let p = impulse * self.ay;
            self.apply(&mut a, &mut b, p, impulse * self.s_ay, impulse * self.s_by);
        }

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
        let (m_a, i_a) = (a.inv_mass, a.inv_rot_i);
        let (m_b, i_b) = (b.inv_mass, b.inv_rot_i);

        let r_a = lever_arm(&a, self.local_anchor_a);
        let r_b = lever_arm(&b, self.local_anchor_b);
        let d = b.position.linear + r_b - a.position.linear - r_a;

        let ay = Rot::from_angle(a.position.angular).rotate(self.local_y_axis);
        let s_ay = (d + r_a).perp_dot(ay);
        let s_by = r_b.perp_dot(ay);

        let c = d.dot(ay);
        let k = m_a + m_b + i_a * s_ay * s_ay + i_b * s_by * s_by;
        let impulse = if k != 0.0 { -c / k } else { 0.0 };

        let p = impulse * ay;
        a.position.linear -= m_a * p;
        a.position.angular -= i_a * impulse * s_ay;
        b.position.linear += m_b * p;
        b.position.angular += i_b * impulse * s_by;

        bodies.set(Some(self.body_a), a);
        bodies.set(Some(self.body_b), b);

        c.abs() <= conf.linear_slop
    }
}

#[cfg(test)]
mod tests {
    use glam::vec2;
    use sprig_core::{Position, Velocity};

    use super::*;

    #[test]
    fn motor_spins_wheel() {
        let mut bodies = BodyConstraints::default();
        bodies.reset(2);
        bodies.insert(BodyId::from_index(0), BodyConstraint::default());
        bodies.insert(
            BodyId::from_index(1),
            BodyConstraint {
                position: Position::new(vec2(0.0, -1.0), 0.0),
                velocity: Velocity::new(vec2(0.0, 0.5), 0.0),
                inv_mass: 1.0,
                inv_rot_i: 2.0,
                ..Default::default()
            },
        );

        let mut joint = WheelJoint::new(
            &WheelJointConf::new(BodyId::from_index(0), BodyId::from_index(1))
                .with_local_axis(Vec2::Y)
                .with_spring(0.0, 0.0)
                .with_motor(-3.0, 100.0),
        );
        // The wheel hangs one unit below the axle anchor
        joint.local_anchor_a = vec2(0.0, -1.0);

        let conf = ConstraintSolverConf {
            resolution_rate: 0.2,
            linear_slop: 0.005,
            angular_slop: 0.035,
            max_linear_correction: 0.2,
            max_angular_correction: 0.14,
        };

        let step = TimeStep::new(1.0 / 60.0, 1.0, false);
        joint.init_velocity(&mut bodies, &step, &conf);
        joint.solve_velocity(&mut bodies, &step);

        let b = bodies.get(Some(BodyId::from_index(1)));
        assert!((b.velocity.angular + 3.0).abs() < 1e-5);
        // Without a spring, motion along the suspension axis is free
        assert!(b.velocity.linear.abs_diff_eq(vec2(0.0, 0.5), 1e-5));
        assert!(joint.solve_position(&mut bodies, &conf));
    }
}
