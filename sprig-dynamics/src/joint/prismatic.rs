use glam::{vec2, vec3, Mat2, Mat3, Vec2};
use sprig_core::{
    math::{cross_sv, solve22, solve33},
    BodyId, Result, Rot,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    solver::{BodyConstraint, BodyConstraints, ConstraintSolverConf, TimeStep},
    World,
};

use super::lever_arm;

/// Lets body B slide along an axis fixed in body A, without relative rotation
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PrismaticJointConf {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub collide_connected: bool,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    /// Unit axis of translation in the frame of body A
    pub local_axis_a: Vec2,
    pub reference_angle: f32,
    pub enable_limit: bool,
    pub lower_translation: f32,
    pub upper_translation: f32,
    pub enable_motor: bool,
    pub motor_speed: f32,
    pub max_motor_force: f32,
}

impl PrismaticJointConf {
    pub fn new(body_a: BodyId, body_b: BodyId) -> Self {
        Self {
            body_a,
            body_b,
            collide_connected: false,
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            local_axis_a: Vec2::X,
            reference_angle: 0.0,
            enable_limit: false,
            lower_translation: 0.0,
            upper_translation: 0.0,
            enable_motor: false,
            motor_speed: 0.0,
            max_motor_force: 0.0,
        }
    }

    /// Joins the bodies at the world point `anchor`, sliding along the world direction `axis`
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

    pub fn with_local_axis(mut self, local_axis_a: Vec2) -> Self {
        self.local_axis_a = local_axis_a.normalize_or_zero();
        self
    }

    pub fn with_reference_angle(mut self, reference_angle: f32) -> Self {
        self.reference_angle = reference_angle;
        self
    }

    pub fn with_limits(mut self, lower_translation: f32, upper_translation: f32) -> Self {
        self.enable_limit = true;
        self.lower_translation = lower_translation.min(upper_translation);
        self.upper_translation = upper_translation.max(lower_translation);
        self
    }

    pub fn with_motor(mut self, motor_speed: f32, max_motor_force: f32) -> Self {
        self.enable_motor = true;
        self.motor_speed = motor_speed;
        self.max_motor_force = max_motor_force;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrismaticJoint {
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    pub(crate) collide_connected: bool,
    pub(crate) local_anchor_a: Vec2,
    pub(crate) local_anchor_b: Vec2,
    pub(crate) local_axis_a: Vec2,
    local_perp_a: Vec2,
    pub(crate) reference_angle: f32,
    enable_limit: bool,
    lower_translation: f32,
    upper_translation: f32,
    enable_motor: bool,
    motor_speed: f32,
    max_motor_force: f32,

    /// Perpendicular and angular impulse
    impulse: Vec2,
    motor_impulse: f32,
    lower_impulse: f32,
    upper_impulse: f32,

    axis: Vec2,
    perp: Vec2,
    s1: f32,
    s2: f32,
    a1: f32,
    a2: f32,
    k: Mat2,
    translation: f32,
    axial_mass: f32,
}

/// Jacobian terms of the axis and its perpendicular at the current positions
struct Frame {
    d: Vec2,
    axis: Vec2,
    perp: Vec2,
    a1: f32,
    a2: f32,
    s1: f32,
    s2: f32,
}

impl PrismaticJoint {
    pub(crate) fn new(conf: &PrismaticJointConf) -> Self {
        Self {
            body_a: conf.body_a,
            body_b: conf.body_b,
            collide_connected: conf.collide_connected,
            local_anchor_a: conf.local_anchor_a,
            local_anchor_b: conf.local_anchor_b,
            local_axis_a: conf.local_axis_a,
            local_perp_a: cross_sv(1.0, conf.local_axis_a),
            reference_angle: conf.reference_angle,
            enable_limit: conf.enable_limit,
            lower_translation: conf.lower_translation,
            upper_translation: conf.upper_translation,
            enable_motor: conf.enable_motor,
            motor_speed: conf.motor_speed,
            max_motor_force: conf.max_motor_force,
            impulse: Vec2::ZERO,
            motor_impulse: 0.0,
            lower_impulse: 0.0,
            upper_impulse: 0.0,
            axis: Vec2::ZERO,
            perp: Vec2::ZERO,
            s1: 0.0,
            s2: 0.0,
            a1: 0.0,
            a2: 0.0,
            k: Mat2::ZERO,
            translation: 0.0,
            axial_mass: 0.0,
        }
    }

    pub fn limits(&self) -> (f32, f32) {
        (self.lower_translation, self.upper_translation)
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
        self.impulse.x * self.perp
            + (self.motor_impulse + self.lower_impulse - self.upper_impulse) * self.axis
    }

    pub(crate) fn angular_reaction(&self) -> f32 {
        self.impulse.y
    }

    fn frame(&self, a: &BodyConstraint, b: &BodyConstraint) -> Frame {
        let r_a = lever_arm(a, self.local_anchor_a);
        let r_b = lever_arm(b, self.local_anchor_b);
        let d = b.position.linear - a.position.linear + r_b - r_a;

        let q_a = Rot::from_angle(a.position.angular);
        let axis = q_a.rotate(self.local_axis_a);
        let perp = q_a.rotate(self.local_perp_a);

        Frame {
            d,
            axis,
            perp,
            a1: (d + r_a).perp_dot(axis),
            a2: r_b.perp_dot(axis),
            s1: (d + r_a).perp_dot(perp),
            s2: r_b.perp_dot(perp),
        }
    }

    /// Applies an impulse along the axis and perpendicular, plus an angular impulse
    fn apply(&self, a: &mut BodyConstraint, b: &mut BodyConstraint, perp: f32, angular: f32, axial: f32) {
        let p = perp * self.perp + axial * self.axis;
        let l_a = perp * self.s1 + angular + axial * self.a1;
        let l_b = perp * self.s2 + angular + axial * self.a2;

        a.velocity.linear -= a.inv_mass * p;
        a.velocity.angular -= a.inv_rot_i * l_a;
        b.velocity.linear += b.inv_mass * p;
        b.velocity.angular += b.inv_rot_i * l_b;
    }

    fn axial_velocity(&self, a: &BodyConstraint, b: &BodyConstraint) -> f32 {
        self.axis.dot(b.velocity.linear - a.velocity.linear) + self.a2 * b.velocity.angular
            - self.a1 * a.velocity.angular
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

        let frame = self.frame(&a, &b);
        self.axis = frame.axis;
        self.perp = frame.perp;
        self.a1 = frame.a1;
        self.a2 = frame.a2;
        self.s1 = frame.s1;
        self.s2 = frame.s2;

        let inv_axial = m_a + m_b + i_a * self.a1 * self.a1 + i_b * self.a2 * self.a2;
        self.axial_mass = if inv_axial > 0.0 { 1.0 / inv_axial } else { 0.0 };

        let k11 = m_a + m_b + i_a * self.s1 * self.s1 + i_b * self.s2 * self.s2;
        let k12 = i_a * self.s1 + i_b * self.s2;
        let k22 = match i_a + i_b {
            // Neither body rotates
            v if v == 0.0 => 1.0,
            v => v,
        };
        self.k = Mat2::from_cols(vec2(k11, k12), vec2(k12, k22));

        self.translation = self.axis.dot(frame.d);

        if !self.enable_limit {
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
        }

        if !self.enable_motor {
            self.motor_impulse = 0.0;
        }

        if step.warm_start {
            self.impulse *= step.dt_ratio;
            self.motor_impulse *= step.dt_ratio;
            self.lower_impulse *= step.dt_ratio;
            self.upper_impulse *= step.dt_ratio;

            let axial = self.motor_impulse + self.lower_impulse - self.upper_impulse;
            self.apply(&mut a, &mut b, self.impulse.x, self.impulse.y, axial);
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

        let mut unchanged = true;

        if self.enable_motor {
            let cdot = self.axial_velocity(&a, &b);
            let max_impulse = step.dt * self.max_motor_force;

            let old = self.motor_impulse;
            self.motor_impulse = (old + self.axial_mass * (self.motor_speed - cdot))
                .clamp(-max_impulse, max_impulse);
            let impulse = self.motor_impulse - old;
            unchanged &= impulse == 0.0;

            self.apply(&mut a, &mut b, 0.0, 0.0, impulse);
        }

        if self.enable_limit {
            {
                let c = self.translation - self.lower_translation;
                let cdot = self.axial_velocity(&a, &b);
                let impulse = -self.axial_mass * (cdot + c.max(0.0) * step.inv_dt);

                let old = self.lower_impulse;
                self.lower_impulse = (old + impulse).max(0.0);
                let impulse = self.lower_impulse - old;
                unchanged &= impulse == 0.0;

                self.apply(&mut a, &mut b, 0.0, 0.0, impulse);
            }

            {
                let c = self.upper_translation - self.translation;
                let cdot = -self.axial_velocity(&a, &b);
                let impulse = -self.axial_mass * (cdot + c.max(0.0) * step.inv_dt);

                let old = self.upper_impulse;
                self.upper_impulse = (old + impulse).max(0.0);
                let impulse = self.upper_impulse - old;
                unchanged &= impulse == 0.0;

                self.apply(&mut a, &mut b, 0.0, 0.0, -impulse);
            }
        }

        let cdot = vec2(
            self.perp.dot(b.velocity.linear - a.velocity.linear) + self.s2 * b.velocity.angular
                - self.s1 * a.velocity.angular,
            b.velocity.angular - a.velocity.angular,
        );

        let df = solve22(self.k, -cdot);
        self.impulse += df;
        unchanged &= df == Vec2::ZERO;

        self.apply(&mut a, &mut b, df.x, df.y, 0.0);

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

        let Frame {
            d,
            axis,
            perp,
            a1,
            a2,
            s1,
            s2,
        } = self.frame(&a, &b);

        let c1 = vec2(
            perp.dot(d),
            b.position.angular - a.position.angular - self.reference_angle,
        );

        let mut linear_error = c1.x.abs();
        let angular_error = c1.y.abs();

        let mut limit = None;
        if self.enable_limit {
            let translation = axis.dot(d);
            let slop = conf.linear_slop;

            if (self.upper_translation - self.lower_translation).abs() < 2.0 * slop {
                linear_error = linear_error.max(translation.abs());
                limit = Some(translation);
            } else if translation <= self.lower_translation {
                linear_error = linear_error.max(self.lower_translation - translation);
                limit = Some((translation - self.lower_translation).min(0.0));
            } else if translation >= self.upper_translation {
                linear_error = linear_error.max(translation - self.upper_translation);
                limit = Some((translation - self.upper_translation).max(0.0));
            }
        }

        let k11 = m_a + m_b + i_a * s1 * s1 + i_b * s2 * s2;
        let k12 = i_a * s1 + i_b * s2;
        let k22 = match i_a + i_b {
            v if v == 0.0 => 1.0,
            v => v,
        };

        let impulse = match limit {
            Some(c2) => {
                let k13 = i_a * s1 * a1 + i_b * s2 * a2;
                let k23 = i_a * a1 + i_b * a2;
                let k33 = m_a + m_b + i_a * a1 * a1 + i_b * a2 * a2;

                let k = Mat3::from_cols(
                    vec3(k11, k12, k13),
                    vec3(k12, k22, k23),
                    vec3(k13, k23, k33),
                );

                solve33(k, -vec3(c1.x, c1.y, c2))
            }
            None => {
                let k = Mat2::from_cols(vec2(k11, k12), vec2(k12, k22));
                solve22(k, -c1).extend(0.0)
            }
        };

        let p = impulse.x * perp + impulse.z * axis;
        let l_a = impulse.x * s1 + impulse.y + impulse.z * a1;
        let l_b = impulse.x * s2 + impulse.y + impulse.z * a2;

        a.position.linear -= m_a * p;
        a.position.angular -= i_a * l_a;
        b.position.linear += m_b * p;
        b.position.angular += i_b * l_b;

        bodies.set(Some(self.body_a), a);
        bodies.set(Some(self.body_b), b);

        linear_error <= conf.linear_slop && angular_error <= conf.angular_slop
    }
}

#[cfg(test)]
mod tests {
    use sprig_core::Position;

    use super::*;

    fn setup(offset: Vec2) -> BodyConstraints {
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
    fn keeps_axis_motion() {
        let mut bodies = setup(Vec2::ZERO);
        bodies.set(
            Some(BodyId::from_index(1)),
            BodyConstraint {
                velocity: sprig_core::Velocity::new(vec2(2.0, 3.0), 0.0),
                inv_mass: 1.0,
                inv_rot_i: 1.0,
                ..Default::default()
            },
        );

        let mut joint =
            PrismaticJoint::new(&PrismaticJointConf::new(BodyId::from_index(0), BodyId::from_index(1)));

        let step = TimeStep::new(1.0 / 60.0, 1.0, false);
        joint.init_velocity(&mut bodies, &step, &conf());
        joint.solve_velocity(&mut bodies, &step);

        let b = bodies.get(Some(BodyId::from_index(1)));
        assert!(b.velocity.linear.abs_diff_eq(vec2(2.0, 0.0), 1e-5), "{:?}", b.velocity);
    }

    #[test]
    fn limit_pushes_back() {
        let mut bodies = setup(vec2(1.5, 0.0));
        let joint = PrismaticJoint::new(
            &PrismaticJointConf::new(BodyId::from_index(0), BodyId::from_index(1))
                .with_limits(-1.0, 1.0),
        );

        joint.solve_position(&mut bodies, &conf());
        let b = bodies.get(Some(BodyId::from_index(1)));
        assert!((b.position.linear.x - 1.0).abs() < 1e-4, "{:?}", b.position);
        assert!(joint.solve_position(&mut bodies, &conf()));
    }
}
