use glam::{vec3, Mat3, Vec2, Vec3};
use sprig_core::{
    math::{inverse33_22, mul33_22, solve33, solve33_22, sym_inverse33},
    BodyId, Result,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    solver::{BodyConstraint, BodyConstraints, ConstraintSolverConf, TimeStep},
    World,
};

use super::{anchor_velocity, apply_point_impulse, lever_arm, soft_constraint};

/// Glues two bodies together, optionally with a soft angular spring
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WeldJointConf {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub collide_connected: bool,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    pub reference_angle: f32,
    /// Angular spring frequency in Hz. Zero makes the joint rigid.
    pub frequency: f32,
    pub damping_ratio: f32,
}

impl WeldJointConf {
    pub fn new(body_a: BodyId, body_b: BodyId) -> Self {
        Self {
            body_a,
            body_b,
            collide_connected: false,
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            reference_angle: 0.0,
            frequency: 0.0,
            damping_ratio: 0.0,
        }
    }

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

    pub fn with_spring(mut self, frequency: f32, damping_ratio: f32) -> Self {
        self.frequency = frequency;
        self.damping_ratio = damping_ratio;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeldJoint {
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    pub(crate) collide_connected: bool,
    pub(crate) local_anchor_a: Vec2,
    pub(crate) local_anchor_b: Vec2,
    reference_angle: f32,
    frequency: f32,
    damping_ratio: f32,

    /// Linear impulse in xy, angular in z
    impulse: Vec3,
    gamma: f32,
    bias: f32,
    mass: Mat3,
    r_a: Vec2,
    r_b: Vec2,
}

/// Effective mass matrix of a weld, before inversion
fn weld_mass(a: &BodyConstraint, r_a: Vec2, b: &BodyConstraint, r_b: Vec2) -> Mat3 {
    let (m_a, i_a) = (a.inv_mass, a.inv_rot_i);
    let (m_b, i_b) = (b.inv_mass, b.inv_rot_i);

    let ex = vec3(
        m_a + m_b + r_a.y * r_a.y * i_a + r_b.y * r_b.y * i_b,
        -r_a.y * r_a.x * i_a - r_b.y * r_b.x * i_b,
        -r_a.y * i_a - r_b.y * i_b,
    );
    let ey = vec3(
        ex.y,
        m_a + m_b + r_a.x * r_a.x * i_a + r_b.x * r_b.x * i_b,
        r_a.x * i_a + r_b.x * i_b,
    );
    let ez = vec3(ex.z, ey.z, i_a + i_b);

    Mat3::from_cols(ex, ey, ez)
}

impl WeldJoint {
    pub(crate) fn new(conf: &WeldJointConf) -> Self {
        Self {
            body_a: conf.body_a,
            body_b: conf.body_b,
            collide_connected: conf.collide_connected,
            local_anchor_a: conf.local_anchor_a,
            local_anchor_b: conf.local_anchor_b,
            reference_angle: conf.reference_angle,
            frequency: conf.frequency,
            damping_ratio: conf.damping_ratio,
            impulse: Vec3::ZERO,
            gamma: 0.0,
            bias: 0.0,
            mass: Mat3::ZERO,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
        }
    }

    pub fn reference_angle(&self) -> f32 {
        self.reference_angle
    }

    pub(crate) fn linear_reaction(&self) -> Vec2 {
        self.impulse.truncate()
    }

    pub(crate) fn angular_reaction(&self) -> f32 {
        self.impulse.z
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

        let k = weld_mass(&a, self.r_a, &b, self.r_b);

        self.gamma = 0.0;
        self.bias = 0.0;

        if self.frequency > 0.0 {
            self.mass = inverse33_22(k);

            let inv_m = a.inv_rot_i + b.inv_rot_i;
            let m = if inv_m > 0.0 { 1.0 / inv_m } else { 0.0 };

            let c = b.position.angular - a.position.angular - self.reference_angle;
            let (gamma, bias_factor) = soft_constraint(m, self.frequency, self.damping_ratio, step.dt);
            self.gamma = gamma;
            self.bias = c * bias_factor;

            let inv_m = inv_m + gamma;
            self.mass.z_axis.z = if inv_m != 0.0 { 1.0 / inv_m } else { 0.0 };
        } else if k.z_axis.z == 0.0 {
            self.mass = inverse33_22(k);
        } else {
            self.mass = sym_inverse33(k);
        }

        if step.warm_start {
            self.impulse *= step.dt_ratio;
            let (p, l) = (self.impulse.truncate(), self.impulse.z);
            apply_point_impulse(&mut a, self.r_a, &mut b, self.r_b, p, l);
        } else {
            self.impulse = Vec3::ZERO;
        }

        bodies.set(Some(self.body_a), a);
        bodies.set(Some(self.body_b), b);
    }

    pub(crate) fn solve_velocity(&mut self, bodies: &mut BodyConstraints, _: &TimeStep) -> bool {
        let mut a = bodies.get(Some(self.body_a));
        let mut b = bodies.get(Some(self.body_b));

        let unchanged;

        if self.frequency > 0.0 {
            let cdot2 = b.velocity.angular - a.velocity.angular;
            let impulse2 =
                -self.mass.z_axis.z * (cdot2 + self.bias + self.gamma * self.impulse.z);
            self.impulse.z += impulse2;

            a.velocity.angular -= a.inv_rot_i * impulse2;
            b.velocity.angular += b.inv_rot_i * impulse2;

            let cdot1 = anchor_velocity(&a, self.r_a, &b, self.r_b);
            let impulse1 = -mul33_22(self.mass, cdot1);
            self.impulse.x += impulse1.x;
            self.impulse.y += impulse1.y;

            apply_point_impulse(&mut a, self.r_a, &mut b, self.r_b, impulse1, 0.0);

            unchanged = impulse2 == 0.0 && impulse1 == Vec2::ZERO;
        } else {
            let cdot1 = anchor_velocity(&a, self.r_a, &b, self.r_b);
            let cdot2 = b.velocity.angular - a.velocity.angular;

            let impulse = -(self.mass * cdot1.extend(cdot2));
            self.impulse += impulse;

            apply_point_impulse(
                &mut a,
                self.r_a,
                &mut b,
                self.r_b,
                impulse.truncate(),
                impulse.z,
            );

            unchanged = impulse == Vec3::ZERO;
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

        let r_a = lever_arm(&a, self.local_anchor_a);
        let r_b = lever_arm(&b, self.local_anchor_b);
        let k = weld_mass(&a, r_a, &b, r_b);

        let c1 = b.position.linear + r_b - a.position.linear - r_a;
        let position_error = c1.length();

        let (impulse, angular_error) = if self.frequency > 0.0 {
            ((-solve33_22(k, c1)).extend(0.0), 0.0)
        } else {
            let c2 = b.position.angular - a.position.angular - self.reference_angle;

            let impulse = if k.z_axis.z > 0.0 {
                -solve33(k, c1.extend(c2))
            } else {
                (-solve33_22(k, c1)).extend(0.0)
            };

            (impulse, c2.abs())
        };

        let p = impulse.truncate();
        a.position.linear -= a.inv_mass * p;
        a.position.angular -= a.inv_rot_i * (r_a.perp_dot(p) + impulse.z);
        b.position.linear += b.inv_mass * p;
        b.position.angular += b.inv_rot_i * (r_b.perp_dot(p) + impulse.z);

        bodies.set(Some(self.body_a), a);
        bodies.set(Some(self.body_b), b);

        position_error <= conf.linear_slop && angular_error <= conf.angular_slop
    }
}

#[cfg(test)]
mod tests {
    use glam::vec2;
    use sprig_core::{Position, Velocity};

    use super::*;

    fn conf() -> ConstraintSolverConf {
        ConstraintSolverConf {
            resolution_rate: 0.2,
            linear_slop: 0.005,
            angular_slop: 0.035,
            max_linear_correction: 0.2,
            max_angular_correction: 0.14,
        }
    }

    fn setup(position: Position, velocity: Velocity) -> BodyConstraints {
        let mut bodies = BodyConstraints::default();
        bodies.reset(2);
        bodies.insert(BodyId::from_index(0), BodyConstraint::default());
        bodies.insert(
            BodyId::from_index(1),
            BodyConstraint {
                position,
                velocity,
                inv_mass: 1.0,
                inv_rot_i: 1.0,
                ..Default::default()
            },
        );
        bodies
    }

    #[test]
    fn rigid_weld_stops_motion() {
        let mut bodies = setup(Position::ZERO, Velocity::new(vec2(1.0, -2.0), 3.0));
        let mut joint =
            WeldJoint::new(&WeldJointConf::new(BodyId::from_index(0), BodyId::from_index(1)));

        let step = TimeStep::new(1.0 / 60.0, 1.0, false);
        joint.init_velocity(&mut bodies, &step, &conf());
        joint.solve_velocity(&mut bodies, &step);

        let b = bodies.get(Some(BodyId::from_index(1)));
        assert!(b.velocity.linear.abs_diff_eq(Vec2::ZERO, 1e-5));
        assert!(b.velocity.angular.abs() < 1e-5);
        assert!((joint.angular_reaction() + 3.0).abs() < 1e-5);
    }

    #[test]
    fn corrects_drift() {
        let mut bodies = setup(Position::new(vec2(0.05, 0.0), 0.02), Velocity::ZERO);
        let joint =
            WeldJoint::new(&WeldJointConf::new(BodyId::from_index(0), BodyId::from_index(1)));

        let solved = (0..10).any(|_| joint.solve_position(&mut bodies, &conf()));
        assert!(solved);
    }
}
