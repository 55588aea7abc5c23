use glam::Vec2;
use sprig_core::{BodyId, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    solver::{BodyConstraints, ConstraintSolverConf, TimeStep},
    World,
};

use super::{anchor_velocity, apply_point_impulse, lever_arm, soft_constraint};

/// Keeps two anchor points at a fixed distance, optionally as a damped spring
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DistanceJointConf {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub collide_connected: bool,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    pub length: f32,
    /// Spring frequency in Hz. Zero makes the joint rigid.
    pub frequency: f32,
    pub damping_ratio: f32,
}

impl DistanceJointConf {
    pub fn new(body_a: BodyId, body_b: BodyId) -> Self {
        Self {
            body_a,
            body_b,
            collide_connected: false,
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            length: 1.0,
            frequency: 0.0,
            damping_ratio: 0.0,
        }
    }

    /// Connects the world points `anchor_a` and `anchor_b`, keeping their current distance
    pub fn at(
        world: &World,
        body_a: BodyId,
        body_b: BodyId,
        anchor_a: Vec2,
        anchor_b: Vec2,
    ) -> Result<Self> {
        let a = world.body(body_a)?;
        let b = world.body(body_b)?;

        Ok(Self {
            local_anchor_a: a.local_point(anchor_a),
            local_anchor_b: b.local_point(anchor_b),
            length: anchor_a.distance(anchor_b),
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

    pub fn with_length(mut self, length: f32) -> Self {
        self.length = length;
        self
    }

    pub fn with_spring(mut self, frequency: f32, damping_ratio: f32) -> Self {
        self.frequency = frequency;
        self.damping_ratio = damping_ratio;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistanceJoint {
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    pub(crate) collide_connected: bool,
    pub(crate) local_anchor_a: Vec2,
    pub(crate) local_anchor_b: Vec2,
    length: f32,
    frequency: f32,
    damping_ratio: f32,

    impulse: f32,
    gamma: f32,
    bias: f32,
    mass: f32,
    u: Vec2,
    r_a: Vec2,
    r_b: Vec2,
}

impl DistanceJoint {
    pub(crate) fn new(conf: &DistanceJointConf) -> Self {
        Self {
            body_a: conf.body_a,
            body_b: conf.body_b,
            collide_connected: conf.collide_connected,
            local_anchor_a: conf.local_anchor_a,
            local_anchor_b: conf.local_anchor_b,
            length: conf.length,
            frequency: conf.frequency,
            damping_ratio: conf.damping_ratio,
            impulse: 0.0,
            gamma: 0.0,
            bias: 0.0,
            mass: 0.0,
            u: Vec2::ZERO,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
        }
    }

    pub fn length(&self) -> f32 {
        self.length
    }

    pub fn set_length(&mut self, length: f32) {
        self.length = length;
    }

    pub(crate) fn linear_reaction(&self) -> Vec2 {
        self.impulse * self.u
    }

    pub(crate) fn angular_reaction(&self) -> f32 {
        0.0
    }

    pub(crate) fn init_velocity(
        &mut self,
        bodies: &mut BodyConstraints,
        step: &TimeStep,
        conf: &ConstraintSolverConf,
    ) {
        let mut a = bodies.get(Some(self.body_a));
        let mut b = bodies.get(Some(self.body_b));

        self.r_a = lever_arm(&a, self.local_anchor_a);
        self.r_b = lever_arm(&b, self.local_anchor_b);

        let u = b.position.linear + self.r_b - a.position.linear - self.r_a;
        let length = u.length();
        self.u = if length > conf.linear_slop {
            u / length
        } else {
            Vec2::ZERO
        };

        let cr_a = self.r_a.perp_dot(self.u);
        let cr_b = self.r_b.perp_dot(self.u);
        let mut inv_mass =
            a.inv_mass + a.inv_rot_i * cr_a * cr_a + b.inv_mass + b.inv_rot_i * cr_b * cr_b;
        self.mass = if inv_mass != 0.0 { 1.0 / inv_mass } else { 0.0 };

        if self.frequency > 0.0 {
            let (gamma, bias_factor) =
                soft_constraint(self.mass, self.frequency, self.damping_ratio, step.dt);
            self.gamma = gamma;
            self.bias = (length - self.length) * bias_factor;

            inv_mass += gamma;
            self.mass = if inv_mass != 0.0 { 1.0 / inv_mass } else { 0.0 };
        } else {
            self.gamma = 0.0;
            self.bias = 0.0;
        }

        if step.warm_start {
            self.impulse *= step.dt_ratio;
            let p = self.impulse * self.u;
            apply_point_impulse(&mut a, self.r_a, &mut b, self.r_b, p, 0.0);
        } else {
            self.impulse = 0.0;
        }

        bodies.set(Some(self.body_a), a);
        bodies.set(Some(self.body_b), b);
    }

    pub(crate) fn solve_velocity(&mut self, bodies: &mut BodyConstraints, _: &TimeStep) -> bool {
        let mut a = bodies.get(Some(self.body_a));
        let mut b = bodies.get(Some(self.body_b));

        let cdot = self.u.dot(anchor_velocity(&a, self.r_a, &b, self.r_b));
        let impulse = -self.mass * (cdot + self.bias + self.gamma * self.impulse);
        self.impulse += impulse;

        apply_point_impulse(&mut a, self.r_a, &mut b, self.r_b, impulse * self.u, 0.0);

        bodies.set(Some(self.body_a), a);
        bodies.set(Some(self.body_b), b);

        impulse == 0.0
    }

    pub(crate) fn solve_position(
        &self,
        bodies: &mut BodyConstraints,
        conf: &ConstraintSolverConf,
    ) -> bool {
        // Springs are soft on purpose
        if self.frequency > 0.0 {
            return true;
        }

        let mut a = bodies.get(Some(self.body_a));
        let mut b = bodies.get(Some(self.body_b));

        let r_a = lever_arm(&a, self.local_anchor_a);
        let r_b = lever_arm(&b, self.local_anchor_b);
        let u = b.position.linear + r_b - a.position.linear - r_a;
        let length = u.length();
        let u = u.normalize_or_zero();

        let c = (length - self.length)
            .clamp(-conf.max_linear_correction, conf.max_linear_correction);

        let p = -self.mass * c * u;

        a.position.linear -= a.inv_mass * p;
        a.position.angular -= a.inv_rot_i * r_a.perp_dot(p);
        b.position.linear += b.inv_mass * p;
        b.position.angular += b.inv_rot_i * r_b.perp_dot(p);

        bodies.set(Some(self.body_a), a);
        bodies.set(Some(self.body_b), b);

        c.abs() < conf.linear_slop
    }
}

#[cfg(test)]
mod tests {
    use glam::vec2;
    use sprig_core::{Position, Velocity};

    use crate::solver::BodyConstraint;

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

    fn setup(offset: Vec2, velocity: Vec2) -> BodyConstraints {
        let mut bodies = BodyConstraints::default();
        bodies.reset(2);
        bodies.insert(BodyId::from_index(0), BodyConstraint::default());
        bodies.insert(
            BodyId::from_index(1),
            BodyConstraint {
                position: Position::new(offset, 0.0),
                velocity: Velocity::new(velocity, 0.0),
                inv_mass: 1.0,
                inv_rot_i: 1.0,
                ..Default::default()
            },
        );
        bodies
    }

    #[test]
    fn rigid_removes_stretching() {
        let mut bodies = setup(vec2(2.0, 0.0), vec2(1.0, 1.0));
        let mut joint = DistanceJoint::new(
            &DistanceJointConf::new(BodyId::from_index(0), BodyId::from_index(1)).with_length(2.0),
        );

        let step = TimeStep::new(1.0 / 60.0, 1.0, true);
        joint.init_velocity(&mut bodies, &step, &conf());
        joint.solve_velocity(&mut bodies, &step);

        let b = bodies.get(Some(BodyId::from_index(1)));
        assert!(b.velocity.linear.abs_diff_eq(vec2(0.0, 1.0), 1e-6));
        assert!(joint.linear_reaction().abs_diff_eq(vec2(-1.0, 0.0), 1e-6));
    }

    #[test]
    fn position_restores_length() {
        let mut bodies = setup(vec2(2.1, 0.0), Vec2::ZERO);
        let mut joint = DistanceJoint::new(
            &DistanceJointConf::new(BodyId::from_index(0), BodyId::from_index(1)).with_length(2.0),
        );

        let step = TimeStep::new(1.0 / 60.0, 1.0, true);
        joint.init_velocity(&mut bodies, &step, &conf());

        assert!(!joint.solve_position(&mut bodies, &conf()));
        assert!(joint.solve_position(&mut bodies, &conf()));

        let b = bodies.get(Some(BodyId::from_index(1)));
        assert!((b.position.linear.x - 2.0).abs() < 1e-5);
    }

    #[test]
    fn springs_skip_position() {
        let mut bodies = setup(vec2(3.0, 0.0), Vec2::ZERO);
        let joint = DistanceJoint::new(
            &DistanceJointConf::new(BodyId::from_index(0), BodyId::from_index(1))
                .with_length(2.0)
                .with_spring(4.0, 0.5),
        );

        assert!(joint.solve_position(&mut bodies, &conf()));
        assert_eq!(
            bodies.get(Some(BodyId::from_index(1))).position.linear,
            vec2(3.0, 0.0)
        );
    }
}
