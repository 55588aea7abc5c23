use glam::Vec2;
use sprig_core::{math::cross_sv, BodyId, Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    solver::{BodyConstraint, BodyConstraints, ConstraintSolverConf, TimeStep},
    World,
};

use super::lever_arm;

/// Hangs two bodies from fixed ground points on a rope of constant total length:
/// `length_a + ratio * length_b` stays constant.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PulleyJointConf {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub collide_connected: bool,
    /// World point the rope of body A hangs from
    pub ground_anchor_a: Vec2,
    pub ground_anchor_b: Vec2,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    pub length_a: f32,
    pub length_b: f32,
    pub ratio: f32,
}

impl PulleyJointConf {
    pub fn new(body_a: BodyId, body_b: BodyId) -> Self {
        Self {
            body_a,
            body_b,
            collide_connected: true,
            ground_anchor_a: Vec2::new(-1.0, 1.0),
            ground_anchor_b: Vec2::new(1.0, 1.0),
            local_anchor_a: Vec2::new(-1.0, 0.0),
            local_anchor_b: Vec2::new(1.0, 0.0),
            length_a: 0.0,
            length_b: 0.0,
            ratio: 1.0,
        }
    }

    /// Measures the rope lengths from the current placement of the world points
    #[allow(clippy::too_many_arguments)]
    pub fn at(
        world: &World,
        body_a: BodyId,
        body_b: BodyId,
        ground_anchor_a: Vec2,
        ground_anchor_b: Vec2,
        anchor_a: Vec2,
        anchor_b: Vec2,
        ratio: f32,
    ) -> Result<Self> {
        let a = world.body(body_a)?;
        let b = world.body(body_b)?;

        Ok(Self {
            ground_anchor_a,
            ground_anchor_b,
            local_anchor_a: a.local_point(anchor_a),
            local_anchor_b: b.local_point(anchor_b),
            length_a: anchor_a.distance(ground_anchor_a),
            length_b: anchor_b.distance(ground_anchor_b),
            ratio,
            ..Self::new(body_a, body_b)
        })
    }

    pub fn with_collide_connected(mut self, collide_connected: bool) -> Self {
        self.collide_connected = collide_connected;
        self
    }

    pub fn with_ratio(mut self, ratio: f32) -> Self {
        self.ratio = ratio;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PulleyJoint {
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    pub(crate) collide_connected: bool,
    pub(crate) ground_anchor_a: Vec2,
    pub(crate) ground_anchor_b: Vec2,
    pub(crate) local_anchor_a: Vec2,
    pub(crate) local_anchor_b: Vec2,
    length_a: f32,
    length_b: f32,
    ratio: f32,
    constant: f32,

    impulse: f32,
    u_a: Vec2,
    u_b: Vec2,
    r_a: Vec2,
    r_b: Vec2,
    mass: f32,
}

impl PulleyJoint {
    pub(crate) fn new(conf: &PulleyJointConf) -> Result<Self> {
        if !(conf.ratio > f32::EPSILON) {
            return Err(Error::invalid_argument(format!(
                "Pulley ratio must be positive, got {}",
                conf.ratio
            )));
        }

        Ok(Self {
            body_a: conf.body_a,
            body_b: conf.body_b,
            collide_connected: conf.collide_connected,
            ground_anchor_a: conf.ground_anchor_a,
            ground_anchor_b: conf.ground_anchor_b,
            local_anchor_a: conf.local_anchor_a,
            local_anchor_b: conf.local_anchor_b,
            length_a: conf.length_a,
            length_b: conf.length_b,
            ratio: conf.ratio,
            constant: conf.length_a + conf.ratio * conf.length_b,
            impulse: 0.0,
            u_a: Vec2::ZERO,
            u_b: Vec2::ZERO,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            mass: 0.0,
        })
    }

    pub fn ground_anchors(&self) -> (Vec2, Vec2) {
        (self.ground_anchor_a, self.ground_anchor_b)
    }

    pub fn lengths(&self) -> (f32, f32) {
        (self.length_a, self.length_b)
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    pub(crate) fn linear_reaction(&self) -> Vec2 {
        self.impulse * self.u_b
    }

    pub(crate) fn angular_reaction(&self) -> f32 {
        0.0
    }

    /// Rope directions and lengths at the given placement
    fn ropes(
        &self,
        a: &BodyConstraint,
        r_a: Vec2,
        b: &BodyConstraint,
        r_b: Vec2,
        linear_slop: f32,
    ) -> (Vec2, f32, Vec2, f32) {
        let u_a = a.position.linear + r_a - self.ground_anchor_a;
        let u_b = b.position.linear + r_b - self.ground_anchor_b;
        let (length_a, length_b) = (u_a.length(), u_b.length());

        let normalized = |u: Vec2, length: f32| {
            if length > 10.0 * linear_slop {
                u / length
            } else {
                Vec2::ZERO
            }
        };

        (
            normalized(u_a, length_a),
            length_a,
            normalized(u_b, length_b),
            length_b,
        )
    }

    fn effective_mass(
        &self,
        a: &BodyConstraint,
        r_a: Vec2,
        u_a: Vec2,
        b: &BodyConstraint,
        r_b: Vec2,
        u_b: Vec2,
    ) -> f32 {
        let ru_a = r_a.perp_dot(u_a);
        let ru_b = r_b.perp_dot(u_b);

        let m_a = a.inv_mass + a.inv_rot_i * ru_a * ru_a;
        let m_b = b.inv_mass + b.inv_rot_i * ru_b * ru_b;

        let mass = m_a + self.ratio * self.ratio * m_b;
        if mass > 0.0 {
            1.0 / mass
        } else {
            0.0
        }
    }

    fn apply(&self, a: &mut BodyConstraint, b: &mut BodyConstraint, impulse: f32) {
        let p_a = -impulse * self.u_a;
        let p_b = -self.ratio * impulse * self.u_b;

        a.velocity.linear += a.inv_mass * p_a;
        a.velocity.angular += a.inv_rot_i * self.r_a.perp_dot(p_a);
        b.velocity.linear += b.inv_mass * p_b;
        b.velocity.angular += b.inv_rot_i * self.r_b.perp_dot(p_b);
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

        let (u_a, _, u_b, _) = self.ropes(&a, self.r_a, &b, self.r_b, conf.linear_slop);
        self.u_a = u_a;
        self.u_b = u_b;
        self.mass = self.effective_mass(&a, self.r_a, u_a, &b, self.r_b, u_b);

        if step.warm_start {
            self.impulse *= step.dt_ratio;
            self.apply(&mut a, &mut b, self.impulse);
        } else {
            self.impulse = 0.0;
        }

        bodies.set(Some(self.body_a), a);
        bodies.set(Some(self.body_b), b);
    }

    pub(crate) fn solve_velocity(&mut self, bodies: &mut BodyConstraints, _: &TimeStep) -> bool {
        let mut a = bodies.get(Some(self.body_a));
        let mut b = bodies.get(Some(self.body_b));

        let vp_a = a.velocity.linear + cross_sv(a.velocity.angular, self.r_a);
        let vp_b = b.velocity.linear + cross_sv(b.velocity.angular, self.r_b);

        let cdot = -self.u_a.dot(vp_a) - self.ratio * self.u_b.dot(vp_b);
        let impulse = -self.mass * cdot;
        self.impulse += impulse;

        self.apply(&mut a, &mut b, impulse);

        bodies.set(Some(self.body_a), a);
        bodies.set(Some(self.body_b), b);

        impulse == 0.0
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
        let (u_a, length_a, u_b, length_b) = self.ropes(&a, r_a, &b, r_b, conf.linear_slop);
        let mass = self.effective_mass(&a, r_a, u_a, &b, r_b, u_b);

        let c = self.constant - length_a - self.ratio * length_b;
        let impulse = -mass * c;

        let p_a = -impulse * u_a;
        let p_b = -self.ratio * impulse * u_b;

        a.position.linear += a.inv_mass * p_a;
        a.position.angular += a.inv_rot_i * r_a.perp_dot(p_a);
        b.position.linear += b.inv_mass * p_b;
        b.position.angular += b.inv_rot_i * r_b.perp_dot(p_b);

        bodies.set(Some(self.body_a), a);
        bodies.set(Some(self.body_b), b);

        c.abs() < conf.linear_slop
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

    fn hanging(velocity_a: Vec2) -> BodyConstraints {
        let mut bodies = BodyConstraints::default();
        bodies.reset(2);
        bodies.insert(
            BodyId::from_index(0),
            BodyConstraint {
                position: Position::new(vec2(-1.0, 0.0), 0.0),
                velocity: Velocity::new(velocity_a, 0.0),
                inv_mass: 1.0,
                ..Default::default()
            },
        );
        bodies.insert(
            BodyId::from_index(1),
            BodyConstraint {
                position: Position::new(vec2(1.0, 0.0), 0.0),
                inv_mass: 1.0,
                ..Default::default()
            },
        );
        bodies
    }

    fn joint() -> PulleyJoint {
        let conf = PulleyJointConf {
            ground_anchor_a: vec2(-1.0, 2.0),
            ground_anchor_b: vec2(1.0, 2.0),
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            length_a: 2.0,
            length_b: 2.0,
            ..PulleyJointConf::new(BodyId::from_index(0), BodyId::from_index(1))
        };

        PulleyJoint::new(&conf).unwrap()
    }

    #[test]
    fn lowering_one_raises_other() {
        let mut bodies = hanging(vec2(0.0, -2.0));
        let mut joint = joint();

        let step = TimeStep::new(1.0 / 60.0, 1.0, false);
        joint.init_velocity(&mut bodies, &step, &conf());
        joint.solve_velocity(&mut bodies, &step);

        let a = bodies.get(Some(BodyId::from_index(0)));
        let b = bodies.get(Some(BodyId::from_index(1)));
        assert!(a.velocity.linear.abs_diff_eq(vec2(0.0, -1.0), 1e-6));
        assert!(b.velocity.linear.abs_diff_eq(vec2(0.0, 1.0), 1e-6));
    }

    #[test]
    fn rejects_zero_ratio() {
        let conf = PulleyJointConf::new(BodyId::from_index(0), BodyId::from_index(1)).with_ratio(0.0);
        assert!(matches!(PulleyJoint::new(&conf), Err(Error::InvalidArgument(_))));
    }
}
