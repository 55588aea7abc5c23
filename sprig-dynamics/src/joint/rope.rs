use glam::Vec2;
use sprig_core::{BodyId, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    solver::{BodyConstraints, ConstraintSolverConf, TimeStep},
    World,
};

use super::{anchor_velocity, apply_point_impulse, lever_arm};

/// Limits the distance between two anchors to a maximum, leaving them free when closer
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RopeJointConf {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub collide_connected: bool,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    pub max_length: f32,
}

impl RopeJointConf {
    pub fn new(body_a: BodyId, body_b: BodyId) -> Self {
        Self {
            body_a,
            body_b,
            collide_connected: false,
            local_anchor_a: Vec2::new(-1.0, 0.0),
            local_anchor_b: Vec2::new(1.0, 0.0),
            max_length: 0.0,
        }
    }

    /// Ties the world points `anchor_a` and `anchor_b` with a rope of their current distance
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
            max_length: anchor_a.distance(anchor_b),
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

    pub fn with_max_length(mut self, max_length: f32) -> Self {
        self.max_length = max_length;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RopeJoint {
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    pub(crate) collide_connected: bool,
    pub(crate) local_anchor_a: Vec2,
    pub(crate) local_anchor_b: Vec2,
    max_length: f32,

    impulse: f32,
    length: f32,
    mass: f32,
    u: Vec2,
    r_a: Vec2,
    r_b: Vec2,
}

impl RopeJoint {
    pub(crate) fn new(conf: &RopeJointConf) -> Self {
        Self {
            body_a: conf.body_a,
            body_b: conf.body_b,
            collide_connected: conf.collide_connected,
            local_anchor_a: conf.local_anchor_a,
            local_anchor_b: conf.local_anchor_b,
            max_length: conf.max_length,
            impulse: 0.0,
            length: 0.0,
            mass: 0.0,
            u: Vec2::ZERO,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
        }
    }

    pub fn max_length(&self) -> f32 {
        self.max_length
    }

    pub fn set_max_length(&mut self, max_length: f32) {
        self.max_length = max_length;
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
        self.length = u.length();

        if self.length <= conf.linear_slop {
            self.u = Vec2::ZERO;
            self.mass = 0.0;
            self.impulse = 0.0;
            return;
        }

        self.u = u / self.length;

        let cr_a = self.r_a.perp_dot(self.u);
        let cr_b = self.r_b.perp_dot(self.u);
        let inv_mass =
            a.inv_mass + a.inv_rot_i * cr_a * cr_a + b.inv_mass + b.inv_rot_i * cr_b * cr_b;
        self.mass = if inv_mass != 0.0 { 1.0 / inv_mass } else { 0.0 };

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

    pub(crate) fn solve_velocity(&mut self, bodies: &mut BodyConstraints, step: &TimeStep) -> bool {
        let mut a = bodies.get(Some(self.body_a));
        let mut b = bodies.get(Some(self.body_b));

        let c = self.length - self.max_length;
        let mut cdot = self.u.dot(anchor_velocity(&a, self.r_a, &b, self.r_b));

        // Predictive constraint while slack
        if c < 0.0 {
            cdot += step.inv_dt * c;
        }

        let old = self.impulse;
        self.impulse = (old - self.mass * cdot).min(0.0);
        let impulse = self.impulse - old;

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
        let mut a = bodies.get(Some(self.body_a));
        let mut b = bodies.get(Some(self.body_b));

        let r_a = lever_arm(&a, self.local_anchor_a);
        let r_b = lever_arm(&b, self.local_anchor_b);
        let u = b.position.linear + r_b - a.position.linear - r_a;
        let length = u.length();
        let u = u.normalize_or_zero();

        let c = (length - self.max_length).clamp(0.0, conf.max_linear_correction);
        let p = -self.mass * c * u;

        a.position.linear -= a.inv_mass * p;
        a.position.angular -= a.inv_rot_i * r_a.perp_dot(p);
        b.position.linear += b.inv_mass * p;
        b.position.angular += b.inv_rot_i * r_b.perp_dot(p);

        bodies.set(Some(self.body_a), a);
        bodies.set(Some(self.body_b), b);

        length - self.max_length < conf.linear_slop
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

    fn setup(x: f32, vx: f32) -> BodyConstraints {
        let mut bodies = BodyConstraints::default();
        bodies.reset(2);
        bodies.insert(BodyId::from_index(0), BodyConstraint::default());
        bodies.insert(
            BodyId::from_index(1),
            BodyConstraint {
                position: Position::new(vec2(x, 0.0), 0.0),
                velocity: Velocity::new(vec2(vx, 0.0), 0.0),
                inv_mass: 1.0,
                inv_rot_i: 1.0,
                ..Default::default()
            },
        );
        bodies
    }

    fn rope() -> RopeJoint {
        RopeJoint::new(
            &RopeJointConf::new(BodyId::from_index(0), BodyId::from_index(1))
                .with_local_anchors(Vec2::ZERO, Vec2::ZERO)
                .with_max_length(2.0),
        )
    }

    #[test]
    fn slack_rope_is_free() {
        let mut bodies = setup(1.0, 1.0);
        let mut joint = rope();

        let step = TimeStep::new(0.1, 1.0, false);
        joint.init_velocity(&mut bodies, &step, &conf());
        assert!(joint.solve_velocity(&mut bodies, &step));

        assert_eq!(bodies.get(Some(BodyId::from_index(1))).velocity.linear, vec2(1.0, 0.0));
    }

    #[test]
    fn taut_rope_stops_separation() {
        let mut bodies = setup(2.0, 1.0);
        let mut joint = rope();

        let step = TimeStep::new(0.1, 1.0, false);
        joint.init_velocity(&mut bodies, &step, &conf());
        joint.solve_velocity(&mut bodies, &step);

        let b = bodies.get(Some(BodyId::from_index(1)));
        assert!(b.velocity.linear.x.abs() < 1e-6);
        assert!(joint.linear_reaction().x < 0.0);
    }

    #[test]
    fn position_pulls_in() {
        let mut bodies = setup(2.1, 0.0);
        let mut joint = rope();

        let step = TimeStep::new(0.1, 1.0, false);
        joint.init_velocity(&mut bodies, &step, &conf());

        assert!(!joint.solve_position(&mut bodies, &conf()));
        assert!(joint.solve_position(&mut bodies, &conf()));
    }
}
