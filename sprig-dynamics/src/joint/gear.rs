use glam::Vec2;
use sprig_core::{Arena, BodyId, EntityKind, Error, JointId, Result, Rot};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    solver::{BodyConstraint, BodyConstraints, ConstraintSolverConf, TimeStep},
    Body,
};

use super::{lever_arm, Joint, JointKind};

/// Couples two revolute or prismatic joints so that
/// `coordinate1 + ratio * coordinate2` stays constant.
///
/// Body A and B are the second bodies of the two joints, their first bodies act as the grounds
/// the coordinates are measured against.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GearJointConf {
    pub joint1: JointId,
    pub joint2: JointId,
    pub ratio: f32,
    pub collide_connected: bool,
}

impl GearJointConf {
    pub fn new(joint1: JointId, joint2: JointId) -> Self {
        Self {
            joint1,
            joint2,
            ratio: 1.0,
            collide_connected: false,
        }
    }

    pub fn with_ratio(mut self, ratio: f32) -> Self {
        self.ratio = ratio;
        self
    }

    pub fn with_collide_connected(mut self, collide_connected: bool) -> Self {
        self.collide_connected = collide_connected;
        self
    }
}

/// One of the two coupled joints
#[derive(Debug, Clone, PartialEq)]
struct GearSide {
    kind: JointKind,
    local_anchor_body: Vec2,
    local_anchor_ground: Vec2,
    local_axis: Vec2,
    reference_angle: f32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Jacobian {
    linear: Vec2,
    angular_body: f32,
    angular_ground: f32,
    inv_mass: f32,
}

impl GearSide {
    /// Returns the side and its `(ground, body)` pair
    fn new(joint: &Joint) -> Result<(Self, BodyId, BodyId)> {
        let (side, ground, body) = match joint {
            Joint::Revolute(v) => (
                GearSide {
                    kind: JointKind::Revolute,
                    local_anchor_body: v.local_anchor_b,
                    local_anchor_ground: v.local_anchor_a,
                    local_axis: Vec2::ZERO,
                    reference_angle: v.reference_angle(),
                },
                v.body_a,
                v.body_b,
            ),
            Joint::Prismatic(v) => (
                GearSide {
                    kind: JointKind::Prismatic,
                    local_anchor_body: v.local_anchor_b,
                    local_anchor_ground: v.local_anchor_a,
                    local_axis: v.local_axis_a,
                    reference_angle: v.reference_angle,
                },
                v.body_a,
                v.body_b,
            ),
            v => {
                return Err(Error::invalid_argument(format!(
                    "Gear joints couple revolute or prismatic joints, not {:?}",
                    v.kind()
                )))
            }
        };

        Ok((side, ground, body))
    }

    fn coordinate(&self, body: &BodyConstraint, ground: &BodyConstraint) -> f32 {
        match self.kind {
            JointKind::Prismatic => {
                let r_body = lever_arm(body, self.local_anchor_body);
                let p_ground = self.local_anchor_ground - ground.local_center;
                let p_body = Rot::from_angle(ground.position.angular)
                    .inv_rotate(r_body + (body.position.linear - ground.position.linear));

                (p_body - p_ground).dot(self.local_axis)
            }
            _ => body.position.angular - ground.position.angular - self.reference_angle,
        }
    }

    fn jacobian(&self, body: &BodyConstraint, ground: &BodyConstraint, scale: f32) -> Jacobian {
        match self.kind {
            JointKind::Prismatic => {
                let u = Rot::from_angle(ground.position.angular).rotate(self.local_axis);
                let r_ground = lever_arm(ground, self.local_anchor_ground);
                let r_body = lever_arm(body, self.local_anchor_body);

                let angular_ground = scale * r_ground.perp_dot(u);
                let angular_body = scale * r_body.perp_dot(u);

                Jacobian {
                    linear: scale * u,
                    angular_body,
                    angular_ground,
                    inv_mass: scale * scale * (ground.inv_mass + body.inv_mass)
                        + ground.inv_rot_i * angular_ground * angular_ground
                        + body.inv_rot_i * angular_body * angular_body,
                }
            }
            _ => Jacobian {
                linear: Vec2::ZERO,
                angular_body: scale,
                angular_ground: scale,
                inv_mass: scale * scale * (body.inv_rot_i + ground.inv_rot_i),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GearJoint {
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    pub(crate) body_c: BodyId,
    pub(crate) body_d: BodyId,
    pub(crate) collide_connected: bool,
    joint1: JointId,
    joint2: JointId,
    side_a: GearSide,
    side_b: GearSide,
    ratio: f32,
    constant: f32,

    impulse: f32,
    jacobian_a: Jacobian,
    jacobian_b: Jacobian,
    mass: f32,
}

impl GearJoint {
    pub(crate) fn new(
        conf: &GearJointConf,
        joints: &Arena<JointId, Joint>,
        bodies: &Arena<BodyId, Body>,
    ) -> Result<Self> {
        let joint = |id: JointId| {
            joints.get(id).ok_or(Error::NotFound {
                kind: EntityKind::Joint,
                index: id.index(),
            })
        };

        let body = |id: BodyId| {
            bodies
                .get(id)
                .map(BodyConstraint::fixed)
                .ok_or(Error::NotFound {
                    kind: EntityKind::Body,
                    index: id.index(),
                })
        };

        let (side_a, body_c, body_a) = GearSide::new(joint(conf.joint1)?)?;
        let (side_b, body_d, body_b) = GearSide::new(joint(conf.joint2)?)?;

        let coordinate_a = side_a.coordinate(&body(body_a)?, &body(body_c)?);
        let coordinate_b = side_b.coordinate(&body(body_b)?, &body(body_d)?);

        Ok(Self {
            body_a,
            body_b,
            body_c,
            body_d,
            collide_connected: conf.collide_connected,
            joint1: conf.joint1,
            joint2: conf.joint2,
            side_a,
            side_b,
            ratio: conf.ratio,
            constant: coordinate_a + conf.ratio * coordinate_b,
            impulse: 0.0,
            jacobian_a: Jacobian::default(),
            jacobian_b: Jacobian::default(),
            mass: 0.0,
        })
    }

    pub fn joints(&self) -> (JointId, JointId) {
        (self.joint1, self.joint2)
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    pub(crate) fn local_anchor_a(&self) -> Vec2 {
        self.side_a.local_anchor_body
    }

    pub(crate) fn local_anchor_b(&self) -> Vec2 {
        self.side_b.local_anchor_body
    }

    pub(crate) fn linear_reaction(&self) -> Vec2 {
        self.impulse * self.jacobian_a.linear
    }

    pub(crate) fn angular_reaction(&self) -> f32 {
        self.impulse * self.jacobian_a.angular_body
    }

    fn load(&self, bodies: &BodyConstraints) -> [BodyConstraint; 4] {
        [self.body_a, self.body_b, self.body_c, self.body_d].map(|v| bodies.get(Some(v)))
    }

    /// Applies `impulse` along the jacobians, one body at a time so that shared grounds
    /// accumulate both contributions
    fn apply_velocity(&self, bodies: &mut BodyConstraints, impulse: f32) {
        let (ja, jb) = (self.jacobian_a, self.jacobian_b);
        let terms = [
            (self.body_a, ja.linear, ja.angular_body),
            (self.body_b, jb.linear, jb.angular_body),
            (self.body_c, -ja.linear, -ja.angular_ground),
            (self.body_d, -jb.linear, -jb.angular_ground),
        ];

        for (id, linear, angular) in terms {
            let mut bc = bodies.get(Some(id));
            bc.velocity.linear += bc.inv_mass * impulse * linear;
            bc.velocity.angular += bc.inv_rot_i * impulse * angular;
            bodies.set(Some(id), bc);
        }
    }

    pub(crate) fn init_velocity(
        &mut self,
        bodies: &mut BodyConstraints,
        step: &TimeStep,
        _: &ConstraintSolverConf,
    ) {
        let [a, b, c, d] = self.load(bodies);

        self.jacobian_a = self.side_a.jacobian(&a, &c, 1.0);
        self.jacobian_b = self.side_b.jacobian(&b, &d, self.ratio);

        let inv_mass = self.jacobian_a.inv_mass + self.jacobian_b.inv_mass;
        self.mass = if inv_mass > 0.0 { 1.0 / inv_mass } else { 0.0 };

        if step.warm_start {
            self.impulse *= step.dt_ratio;
            self.apply_velocity(bodies, self.impulse);
        } else {
            self.impulse = 0.0;
        }
    }

    pub(crate) fn solve_velocity(&mut self, bodies: &mut BodyConstraints, _: &TimeStep) -> bool {
        let [a, b, c, d] = self.load(bodies);
        let (ja, jb) = (self.jacobian_a, self.jacobian_b);

        let cdot = ja.linear.dot(a.velocity.linear - c.velocity.linear)
            + jb.linear.dot(b.velocity.linear - d.velocity.linear)
            + ja.angular_body * a.velocity.angular
            - ja.angular_ground * c.velocity.angular
            + jb.angular_body * b.velocity.angular
            - jb.angular_ground * d.velocity.angular;

        let impulse = -self.mass * cdot;
        self.impulse += impulse;

        self.apply_velocity(bodies, impulse);

        impulse == 0.0
    }

    pub(crate) fn solve_position(
        &self,
        bodies: &mut BodyConstraints,
        conf: &ConstraintSolverConf,
    ) -> bool {
        let [a, b, c, d] = self.load(bodies);

        let ja = self.side_a.jacobian(&a, &c, 1.0);
        let jb = self.side_b.jacobian(&b, &d, self.ratio);
        let inv_mass = ja.inv_mass + jb.inv_mass;

        let coordinate_a = self.side_a.coordinate(&a, &c);
        let coordinate_b = self.side_b.coordinate(&b, &d);
        let error = coordinate_a + self.ratio * coordinate_b - self.constant;

        let impulse = if inv_mass > 0.0 { -error / inv_mass } else { 0.0 };

        let terms = [
            (self.body_a, ja.linear, ja.angular_body),
            (self.body_b, jb.linear, jb.angular_body),
            (self.body_c, -ja.linear, -ja.angular_ground),
            (self.body_d, -jb.linear, -jb.angular_ground),
        ];

        for (id, linear, angular) in terms {
            let mut bc = bodies.get(Some(id));
            bc.position.linear += bc.inv_mass * impulse * linear;
            bc.position.angular += bc.inv_rot_i * impulse * angular;
            bodies.set(Some(id), bc);
        }

        error.abs() < conf.linear_slop
    }
}

#[cfg(test)]
mod tests {
    use sprig_core::Velocity;

    use crate::{
        joint::{DistanceJoint, DistanceJointConf, RevoluteJoint, RevoluteJointConf},
        BodyConf,
    };

    use super::*;

    #[test]
    fn couples_rotation() {
        let mut arena = Arena::<BodyId, Body>::new();
        let ground = arena.allocate(Body::new(&BodyConf::default()));
        let gear1 = arena.allocate(Body::new(&BodyConf::dynamic()));
        let gear2 = arena.allocate(Body::new(&BodyConf::dynamic()));

        let mut joints = Arena::<JointId, Joint>::new();
        let j1 = joints.allocate(Joint::Revolute(RevoluteJoint::new(&RevoluteJointConf::new(
            ground, gear1,
        ))));
        let j2 = joints.allocate(Joint::Revolute(RevoluteJoint::new(&RevoluteJointConf::new(
            ground, gear2,
        ))));

        let mut gear =
            GearJoint::new(&GearJointConf::new(j1, j2).with_ratio(2.0), &joints, &arena).unwrap();
        assert_eq!((gear.body_c, gear.body_d), (ground, ground));

        let mut bodies = BodyConstraints::default();
        bodies.reset(3);
        bodies.insert(ground, BodyConstraint::default());
        for id in [gear1, gear2] {
            bodies.insert(
                id,
                BodyConstraint {
                    inv_mass: 1.0,
                    inv_rot_i: 1.0,
                    ..Default::default()
                },
            );
        }

        let mut driven = bodies.get(Some(gear1));
        driven.velocity = Velocity::new(Vec2::ZERO, 5.0);
        bodies.set(Some(gear1), driven);

        let step = TimeStep::new(1.0 / 60.0, 1.0, false);
        let conf = ConstraintSolverConf {
            resolution_rate: 0.2,
            linear_slop: 0.005,
            angular_slop: 0.035,
            max_linear_correction: 0.2,
            max_angular_correction: 0.14,
        };

        gear.init_velocity(&mut bodies, &step, &conf);
        gear.solve_velocity(&mut bodies, &step);

        let w1 = bodies.get(Some(gear1)).velocity.angular;
        let w2 = bodies.get(Some(gear2)).velocity.angular;
        assert!((w1 + 2.0 * w2).abs() < 1e-5, "{w1} {w2}");
    }

    #[test]
    fn rejects_other_kinds() {
        let mut arena = Arena::<BodyId, Body>::new();
        let a = arena.allocate(Body::new(&BodyConf::dynamic()));
        let b = arena.allocate(Body::new(&BodyConf::dynamic()));

        let mut joints = Arena::<JointId, Joint>::new();
        let j1 = joints.allocate(Joint::Revolute(RevoluteJoint::new(&RevoluteJointConf::new(a, b))));
        let j2 = joints.allocate(Joint::Distance(DistanceJoint::new(&DistanceJointConf::new(
            a, b,
        ))));

        let result = GearJoint::new(&GearJointConf::new(j1, j2), &joints, &arena);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
