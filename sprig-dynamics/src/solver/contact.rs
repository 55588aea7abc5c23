use arrayvec::ArrayVec;
use glam::{vec2, Mat2, Vec2};
use sprig_collision::{Manifold, ManifoldKind, WorldManifold, MAX_MANIFOLD_POINTS};
use sprig_core::{
    math::{cross_sv, cross_vs, inverse22},
    BodyId, ContactId, Transform,
};

use crate::{Contact, ContactImpulses};

use super::{BodyConstraint, BodyConstraints, ConstraintSolverConf, TimeStep};

/// Upper bound of the condition number of the block solver matrix
const MAX_CONDITION: f32 = 1000.0;

#[derive(Debug, Default, Clone, Copy)]
struct VelocityConstraintPoint {
    r_a: Vec2,
    r_b: Vec2,
    normal_impulse: f32,
    tangent_impulse: f32,
    normal_mass: f32,
    tangent_mass: f32,
    velocity_bias: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct VelocityConf {
    pub velocity_threshold: f32,
    pub block_solve: bool,
}

/// Velocity constraint of a single contact
#[derive(Debug, Clone)]
pub(crate) struct VelocityConstraint {
    pub contact: ContactId,
    body_a: BodyId,
    body_b: BodyId,
    normal: Vec2,
    friction: f32,
    tangent_speed: f32,
    points: ArrayVec<VelocityConstraintPoint, MAX_MANIFOLD_POINTS>,
    k: Mat2,
    normal_mass: Mat2,
    block: bool,
}

impl VelocityConstraint {
    /// Captures the world manifold of the contact at the current constraint positions
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ContactId,
        contact: &Contact,
        manifold: &Manifold,
        radius_a: f32,
        radius_b: f32,
        bodies: &BodyConstraints,
        step: &TimeStep,
        conf: &VelocityConf,
    ) -> Self {
        let bc_a = bodies.get(Some(contact.body_a));
        let bc_b = bodies.get(Some(contact.body_b));

        let world = WorldManifold::new(
            manifold,
            &bc_a.transform(),
            radius_a,
            &bc_b.transform(),
            radius_b,
        );

        let normal = world.normal;
        let tangent = cross_vs(normal, 1.0);

        let (m_a, i_a) = (bc_a.inv_mass, bc_a.inv_rot_i);
        let (m_b, i_b) = (bc_b.inv_mass, bc_b.inv_rot_i);
        let (v_a, w_a) = (bc_a.velocity.linear, bc_a.velocity.angular);
        let (v_b, w_b) = (bc_b.velocity.linear, bc_b.velocity.angular);

        let points = manifold
            .points
            .iter()
            .zip(&world.points)
            .map(|(mp, &point)| {
                let r_a = point - bc_a.position.linear;
                let r_b = point - bc_b.position.linear;

                let rn_a = r_a.perp_dot(normal);
                let rn_b = r_b.perp_dot(normal);
                let k_normal = m_a + m_b + i_a * rn_a * rn_a + i_b * rn_b * rn_b;

                let rt_a = r_a.perp_dot(tangent);
                let rt_b = r_b.perp_dot(tangent);
                let k_tangent = m_a + m_b + i_a * rt_a * rt_a + i_b * rt_b * rt_b;

                let dv = v_b + cross_sv(w_b, r_b) - v_a - cross_sv(w_a, r_a);
                let v_rel = normal.dot(dv);
                let velocity_bias = if v_rel < -conf.velocity_threshold {
                    -contact.restitution * v_rel
                } else {
                    0.0
                };

                let (normal_impulse, tangent_impulse) = if step.warm_start {
                    (
                        step.dt_ratio * mp.normal_impulse,
                        step.dt_ratio * mp.tangent_impulse,
                    )
                } else {
                    (0.0, 0.0)
                };

                VelocityConstraintPoint {
                    r_a,
                    r_b,
                    normal_impulse,
                    tangent_impulse,
                    normal_mass: if k_normal > 0.0 { 1.0 / k_normal } else { 0.0 },
                    tangent_mass: if k_tangent > 0.0 { 1.0 / k_tangent } else { 0.0 },
                    velocity_bias,
                }
            })
            .collect();

        let mut constraint = Self {
            contact: id,
            body_a: contact.body_a,
            body_b: contact.body_b,
            normal,
            friction: contact.friction,
            tangent_speed: contact.tangent_speed,
            points,
            k: Mat2::ZERO,
            normal_mass: Mat2::ZERO,
            block: false,
        };

        if constraint.points.len() == 2 && conf.block_solve {
            constraint.prepare_block(&bc_a, &bc_b);
        }

        constraint
    }

    fn prepare_block(&mut self, bc_a: &BodyConstraint, bc_b: &BodyConstraint) {
        let (m_a, i_a) = (bc_a.inv_mass, bc_a.inv_rot_i);
        let (m_b, i_b) = (bc_b.inv_mass, bc_b.inv_rot_i);
        let (p1, p2) = (&self.points[0], &self.points[1]);

        let rn1_a = p1.r_a.perp_dot(self.normal);
        let rn1_b = p1.r_b.perp_dot(self.normal);
        let rn2_a = p2.r_a.perp_dot(self.normal);
        let rn2_b = p2.r_b.perp_dot(self.normal);

        let k11 = m_a + m_b + i_a * rn1_a * rn1_a + i_b * rn1_b * rn1_b;
        let k22 = m_a + m_b + i_a * rn2_a * rn2_a + i_b * rn2_b * rn2_b;
        let k12 = m_a + m_b + i_a * rn1_a * rn2_a + i_b * rn1_b * rn2_b;

        if k11 * k11 < MAX_CONDITION * (k11 * k22 - k12 * k12) {
            self.k = Mat2::from_cols(vec2(k11, k12), vec2(k12, k22));
            self.normal_mass = inverse22(self.k);
            self.block = true;
        } else {
            // The points are redundant, keep one of them
            self.points.truncate(1);
        }
    }

    fn tangent(&self) -> Vec2 {
        cross_vs(self.normal, 1.0)
    }

    pub fn warm_start(&self, bodies: &mut BodyConstraints) {
        let mut bc_a = bodies.get(Some(self.body_a));
        let mut bc_b = bodies.get(Some(self.body_b));
        let tangent = self.tangent();

        for point in &self.points {
            let p = point.normal_impulse * self.normal + point.tangent_impulse * tangent;
            apply_impulse(&mut bc_a, &mut bc_b, point.r_a, point.r_b, p);
        }

        bodies.set(Some(self.body_a), bc_a);
        bodies.set(Some(self.body_b), bc_b);
    }

    /// Runs one sequential impulse iteration.
    ///
    /// Returns the largest change of any accumulated impulse.
    pub fn solve(&mut self, bodies: &mut BodyConstraints) -> f32 {
        let mut bc_a = bodies.get(Some(self.body_a));
        let mut bc_b = bodies.get(Some(self.body_b));
        let tangent = self.tangent();
        let normal = self.normal;

        let mut max_increment: f32 = 0.0;

        // Friction first, as the normal impulse matters more
        for point in &mut self.points {
            let dv = relative_velocity(&bc_a, &bc_b, point.r_a, point.r_b);
            let vt = dv.dot(tangent) - self.tangent_speed;
            let max_friction = self.friction * point.normal_impulse;

            let old = point.tangent_impulse;
            point.tangent_impulse =
                (old + point.tangent_mass * -vt).clamp(-max_friction, max_friction);
            let lambda = point.tangent_impulse - old;
            max_increment = max_increment.max(lambda.abs());

            apply_impulse(&mut bc_a, &mut bc_b, point.r_a, point.r_b, lambda * tangent);
        }

        if !self.block {
            for point in &mut self.points {
                let dv = relative_velocity(&bc_a, &bc_b, point.r_a, point.r_b);
                let vn = dv.dot(normal);

                let old = point.normal_impulse;
                point.normal_impulse =
                    (old - point.normal_mass * (vn - point.velocity_bias)).max(0.0);
                let lambda = point.normal_impulse - old;
                max_increment = max_increment.max(lambda.abs());

                apply_impulse(&mut bc_a, &mut bc_b, point.r_a, point.r_b, lambda * normal);
            }
        } else {
            let increment = self.solve_block(&mut bc_a, &mut bc_b);
            max_increment = max_increment.max(increment);
        }

        bodies.set(Some(self.body_a), bc_a);
        bodies.set(Some(self.body_b), bc_b);

        max_increment
    }

    /// Solves both normal impulses at once as a linear complementarity problem, by testing
    /// each of the four cases of which impulses are active
    fn solve_block(&mut self, bc_a: &mut BodyConstraint, bc_b: &mut BodyConstraint) -> f32 {
        let normal = self.normal;
        let (p1, p2) = (self.points[0], self.points[1]);

        let a = vec2(p1.normal_impulse, p2.normal_impulse);
        debug_assert!(a.x >= 0.0 && a.y >= 0.0);

        let vn1 = relative_velocity(bc_a, bc_b, p1.r_a, p1.r_b).dot(normal);
        let vn2 = relative_velocity(bc_a, bc_b, p2.r_a, p2.r_b).dot(normal);

        let b = vec2(vn1 - p1.velocity_bias, vn2 - p2.velocity_bias) - self.k * a;

        let x = {
            // Both points active
            let x = -(self.normal_mass * b);
            if x.x >= 0.0 && x.y >= 0.0 {
                Some(x)
            } else {
                None
            }
        }
        .or_else(|| {
            // Only the first point active
            let x = vec2(-p1.normal_mass * b.x, 0.0);
            let vn2 = self.k.x_axis.y * x.x + b.y;
            (x.x >= 0.0 && vn2 >= 0.0).then_some(x)
        })
        .or_else(|| {
            // Only the second point active
            let x = vec2(0.0, -p2.normal_mass * b.y);
            let vn1 = self.k.y_axis.x * x.y + b.x;
            (x.y >= 0.0 && vn1 >= 0.0).then_some(x)
        })
        .or_else(|| {
            // Neither point active
            (b.x >= 0.0 && b.y >= 0.0).then_some(Vec2::ZERO)
        });

        // No solution, which can happen for degenerate manifolds
        let Some(x) = x else {
            return 0.0;
        };

        let d = x - a;
        apply_impulse(bc_a, bc_b, p1.r_a, p1.r_b, d.x * normal);
        apply_impulse(bc_a, bc_b, p2.r_a, p2.r_b, d.y * normal);

        self.points[0].normal_impulse = x.x;
        self.points[1].normal_impulse = x.y;

        d.x.abs().max(d.y.abs())
    }

    pub fn impulses(&self) -> ContactImpulses {
        ContactImpulses {
            normal: self.points.iter().map(|v| v.normal_impulse).collect(),
            tangent: self.points.iter().map(|v| v.tangent_impulse).collect(),
        }
    }

    /// Writes the accumulated impulses back for warm starting the next step
    pub fn store_impulses(&self, manifold: &mut Manifold) {
        for (point, mp) in self.points.iter().zip(&mut manifold.points) {
            mp.normal_impulse = point.normal_impulse;
            mp.tangent_impulse = point.tangent_impulse;
        }
    }
}

#[inline]
fn relative_velocity(bc_a: &BodyConstraint, bc_b: &BodyConstraint, r_a: Vec2, r_b: Vec2) -> Vec2 {
    bc_b.velocity.linear + cross_sv(bc_b.velocity.angular, r_b)
        - bc_a.velocity.linear
        - cross_sv(bc_a.velocity.angular, r_a)
}

/// Applies `p` to body B and its opposite to body A
#[inline]
fn apply_impulse(bc_a: &mut BodyConstraint, bc_b: &mut BodyConstraint, r_a: Vec2, r_b: Vec2, p: Vec2) {
    bc_a.velocity.linear -= bc_a.inv_mass * p;
    bc_a.velocity.angular -= bc_a.inv_rot_i * r_a.perp_dot(p);
    bc_b.velocity.linear += bc_b.inv_mass * p;
    bc_b.velocity.angular += bc_b.inv_rot_i * r_b.perp_dot(p);
}

/// Position constraint of a single contact
#[derive(Debug, Clone)]
pub(crate) struct PositionConstraint {
    body_a: BodyId,
    body_b: BodyId,
    kind: ManifoldKind,
    local_normal: Vec2,
    local_point: Vec2,
    local_points: ArrayVec<Vec2, MAX_MANIFOLD_POINTS>,
    radius_a: f32,
    radius_b: f32,
}

impl PositionConstraint {
    pub fn new(contact: &Contact, manifold: &Manifold, radius_a: f32, radius_b: f32) -> Self {
        Self {
            body_a: contact.body_a,
            body_b: contact.body_b,
            kind: manifold.kind,
            local_normal: manifold.local_normal,
            local_point: manifold.local_point,
            local_points: manifold.points.iter().map(|v| v.local_point).collect(),
            radius_a,
            radius_b,
        }
    }

    /// Returns the normal, contact point and separation of point `index`
    fn evaluate(&self, xf_a: &Transform, xf_b: &Transform, index: usize) -> (Vec2, Vec2, f32) {
        let total_radius = self.radius_a + self.radius_b;

        match self.kind {
            ManifoldKind::Circles => {
                let point_a = xf_a.apply(self.local_point);
                let point_b = xf_b.apply(self.local_points[0]);
                let normal = (point_b - point_a).normalize_or_zero();
                let separation = (point_b - point_a).dot(normal) - total_radius;
                (normal, 0.5 * (point_a + point_b), separation)
            }
            ManifoldKind::FaceA => {
                let normal = xf_a.q.rotate(self.local_normal);
                let plane_point = xf_a.apply(self.local_point);
                let clip_point = xf_b.apply(self.local_points[index]);
                let separation = (clip_point - plane_point).dot(normal) - total_radius;
                (normal, clip_point, separation)
            }
            ManifoldKind::FaceB => {
                let normal = xf_b.q.rotate(self.local_normal);
                let plane_point = xf_b.apply(self.local_point);
                let clip_point = xf_a.apply(self.local_points[index]);
                let separation = (clip_point - plane_point).dot(normal) - total_radius;
                // Point from A to B
                (-normal, clip_point, separation)
            }
            ManifoldKind::Unset => (Vec2::ZERO, Vec2::ZERO, 0.0),
        }
    }

    /// Pushes the shapes apart along the contact normal.
    ///
    /// Returns the smallest separation found before correcting.
    pub fn solve(&self, bodies: &mut BodyConstraints, conf: &ConstraintSolverConf) -> f32 {
        let mut bc_a = bodies.get(Some(self.body_a));
        let mut bc_b = bodies.get(Some(self.body_b));

        let (m_a, i_a) = (bc_a.inv_mass, bc_a.inv_rot_i);
        let (m_b, i_b) = (bc_b.inv_mass, bc_b.inv_rot_i);

        let mut min_separation = f32::INFINITY;

        for index in 0..self.local_points.len() {
            let (normal, point, separation) =
                self.evaluate(&bc_a.transform(), &bc_b.transform(), index);

            let r_a = point - bc_a.position.linear;
            let r_b = point - bc_b.position.linear;

            min_separation = min_separation.min(separation);

            let c = (conf.resolution_rate * (separation + conf.linear_slop))
                .clamp(-conf.max_linear_correction, 0.0);

            let rn_a = r_a.perp_dot(normal);
            let rn_b = r_b.perp_dot(normal);
            let k = m_a + m_b + i_a * rn_a * rn_a + i_b * rn_b * rn_b;

            let impulse = if k > 0.0 { -c / k } else { 0.0 };
            let p = impulse * normal;

            bc_a.position.linear -= m_a * p;
            bc_a.position.angular -= i_a * r_a.perp_dot(p);
            bc_b.position.linear += m_b * p;
            bc_b.position.angular += i_b * r_b.perp_dot(p);
        }

        bodies.set(Some(self.body_a), bc_a);
        bodies.set(Some(self.body_b), bc_b);

        min_separation
    }
}

/// Solves every position constraint once, returning the smallest separation
pub(crate) fn solve_position_constraints(
    constraints: &[PositionConstraint],
    bodies: &mut BodyConstraints,
    conf: &ConstraintSolverConf,
) -> f32 {
    constraints
        .iter()
        .map(|v| v.solve(bodies, conf))
        .fold(f32::INFINITY, f32::min)
}
