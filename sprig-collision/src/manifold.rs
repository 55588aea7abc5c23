//! Contact manifolds between convex shape children
use arrayvec::ArrayVec;
use glam::{vec2, Vec2};
use sprig_core::Transform;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{DistanceProxy, DEFAULT_LINEAR_SLOP};

pub const MAX_MANIFOLD_POINTS: usize = 2;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FeatureKind {
    #[default]
    Vertex,
    Face,
}

/// Identifies which vertices or faces of the two shapes produced a contact point.
///
/// Points are matched across steps by this identity for warm starting.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContactFeature {
    pub kind_a: FeatureKind,
    pub index_a: u8,
    pub kind_b: FeatureKind,
    pub index_b: u8,
}

impl ContactFeature {
    pub const fn new(kind_a: FeatureKind, index_a: u8, kind_b: FeatureKind, index_b: u8) -> Self {
        Self {
            kind_a,
            index_a,
            kind_b,
            index_b,
        }
    }

    pub fn flipped(self) -> Self {
        Self {
            kind_a: self.kind_b,
            index_a: self.index_b,
            kind_b: self.kind_a,
            index_b: self.index_a,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ManifoldPoint {
    /// Meaning depends on the manifold kind:
    /// - circles: center of shape B in B's frame
    /// - face A: clip point in B's frame
    /// - face B: clip point in A's frame
    pub local_point: Vec2,
    pub feature: ContactFeature,
    /// Separation at the time the manifold was computed, negative when penetrating
    pub separation: f32,
    pub normal_impulse: f32,
    pub tangent_impulse: f32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ManifoldKind {
    /// No contact points
    #[default]
    Unset,
    Circles,
    FaceA,
    FaceB,
}

#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Manifold {
    pub kind: ManifoldKind,
    /// Unused for circles, otherwise the reference face normal in the reference shape's frame
    pub local_normal: Vec2,
    /// Center of shape A for circles, otherwise a point on the reference face
    pub local_point: Vec2,
    pub points: ArrayVec<ManifoldPoint, MAX_MANIFOLD_POINTS>,
}

impl Manifold {
    #[inline]
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Swaps the roles of the shapes for a manifold computed with the arguments reversed
    fn flipped(mut self) -> Self {
        self.kind = match self.kind {
            ManifoldKind::FaceA => ManifoldKind::FaceB,
            ManifoldKind::FaceB => ManifoldKind::FaceA,
            v => v,
        };

        for point in &mut self.points {
            point.feature = point.feature.flipped();
        }

        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManifoldConf {
    pub linear_slop: f32,
}

impl Default for ManifoldConf {
    fn default() -> Self {
        Self {
            linear_slop: DEFAULT_LINEAR_SLOP,
        }
    }
}

/// World space view of a manifold
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WorldManifold {
    /// Points from shape A towards shape B
    pub normal: Vec2,
    /// Midpoints between the two surfaces
    pub points: ArrayVec<Vec2, MAX_MANIFOLD_POINTS>,
    /// Negative when penetrating
    pub separations: ArrayVec<f32, MAX_MANIFOLD_POINTS>,
}

impl WorldManifold {
    pub fn new(
        manifold: &Manifold,
        xf_a: &Transform,
        radius_a: f32,
        xf_b: &Transform,
        radius_b: f32,
    ) -> Self {
        let mut result = WorldManifold::default();

        match manifold.kind {
            ManifoldKind::Unset => {}
            ManifoldKind::Circles => {
                let point_a = xf_a.apply(manifold.local_point);
                let point_b = xf_b.apply(manifold.points[0].local_point);
                let normal = (point_b - point_a).try_normalize().unwrap_or(vec2(1.0, 0.0));

                let ca = point_a + radius_a * normal;
                let cb = point_b - radius_b * normal;

                result.normal = normal;
                result.points.push(0.5 * (ca + cb));
                result.separations.push((cb - ca).dot(normal));
            }
            ManifoldKind::FaceA => {
                let normal = xf_a.q.rotate(manifold.local_normal);
                let plane_point = xf_a.apply(manifold.local_point);

                result.normal = normal;
                for point in &manifold.points {
                    let clip_point = xf_b.apply(point.local_point);
                    let ca = clip_point
                        + (radius_a - (clip_point - plane_point).dot(normal)) * normal;
                    let cb = clip_point - radius_b * normal;

                    result.points.push(0.5 * (ca + cb));
                    result.separations.push((cb - ca).dot(normal));
                }
            }
            ManifoldKind::FaceB => {
                let normal = xf_b.q.rotate(manifold.local_normal);
                let plane_point = xf_b.apply(manifold.local_point);

                for point in &manifold.points {
                    let clip_point = xf_a.apply(point.local_point);
                    let cb = clip_point
                        + (radius_b - (clip_point - plane_point).dot(normal)) * normal;
                    let ca = clip_point - radius_a * normal;

                    result.points.push(0.5 * (ca + cb));
                    result.separations.push((ca - cb).dot(normal));
                }

                // Ensure the normal points from A to B
                result.normal = -normal;
            }
        }

        result
    }
}

/// Computes the contact manifold between two convex children
pub fn collide_shapes(
    proxy_a: &DistanceProxy,
    xf_a: &Transform,
    proxy_b: &DistanceProxy,
    xf_b: &Transform,
    conf: &ManifoldConf,
) -> Manifold {
    match (proxy_a.count(), proxy_b.count()) {
        (1, 1) => collide_circles(proxy_a, xf_a, proxy_b, xf_b),
        (1, _) => collide_polygon_circle(proxy_b, xf_b, proxy_a, xf_a).flipped(),
        (_, 1) => collide_polygon_circle(proxy_a, xf_a, proxy_b, xf_b),
        _ => collide_polygons(proxy_a, xf_a, proxy_b, xf_b, conf),
    }
}

fn collide_circles(
    proxy_a: &DistanceProxy,
    xf_a: &Transform,
    proxy_b: &DistanceProxy,
    xf_b: &Transform,
) -> Manifold {
    let local_a = proxy_a.vertex(0);
    let local_b = proxy_b.vertex(0);

    let distance = xf_a.apply(local_a).distance(xf_b.apply(local_b));
    let total_radius = proxy_a.radius() + proxy_b.radius();
    if distance > total_radius {
        return Manifold::default();
    }

    let mut manifold = Manifold {
        kind: ManifoldKind::Circles,
        local_normal: Vec2::ZERO,
        local_point: local_a,
        points: ArrayVec::new(),
    };

    manifold.points.push(ManifoldPoint {
        local_point: local_b,
        feature: ContactFeature::new(FeatureKind::Vertex, 0, FeatureKind::Vertex, 0),
        separation: distance - total_radius,
        ..Default::default()
    });

    manifold
}

/// Polygon A against the single vertex of B
fn collide_polygon_circle(
    polygon: &DistanceProxy,
    xf_a: &Transform,
    circle: &DistanceProxy,
    xf_b: &Transform,
) -> Manifold {
    let circle_local = circle.vertex(0);
    // Circle center in the polygon's frame
    let c = xf_a.inv_apply(xf_b.apply(circle_local));

    let total_radius = polygon.radius() + circle.radius();
    let count = polygon.count();

    // Face of minimum penetration
    let mut normal_index = 0;
    let mut separation = f32::MIN;
    for i in 0..count {
        let s = polygon.normal(i).dot(c - polygon.vertex(i));
        if s > total_radius {
            return Manifold::default();
        }

        if s > separation {
            separation = s;
            normal_index = i;
        }
    }

    let next_index = (normal_index + 1) % count;
    let v1 = polygon.vertex(normal_index);
    let v2 = polygon.vertex(next_index);

    let manifold = |local_normal: Vec2, local_point: Vec2, feature: ContactFeature, s: f32| {
        let mut manifold = Manifold {
            kind: ManifoldKind::FaceA,
            local_normal,
            local_point,
            points: ArrayVec::new(),
        };

        manifold.points.push(ManifoldPoint {
            local_point: circle_local,
            feature,
            separation: s - total_radius,
            ..Default::default()
        });

        manifold
    };

    let face_feature = ContactFeature::new(
        FeatureKind::Face,
        normal_index as u8,
        FeatureKind::Vertex,
        0,
    );

    // Center is inside the polygon
    if separation < f32::EPSILON {
        return manifold(
            polygon.normal(normal_index),
            0.5 * (v1 + v2),
            face_feature,
            separation,
        );
    }

    // Barycentric coordinates along the face
    let u1 = (c - v1).dot(v2 - v1);
    let u2 = (c - v2).dot(v1 - v2);

    if u1 <= 0.0 {
        let distance = c.distance(v1);
        if distance > total_radius {
            return Manifold::default();
        }

        let feature = ContactFeature::new(
            FeatureKind::Vertex,
            normal_index as u8,
            FeatureKind::Vertex,
            0,
        );

        let normal = (c - v1).try_normalize().unwrap_or(polygon.normal(normal_index));
        manifold(normal, v1, feature, distance)
    } else if u2 <= 0.0 {
        let distance = c.distance(v2);
        if distance > total_radius {
            return Manifold::default();
        }

        let feature = ContactFeature::new(
            FeatureKind::Vertex,
            next_index as u8,
            FeatureKind::Vertex,
            0,
        );

        let normal = (c - v2).try_normalize().unwrap_or(polygon.normal(normal_index));
        manifold(normal, v2, feature, distance)
    } else {
        let face_center = 0.5 * (v1 + v2);
        let s = (c - face_center).dot(polygon.normal(normal_index));
        if s > total_radius {
            return Manifold::default();
        }

        manifold(polygon.normal(normal_index), face_center, face_feature, s)
    }
}

/// Largest separation of `poly2` along the face normals of `poly1`
fn find_max_separation(
    poly1: &DistanceProxy,
    xf1: &Transform,
    poly2: &DistanceProxy,
    xf2: &Transform,
) -> (usize, f32) {
    // Work in the frame of poly2
    let xf = xf2.inv_mul(xf1);

    let mut best_index = 0;
    let mut max_separation = f32::MIN;
    for i in 0..poly1.count() {
        let n = xf.q.rotate(poly1.normal(i));
        let v1 = xf.apply(poly1.vertex(i));

        let si = poly2
            .vertices()
            .iter()
            .map(|&v2| n.dot(v2 - v1))
            .fold(f32::MAX, f32::min);

        if si > max_separation {
            max_separation = si;
            best_index = i;
        }
    }

    (best_index, max_separation)
}

#[derive(Debug, Clone, Copy)]
struct ClipVertex {
    v: Vec2,
    feature: ContactFeature,
}

/// The edge of `poly2` most anti-parallel to the reference face of `poly1`, in world space
fn find_incident_edge(
    poly1: &DistanceProxy,
    xf1: &Transform,
    edge1: usize,
    poly2: &DistanceProxy,
    xf2: &Transform,
) -> [ClipVertex; 2] {
    let normal1 = xf2.q.inv_rotate(xf1.q.rotate(poly1.normal(edge1)));

    let mut index = 0;
    let mut min_dot = f32::MAX;
    for (i, n) in poly2.normals().iter().enumerate() {
        let dot = normal1.dot(*n);
        if dot < min_dot {
            min_dot = dot;
            index = i;
        }
    }

    let i1 = index;
    let i2 = (index + 1) % poly2.count();

    [
        ClipVertex {
            v: xf2.apply(poly2.vertex(i1)),
            feature: ContactFeature::new(
                FeatureKind::Face,
                edge1 as u8,
                FeatureKind::Vertex,
                i1 as u8,
            ),
        },
        ClipVertex {
            v: xf2.apply(poly2.vertex(i2)),
            feature: ContactFeature::new(
                FeatureKind::Face,
                edge1 as u8,
                FeatureKind::Vertex,
                i2 as u8,
            ),
        },
    ]
}

/// Sutherland-Hodgman clipping of a segment against the half plane `dot(normal, v) <= offset`
fn clip_segment_to_line(
    input: &[ClipVertex],
    normal: Vec2,
    offset: f32,
    vertex_index_a: usize,
) -> ArrayVec<ClipVertex, 2> {
    let mut output = ArrayVec::new();

    let [v0, v1] = [input[0], input[1]];
    let d0 = normal.dot(v0.v) - offset;
    let d1 = normal.dot(v1.v) - offset;

    if d0 <= 0.0 {
        output.push(v0);
    }

    if d1 <= 0.0 {
        output.push(v1);
    }

    if d0 * d1 < 0.0 && output.len() < 2 {
        let interp = d0 / (d0 - d1);
        output.push(ClipVertex {
            v: v0.v + interp * (v1.v - v0.v),
            feature: ContactFeature::new(
                FeatureKind::Vertex,
                vertex_index_a as u8,
                FeatureKind::Face,
                v0.feature.index_b,
            ),
        });
    }

    output
}

fn collide_polygons(
    poly_a: &DistanceProxy,
    xf_a: &Transform,
    poly_b: &DistanceProxy,
    xf_b: &Transform,
    conf: &ManifoldConf,
) -> Manifold {
    let total_radius = poly_a.radius() + poly_b.radius();

    let (edge_a, separation_a) = find_max_separation(poly_a, xf_a, poly_b, xf_b);
    if separation_a > total_radius {
        return Manifold::default();
    }

    let (edge_b, separation_b) = find_max_separation(poly_b, xf_b, poly_a, xf_a);
    if separation_b > total_radius {
        return Manifold::default();
    }

    // Prefer A as the reference to avoid flip-flopping between near equal faces
    let tolerance = 0.1 * conf.linear_slop;
    let (poly1, xf1, edge1, poly2, xf2, kind) = if separation_b > separation_a + tolerance {
        (poly_b, xf_b, edge_b, poly_a, xf_a, ManifoldKind::FaceB)
    } else {
        (poly_a, xf_a, edge_a, poly_b, xf_b, ManifoldKind::FaceA)
    };

    let incident_edge = find_incident_edge(poly1, xf1, edge1, poly2, xf2);

    let iv1 = edge1;
    let iv2 = (edge1 + 1) % poly1.count();

    let v11 = poly1.vertex(iv1);
    let v12 = poly1.vertex(iv2);

    let Some(local_tangent) = (v12 - v11).try_normalize() else {
        return Manifold::default();
    };

    let local_normal = vec2(local_tangent.y, -local_tangent.x);
    let plane_point = 0.5 * (v11 + v12);

    let tangent = xf1.q.rotate(local_tangent);
    let normal = vec2(tangent.y, -tangent.x);

    let v11 = xf1.apply(v11);
    let v12 = xf1.apply(v12);

    let front_offset = normal.dot(v11);
    let side_offset1 = -tangent.dot(v11) + total_radius;
    let side_offset2 = tangent.dot(v12) + total_radius;

    let clip1 = clip_segment_to_line(&incident_edge, -tangent, side_offset1, iv1);
    if clip1.len() < 2 {
        return Manifold::default();
    }

    let clip2 = clip_segment_to_line(&clip1, tangent, side_offset2, iv2);
    if clip2.len() < 2 {
        return Manifold::default();
    }

    let mut manifold = Manifold {
        kind,
        local_normal,
        local_point: plane_point,
        points: ArrayVec::new(),
    };

    for cv in clip2 {
        let separation = normal.dot(cv.v) - front_offset;
        if separation <= total_radius {
            let feature = match kind {
                ManifoldKind::FaceB => cv.feature.flipped(),
                _ => cv.feature,
            };

            manifold.points.push(ManifoldPoint {
                local_point: xf2.inv_apply(cv.v),
                feature,
                separation: separation - total_radius,
                ..Default::default()
            });
        }
    }

    manifold
}

#[cfg(test)]
mod tests {
    use glam::vec2;
    use sprig_core::Transform;

    use super::*;
    use crate::{Disk, Edge, Polygon, Shape};

    fn conf() -> ManifoldConf {
        ManifoldConf::default()
    }

    #[test]
    fn circles() {
        let a = Shape::Disk(Disk::new(1.0)).child(0);
        let b = Shape::Disk(Disk::new(0.5)).child(0);

        let far = Transform::new(vec2(2.0, 0.0), 0.0);
        assert!(collide_shapes(&a, &Transform::IDENTITY, &b, &far, &conf()).is_empty());

        let near = Transform::new(vec2(1.25, 0.0), 0.0);
        let manifold = collide_shapes(&a, &Transform::IDENTITY, &b, &near, &conf());
        assert_eq!(manifold.kind, ManifoldKind::Circles);
        assert_eq!(manifold.point_count(), 1);
        assert!((manifold.points[0].separation + 0.25).abs() < 1e-6);

        let world = WorldManifold::new(&manifold, &Transform::IDENTITY, 1.0, &near, 0.5);
        assert_eq!(world.normal, vec2(1.0, 0.0));
        assert!((world.separations[0] + 0.25).abs() < 1e-6);
        assert!(world.points[0].abs_diff_eq(vec2(0.875, 0.0), 1e-6));
    }

    #[test]
    fn box_resting_on_box() {
        let ground = Shape::Polygon(Polygon::new_box(5.0, 0.5).with_radius(0.0)).child(0);
        let block = Shape::Polygon(Polygon::new_box(0.5, 0.5).with_radius(0.0)).child(0);

        let xf_b = Transform::new(vec2(0.0, 0.99), 0.0);
        let manifold = collide_shapes(&ground, &Transform::IDENTITY, &block, &xf_b, &conf());

        assert_eq!(manifold.kind, ManifoldKind::FaceA);
        assert_eq!(manifold.point_count(), 2);
        assert!(manifold.local_normal.abs_diff_eq(vec2(0.0, 1.0), 1e-6));

        let world = WorldManifold::new(&manifold, &Transform::IDENTITY, 0.0, &xf_b, 0.0);
        assert!(world.normal.abs_diff_eq(vec2(0.0, 1.0), 1e-6));
        for s in &world.separations {
            assert!((s + 0.01).abs() < 1e-5);
        }

        // Distinct features for the two points
        assert_ne!(manifold.points[0].feature, manifold.points[1].feature);
    }

    #[test]
    fn reversed_arguments_keep_normal_from_a_to_b() {
        let ground = Shape::Polygon(Polygon::new_box(5.0, 0.5)).child(0);
        let block = Shape::Polygon(Polygon::new_box(0.5, 0.5)).child(0);

        let xf = Transform::new(vec2(0.0, 0.99), 0.0);
        let manifold = collide_shapes(&block, &xf, &ground, &Transform::IDENTITY, &conf());

        assert_eq!(manifold.point_count(), 2);
        let world = WorldManifold::new(
            &manifold,
            &xf,
            block.radius(),
            &Transform::IDENTITY,
            ground.radius(),
        );

        // From the block down into the ground
        assert!(world.normal.abs_diff_eq(vec2(0.0, -1.0), 1e-6));
    }

    #[test]
    fn disk_on_edge() {
        let edge = Shape::Edge(Edge::new(vec2(-5.0, 0.0), vec2(5.0, 0.0))).child(0);
        let disk = Shape::Disk(Disk::new(0.5)).child(0);

        let xf = Transform::new(vec2(1.0, 0.5), 0.0);
        let manifold = collide_shapes(&disk, &xf, &edge, &Transform::IDENTITY, &conf());

        assert_eq!(manifold.kind, ManifoldKind::FaceB);
        assert_eq!(manifold.point_count(), 1);

        let world =
            WorldManifold::new(&manifold, &xf, disk.radius(), &Transform::IDENTITY, edge.radius());
        assert!(world.normal.abs_diff_eq(vec2(0.0, -1.0), 1e-6));
        assert!((world.separations[0] + edge.radius()).abs() < 1e-5);

        let above = Transform::new(vec2(1.0, 2.0), 0.0);
        assert!(collide_shapes(&disk, &above, &edge, &Transform::IDENTITY, &conf()).is_empty());
    }

    #[test]
    fn disk_near_polygon_corner() {
        let block = Shape::Polygon(Polygon::new_box(1.0, 1.0).with_radius(0.0)).child(0);
        let disk = Shape::Disk(Disk::new(0.5)).child(0);

        let xf = Transform::new(vec2(1.3, 1.3), 0.0);
        let manifold = collide_shapes(&block, &Transform::IDENTITY, &disk, &xf, &conf());

        assert_eq!(manifold.kind, ManifoldKind::FaceA);
        assert_eq!(manifold.points[0].feature.kind_a, FeatureKind::Vertex);
        assert_eq!(manifold.local_point, vec2(1.0, 1.0));
        let expected = std::f32::consts::FRAC_1_SQRT_2;
        assert!(manifold
            .local_normal
            .abs_diff_eq(vec2(expected, expected), 1e-5));
    }
}
