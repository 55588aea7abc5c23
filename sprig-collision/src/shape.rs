use std::f32::consts::PI;

use glam::{vec2, Vec2};
use itertools::Itertools;
use ordered_float::OrderedFloat;
use smallvec::SmallVec;
use sprig_core::{Error, Result, Transform};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{proxy::VertexList, Aabb, DistanceProxy, DEFAULT_LINEAR_SLOP};

/// Upper bound of vertices in a convex polygon
pub const MAX_POLYGON_VERTICES: usize = 8;

/// Vertex radius given to polygons and edges unless specified otherwise
pub const DEFAULT_VERTEX_RADIUS: f32 = DEFAULT_LINEAR_SLOP * 2.0;

/// Mass properties of a shape, relative to the body origin
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MassData {
    pub mass: f32,
    pub center: Vec2,
    /// Rotational inertia about the body origin
    pub i: f32,
}

impl MassData {
    /// Combines the mass data of several shapes of the same body
    pub fn sum(items: impl IntoIterator<Item = MassData>) -> MassData {
        let (mass, weighted, i) = items
            .into_iter()
            .fold((0.0, Vec2::ZERO, 0.0), |(m, c, i), v| {
                (m + v.mass, c + v.center * v.mass, i + v.i)
            });

        let center = if mass > 0.0 { weighted / mass } else { Vec2::ZERO };
        MassData { mass, center, i }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Disk {
    pub location: Vec2,
    pub radius: f32,
}

impl Disk {
    pub fn new(radius: f32) -> Self {
        Self {
            location: Vec2::ZERO,
            radius,
        }
    }

    pub fn with_location(mut self, location: Vec2) -> Self {
        self.location = location;
        self
    }
}

/// Convex polygon with counter clockwise winding
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Polygon {
    vertices: VertexList,
    normals: VertexList,
    centroid: Vec2,
    radius: f32,
}

impl Polygon {
    pub fn new_box(hx: f32, hy: f32) -> Self {
        Self::new_oriented_box(hx, hy, Vec2::ZERO, 0.0)
    }

    pub fn new_oriented_box(hx: f32, hy: f32, center: Vec2, angle: f32) -> Self {
        let xf = Transform::new(center, angle);
        let vertices: VertexList = [vec2(-hx, -hy), vec2(hx, -hy), vec2(hx, hy), vec2(-hx, hy)]
            .into_iter()
            .map(|v| xf.apply(v))
            .collect();

        let normals = [vec2(0.0, -1.0), vec2(1.0, 0.0), vec2(0.0, 1.0), vec2(-1.0, 0.0)]
            .into_iter()
            .map(|n| xf.q.rotate(n))
            .collect();

        Self {
            vertices,
            normals,
            centroid: center,
            radius: DEFAULT_VERTEX_RADIUS,
        }
    }

    /// Computes the convex hull of `points`.
    ///
    /// Fails if fewer than three distinct, non collinear points remain after welding points closer
    /// than half the linear slop.
    pub fn from_points(points: &[Vec2]) -> Result<Self> {
        let weld_distance_sq = (0.5 * DEFAULT_LINEAR_SLOP).powi(2);

        let mut unique: SmallVec<[Vec2; MAX_POLYGON_VERTICES]> = SmallVec::new();
        for &p in points.iter().take(MAX_POLYGON_VERTICES) {
            if unique.iter().all(|v| v.distance_squared(p) >= weld_distance_sq) {
                unique.push(p);
            }
        }

        if unique.len() < 3 {
            return Err(Error::invalid_argument(
                "polygon requires at least three distinct points",
            ));
        }

        // Gift wrapping from the rightmost, lowest point
        let Some(start) = unique
            .iter()
            .position_max_by_key(|v| (OrderedFloat(v.x), OrderedFloat(-v.y)))
        else {
            return Err(Error::invalid_argument("polygon has no points"));
        };

        let mut hull: SmallVec<[usize; MAX_POLYGON_VERTICES]> = SmallVec::new();
        let mut current = start;
        loop {
            hull.push(current);

            let mut next = 0;
            for j in 1..unique.len() {
                if next == current {
                    next = j;
                    continue;
                }

                let r = unique[next] - unique[current];
                let v = unique[j] - unique[current];
                let c = r.perp_dot(v);
                if c < 0.0 || (c == 0.0 && v.length_squared() > r.length_squared()) {
                    next = j;
                }
            }

            current = next;
            if current == start || hull.len() > unique.len() {
                break;
            }
        }

        if hull.len() < 3 {
            return Err(Error::invalid_argument("polygon points are collinear"));
        }

        let vertices: VertexList = hull.iter().map(|&i| unique[i]).collect();
        Self::from_hull(vertices)
    }

    fn from_hull(vertices: VertexList) -> Result<Self> {
        let mut normals = VertexList::new();
        for (&v1, &v2) in vertices.iter().circular_tuple_windows() {
            let edge = v2 - v1;
            if edge.length_squared() <= f32::EPSILON * f32::EPSILON {
                return Err(Error::invalid_argument("polygon has a degenerate edge"));
            }

            normals.push(vec2(edge.y, -edge.x).normalize());
        }

        let centroid = polygon_centroid(&vertices);
        Ok(Self {
            vertices,
            normals,
            centroid,
            radius: DEFAULT_VERTEX_RADIUS,
        })
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    pub fn vertices(&self) -> &[Vec2] {
        &self.vertices
    }

    pub fn normals(&self) -> &[Vec2] {
        &self.normals
    }

    pub fn centroid(&self) -> Vec2 {
        self.centroid
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn area(&self) -> f32 {
        let s = self.vertices[0];
        self.vertices
            .iter()
            .tuple_windows()
            .map(|(&a, &b)| 0.5 * (a - s).perp_dot(b - s))
            .sum()
    }
}

fn polygon_centroid(vertices: &[Vec2]) -> Vec2 {
    let s = vertices[0];
    let mut area = 0.0;
    let mut center = Vec2::ZERO;
    for (&a, &b) in vertices.iter().tuple_windows() {
        let e1 = a - s;
        let e2 = b - s;
        let tri_area = 0.5 * e1.perp_dot(e2);
        area += tri_area;
        center += tri_area * (e1 + e2) / 3.0;
    }

    s + center / area
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Edge {
    pub v1: Vec2,
    pub v2: Vec2,
    pub radius: f32,
}

impl Edge {
    pub fn new(v1: Vec2, v2: Vec2) -> Self {
        Self {
            v1,
            v2,
            radius: DEFAULT_VERTEX_RADIUS,
        }
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }
}

/// Open polyline where every consecutive pair of vertices forms an edge child
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Chain {
    vertices: Vec<Vec2>,
    radius: f32,
}

impl Chain {
    pub fn new(vertices: Vec<Vec2>) -> Result<Self> {
        if vertices.len() < 2 {
            return Err(Error::invalid_argument("chain requires at least two vertices"));
        }

        Ok(Self {
            vertices,
            radius: DEFAULT_VERTEX_RADIUS,
        })
    }

    /// Closes the chain by repeating the first vertex
    pub fn new_loop(mut vertices: Vec<Vec2>) -> Result<Self> {
        if vertices.len() < 3 {
            return Err(Error::invalid_argument("chain loop requires at least three vertices"));
        }

        vertices.push(vertices[0]);
        Self::new(vertices)
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    pub fn vertices(&self) -> &[Vec2] {
        &self.vertices
    }

    pub fn edge(&self, index: usize) -> Edge {
        Edge {
            v1: self.vertices[index],
            v2: self.vertices[index + 1],
            radius: self.radius,
        }
    }
}

/// Collision geometry attached to a fixture
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Shape {
    Disk(Disk),
    Polygon(Polygon),
    Edge(Edge),
    Chain(Chain),
}

impl From<Disk> for Shape {
    fn from(v: Disk) -> Self {
        Self::Disk(v)
    }
}

impl From<Polygon> for Shape {
    fn from(v: Polygon) -> Self {
        Self::Polygon(v)
    }
}

impl From<Edge> for Shape {
    fn from(v: Edge) -> Self {
        Self::Edge(v)
    }
}

impl From<Chain> for Shape {
    fn from(v: Chain) -> Self {
        Self::Chain(v)
    }
}

impl Shape {
    pub fn child_count(&self) -> usize {
        match self {
            Shape::Disk(_) | Shape::Polygon(_) | Shape::Edge(_) => 1,
            Shape::Chain(v) => v.vertices.len() - 1,
        }
    }

    /// Vertex radius of the given child
    pub fn vertex_radius(&self, _child: usize) -> f32 {
        match self {
            Shape::Disk(v) => v.radius,
            Shape::Polygon(v) => v.radius,
            Shape::Edge(v) => v.radius,
            Shape::Chain(v) => v.radius,
        }
    }

    pub fn child(&self, index: usize) -> DistanceProxy {
        match self {
            Shape::Disk(v) => DistanceProxy::point(v.radius, v.location),
            Shape::Polygon(v) => {
                DistanceProxy::new(v.radius, v.vertices.clone(), v.normals.clone())
            }
            Shape::Edge(v) => DistanceProxy::segment(v.radius, v.v1, v.v2),
            Shape::Chain(v) => {
                DistanceProxy::segment(v.radius, v.vertices[index], v.vertices[index + 1])
            }
        }
    }

    /// Bounds of the given child placed at `xf`, including the vertex radius
    pub fn compute_aabb(&self, child: usize, xf: &Transform) -> Aabb {
        let bounds = match self {
            Shape::Disk(v) => Aabb::from_center(xf.apply(v.location), Vec2::ZERO),
            Shape::Polygon(v) => Aabb::from_points(v.vertices.iter().map(|&p| xf.apply(p))),
            Shape::Edge(v) => Aabb::from_points([xf.apply(v.v1), xf.apply(v.v2)]),
            Shape::Chain(v) => Aabb::from_points([
                xf.apply(v.vertices[child]),
                xf.apply(v.vertices[child + 1]),
            ]),
        };

        bounds.fattened(self.vertex_radius(child))
    }

    pub fn mass_data(&self, density: f32) -> MassData {
        match self {
            Shape::Disk(v) => disk_mass(v.location, v.radius, density),
            Shape::Polygon(v) => polygon_mass(&v.vertices, density),
            Shape::Edge(v) => capsule_mass(v.v1, v.v2, v.radius, density),
            Shape::Chain(_) => MassData::default(),
        }
    }

    /// Returns the same shape rotated and translated by `xf`
    pub fn transformed(&self, xf: &Transform) -> Shape {
        match self {
            Shape::Disk(v) => Shape::Disk(Disk {
                location: xf.apply(v.location),
                radius: v.radius,
            }),
            Shape::Polygon(v) => Shape::Polygon(Polygon {
                vertices: v.vertices.iter().map(|&p| xf.apply(p)).collect(),
                normals: v.normals.iter().map(|&n| xf.q.rotate(n)).collect(),
                centroid: xf.apply(v.centroid),
                radius: v.radius,
            }),
            Shape::Edge(v) => Shape::Edge(Edge {
                v1: xf.apply(v.v1),
                v2: xf.apply(v.v2),
                radius: v.radius,
            }),
            Shape::Chain(v) => Shape::Chain(Chain {
                vertices: v.vertices.iter().map(|&p| xf.apply(p)).collect(),
                radius: v.radius,
            }),
        }
    }
}

fn disk_mass(location: Vec2, radius: f32, density: f32) -> MassData {
    let rr = radius * radius;
    let mass = density * PI * rr;
    MassData {
        mass,
        center: location,
        i: mass * (0.5 * rr + location.length_squared()),
    }
}

fn polygon_mass(vertices: &[Vec2], density: f32) -> MassData {
    // Reference point inside the polygon keeps the triangle fan well conditioned
    let s = vertices[0];

    let mut area = 0.0;
    let mut center = Vec2::ZERO;
    let mut i = 0.0;

    for (&a, &b) in vertices.iter().circular_tuple_windows() {
        let e1 = a - s;
        let e2 = b - s;
        let d = e1.perp_dot(e2);

        let tri_area = 0.5 * d;
        area += tri_area;
        center += tri_area * (e1 + e2) / 3.0;

        let int_x2 = e1.x * e1.x + e2.x * e1.x + e2.x * e2.x;
        let int_y2 = e1.y * e1.y + e2.y * e1.y + e2.y * e2.y;
        i += (0.25 / 3.0 * d) * (int_x2 + int_y2);
    }

    if area <= 0.0 {
        return MassData::default();
    }

    let mass = density * area;
    let center = center / area;
    let mass_center = center + s;
    let i = density * i + mass * (mass_center.dot(mass_center) - center.dot(center));

    MassData {
        mass,
        center: mass_center,
        i,
    }
}

/// Mass of a segment swept by a disk: a rectangle capped by two half disks
fn capsule_mass(v1: Vec2, v2: Vec2, radius: f32, density: f32) -> MassData {
    let rr = radius * radius;
    let length = v1.distance(v2);
    let center = (v1 + v2) * 0.5;

    let circle_mass = density * PI * rr;
    let box_mass = density * 2.0 * radius * length;

    // Each half disk is shifted from its own centroid to the end of the box
    let lc = 4.0 * radius / (3.0 * PI);
    let h = 0.5 * length;
    let circle_i = circle_mass * (0.5 * rr + h * h + 2.0 * h * lc);
    let box_i = box_mass * (4.0 * rr + length * length) / 12.0;

    let mass = circle_mass + box_mass;
    MassData {
        mass,
        center,
        i: circle_i + box_i + mass * center.length_squared(),
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use glam::{vec2, Vec2};
    use sprig_core::Transform;

    use super::*;

    #[test]
    fn disk_mass() {
        let shape = Shape::Disk(Disk::new(1.0).with_location(vec2(-1.0, 1.0)));
        let mass = shape.mass_data(1.0);

        assert_eq!(mass.mass, PI);
        assert!((mass.i - 7.85398).abs() < 0.003);
        assert_eq!(mass.center, vec2(-1.0, 1.0));

        let point = Shape::Disk(Disk::new(0.0)).mass_data(1.0);
        assert_eq!(point, MassData::default());
    }

    #[test]
    fn box_mass() {
        let density = 2.1;
        let shape = Shape::Polygon(Polygon::new_box(4.0, 1.0));
        let mass = shape.mass_data(density);

        assert!((mass.mass - density * 16.0).abs() < 1e-4);
        assert!(mass.center.abs_diff_eq(Vec2::ZERO, 1e-5));

        let i = 8.0 * 2.0 * 2.0 * 2.0 / 12.0 + 8.0 * 8.0 * 8.0 * 2.0 / 12.0;
        assert!((mass.i - density * i).abs() < 0.004 * density);
    }

    #[test]
    fn edge_mass() {
        let thin = Shape::Edge(Edge::new(vec2(-1.0, 0.0), vec2(1.0, 0.0)).with_radius(0.0));
        assert_eq!(thin.mass_data(2.1).mass, 0.0);

        // A degenerate edge is a disk
        let point = Shape::Edge(Edge::new(vec2(-1.0, 1.0), vec2(-1.0, 1.0)).with_radius(1.0));
        let mass = point.mass_data(1.0);
        assert!((mass.mass - PI).abs() < 1e-5);
        assert!((mass.i - 7.85398).abs() < 0.003);
        assert_eq!(mass.center, vec2(-1.0, 1.0));
    }

    #[test]
    fn hull() {
        let points = [
            vec2(0.0, 0.0),
            vec2(1.0, 1.0),
            vec2(0.5, 0.5),
            vec2(1.0, 0.0),
            vec2(0.0, 1.0),
            vec2(0.0, 0.0),
        ];

        let polygon = Polygon::from_points(&points).unwrap();
        assert_eq!(polygon.vertices().len(), 4);
        assert!((polygon.area() - 1.0).abs() < 1e-6);
        assert!(polygon.centroid().abs_diff_eq(vec2(0.5, 0.5), 1e-6));

        // counter clockwise with outward normals
        for ((&v, &n), &w) in polygon
            .vertices()
            .iter()
            .zip(polygon.normals())
            .zip(polygon.vertices().iter().cycle().skip(1))
        {
            assert!((w - v).perp_dot(n) < 0.0);
            assert!((v - polygon.centroid()).dot(n) > 0.0);
        }

        assert!(Polygon::from_points(&[vec2(0.0, 0.0), vec2(1.0, 0.0), vec2(2.0, 0.0)]).is_err());
    }

    #[test]
    fn chain_children() {
        let chain = Shape::Chain(
            Chain::new(vec![vec2(0.0, 0.0), vec2(1.0, 0.0), vec2(2.0, 1.0)]).unwrap(),
        );

        assert_eq!(chain.child_count(), 2);
        let child = chain.child(1);
        assert_eq!(child.vertices(), &[vec2(1.0, 0.0), vec2(2.0, 1.0)]);

        let aabb = chain.compute_aabb(1, &Transform::IDENTITY);
        let r = chain.vertex_radius(1);
        assert_eq!(aabb.min, vec2(1.0 - r, -r));
        assert_eq!(aabb.max, vec2(2.0 + r, 1.0 + r));
    }
}
