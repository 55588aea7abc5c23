use glam::Vec2;
use smallvec::SmallVec;

use crate::MAX_POLYGON_VERTICES;

pub type VertexList = SmallVec<[Vec2; MAX_POLYGON_VERTICES]>;

/// Convex geometry of a single shape child as seen by the distance, manifold and time of impact
/// routines.
///
/// A single vertex represents a disk, two vertices a capsule-like edge. The outline is grown by
/// `radius`.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceProxy {
    vertices: VertexList,
    normals: VertexList,
    radius: f32,
}

impl DistanceProxy {
    /// `normals` must either be empty or have one normal per edge `vertices[i] -> vertices[i + 1]`
    pub fn new(radius: f32, vertices: VertexList, normals: VertexList) -> Self {
        debug_assert!(!vertices.is_empty());
        debug_assert!(normals.is_empty() || normals.len() == vertices.len());
        Self {
            vertices,
            normals,
            radius,
        }
    }

    pub fn point(radius: f32, p: Vec2) -> Self {
        Self::new(radius, smallvec::smallvec![p], VertexList::new())
    }

    pub fn segment(radius: f32, v1: Vec2, v2: Vec2) -> Self {
        let n = (v2 - v1).perp().try_normalize().map(|v| -v).unwrap_or(Vec2::ZERO);
        Self::new(
            radius,
            smallvec::smallvec![v1, v2],
            smallvec::smallvec![n, -n],
        )
    }

    #[inline]
    pub fn radius(&self) -> f32 {
        self.radius
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn vertex(&self, index: usize) -> Vec2 {
        self.vertices[index]
    }

    #[inline]
    pub fn vertices(&self) -> &[Vec2] {
        &self.vertices
    }

    #[inline]
    pub fn normal(&self, index: usize) -> Vec2 {
        self.normals[index]
    }

    #[inline]
    pub fn normals(&self) -> &[Vec2] {
        &self.normals
    }

    /// Index of the vertex furthest along `dir`. The first one wins on ties.
    pub fn support(&self, dir: Vec2) -> usize {
        let mut best = 0;
        let mut best_value = self.vertices[0].dot(dir);
        for (i, v) in self.vertices.iter().enumerate().skip(1) {
            let value = v.dot(dir);
            if value > best_value {
                best = i;
                best_value = value;
            }
        }

        best
    }
}
