//! Geometry and collision detection for sprig.
//!
//! Contains the convex shapes, a dynamic bounding volume tree for the broad phase, contact
//! manifold generation, GJK distance queries and the conservative advancement time of impact
//! solver.
mod aabb;
mod distance;
mod manifold;
mod proxy;
mod shape;
mod toi;
mod tree;

pub use aabb::*;
pub use distance::*;
pub use manifold::*;
pub use proxy::*;
pub use shape::*;
pub use toi::*;
pub use tree::*;

pub use sprig_core::{Error, Result};

/// Tolerance for collision and constraint solving, in meters
pub const DEFAULT_LINEAR_SLOP: f32 = 0.005;
