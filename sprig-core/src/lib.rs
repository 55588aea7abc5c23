mod arena;
mod error;
mod id;
pub mod math;
pub mod profiling;

pub use arena::{Arena, ArenaIndex};
pub use error::{EntityKind, Error, Result};
pub use id::{BodyId, ContactId, FixtureId, JointId};
pub use math::{Position, Rot, Sweep, Transform, Velocity};

pub use glam::{vec2, Mat2, Mat3, Vec2, Vec3};
