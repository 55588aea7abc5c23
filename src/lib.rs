//! # Sprig
//!
//! ## What it is
//!
//! Sprig is a deterministic 2D rigid body physics engine.
//!
//! This crate exports all sprig crates, but the separate crates can just as well be used manually.
//!
//! ## How it works
//!
//! ### World
//! Everything lives in a [`World`]. It owns the bodies, the fixtures attaching shapes to them,
//! the joints constraining them, and the contacts found between overlapping fixtures. Entities
//! are addressed by small copyable ids which stay valid until the entity is destroyed.
//!
//! ### Stepping
//! [`World::step`] advances the simulation by a fixed amount of time. Awake bodies are grouped
//! into islands of touching or jointed bodies which are solved independently, and islands which
//! come to rest are put to sleep. Fast moving bodies are kept from passing through others by
//! continuous collision, which rewinds them to their time of impact.
//!
//! Given the same sequence of calls, a world always produces bit identical results.
//!
//! ### Listening
//! A [`ContactListener`] is notified when contacts begin and end touching, and may disable a
//! contact before it is solved. A [`DestructionListener`] is notified of joints and fixtures
//! destroyed implicitly, such as the joints of a destroyed body.
//!
//! See the documentation of [`World`].

/// Reexports
pub use sprig_core as base;
pub use sprig_collision as collision;
pub use sprig_dynamics as dynamics;

pub use sprig_collision::{Aabb, Disk, Polygon, Shape};
pub use sprig_core::{vec2, BodyId, ContactId, Error, FixtureId, JointId, Result, Vec2, Velocity};
pub use sprig_dynamics::{
    joint, Body, BodyConf, BodyType, Contact, ContactImpulses, ContactListener,
    DestructionListener, Filter, FixtureConf, Joint, JointConf, StepConf, StepStats, World,
    WorldConf,
};
