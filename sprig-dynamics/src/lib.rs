//! Rigid body dynamics for sprig.
//!
//! A [`World`] owns bodies, the fixtures attaching shapes to them, the joints constraining them
//! and the contacts found between overlapping fixtures. [`World::step`] advances everything by
//! one time step, solving islands of interacting bodies and resolving fast motion through
//! continuous collision.
mod body;
mod contact;
mod fixture;
mod island;
pub mod joint;
mod listener;
mod solver;
mod step;
mod world;

pub use body::*;
pub use contact::*;
pub use fixture::*;
pub use joint::{Joint, JointConf, JointKind};
pub use listener::*;
pub use step::*;
pub use world::*;

pub use sprig_core::{Error, Result};

#[cfg(test)]
pub(crate) fn init_logging() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, registry, util::SubscriberInitExt, EnvFilter};

    let _ = registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_test_writer())
        .try_init();
}
