use core::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Body,
    Fixture,
    Joint,
    Contact,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Body => "body",
            EntityKind::Fixture => "fixture",
            EntityKind::Joint => "joint",
            EntityKind::Contact => "contact",
        };

        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A structural mutation was attempted while the world was stepping
    #[error("World is locked while stepping")]
    WorldLocked,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Maximum {kind} count of {max} reached")]
    CapacityExceeded { kind: EntityKind, max: usize },

    #[error("Index {index} is out of range for length {len}")]
    OutOfRange { index: usize, len: usize },

    #[error("No {kind} exists at index {index}")]
    NotFound { kind: EntityKind, index: usize },
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
