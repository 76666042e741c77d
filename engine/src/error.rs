//! Error types for the Converge engine.

use crate::{EntityId, KindTag};
use thiserror::Error;

/// All possible errors from the Converge engine.
#[derive(Debug, Error)]
pub enum Error {
    // Registry errors
    #[error("unknown kind tag: {0}")]
    UnknownKind(KindTag),

    #[error("decode failed for kind '{kind}': {message}")]
    Decode { kind: KindTag, message: String },

    // Merge errors
    #[error("merge failed for '{id}': {message}")]
    Merge { id: EntityId, message: String },

    // Payload errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a merge failure for the given entity.
    pub fn merge(id: impl Into<EntityId>, message: impl Into<String>) -> Self {
        Error::Merge {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Build a decode failure for the given kind tag.
    pub fn decode(kind: impl Into<KindTag>, message: impl Into<String>) -> Self {
        Error::Decode {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
