//! Unified error handling for the replica.

use converge_engine::EntityId;

/// Replica error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No live document exists under the requested identity.
    #[error("not found: {0}")]
    NotFound(EntityId),

    /// A concurrent write invalidated the revision this operation was
    /// conditioned on. Internal retry loops absorb this; callers only
    /// see it from raw store calls.
    #[error("revision conflict on: {0}")]
    Conflict(EntityId),

    /// The store could not be reached or the connection died mid-request.
    /// Never retried internally.
    #[error("transport error: {0}")]
    Transport(String),

    /// The store answered with something the replica cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A retried operation kept losing races until its attempt budget
    /// ran out.
    #[error("gave up on {id} after {attempts} attempts")]
    RetriesExhausted { id: EntityId, attempts: u32 },

    /// Engine error: decoding, merging, or serialization.
    #[error("engine error: {0}")]
    Engine(#[from] converge_engine::Error),
}

impl Error {
    /// True when this is a revision conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// True when this is a missing document.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::Protocol(err.to_string())
        } else {
            Error::Transport(err.to_string())
        }
    }
}

/// Result type alias for replica operations.
pub type Result<T> = std::result::Result<T, Error>;
