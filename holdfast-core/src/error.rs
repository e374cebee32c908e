use thiserror::Error;

pub type Result<T> = std::result::Result<T, HoldError>;

#[derive(Error, Debug)]
pub enum HoldError {
    /// The backing medium cannot be reached. Transient; the caller may
    /// retry with backoff. Never retried internally.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Persisted records violate a store invariant. Requires operator
    /// intervention.
    #[error("storage corrupt: {0}")]
    StorageCorrupt(String),

    /// A concurrent external writer modified the store since it was loaded.
    #[error("storage write conflict: {0}")]
    StorageWriteConflict(String),

    #[error("quota exceeded for {owner}: {claim_type} claims at {usage}/{limit}")]
    QuotaExceeded {
        owner: String,
        claim_type: String,
        usage: u32,
        limit: u32,
    },

    #[error("{owner} already holds a {claim_type} claim at {world_id} {position}")]
    DuplicateClaim {
        owner: String,
        world_id: String,
        position: String,
        claim_type: String,
    },

    #[error("claim not found: {0}")]
    ClaimNotFound(String),

    #[error("unknown storage backend: {0}")]
    UnknownBackend(String),

    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    #[error("activation error: {0}")]
    Activation(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}
