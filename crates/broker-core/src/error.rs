use thiserror::Error;

/// Domain errors surfaced by a [`crate::store::BrokerStore`]. Transport-level
/// concerns (auth, status-code mapping) live in the `broker` binary, not here.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("job not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
