//! Error taxonomy for the chunk cache core.
//!
//! Two failure families cross component boundaries:
//!
//! - [`StoreError`] — fact store failures. `Conflict` is recoverable (the
//!   caller re-reads the winning row); `Unavailable` is fatal to the current
//!   request and must never be treated as a cache miss.
//! - [`GenerationError`] — generator failures. Always absorbed by the
//!   generation pipeline and converted into a failing QA verdict that
//!   consumes one regeneration attempt; never surfaced to a client.
//!
//! Malformed chunk data is deliberately NOT an error: the QA engine turns it
//! into a `fail` verdict instead.

use thiserror::Error;

use crate::models::ChunkKey;

/// Errors produced by [`FactStore`](crate::store::FactStore) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A live row already exists for this key. Recoverable: re-read the
    /// winner instead of re-creating.
    #[error("chunk already exists for {0}")]
    Conflict(ChunkKey),

    /// No chunk with the given id.
    #[error("chunk not found: {0}")]
    NotFound(String),

    /// The backing store is unreachable or rejected the operation. Fatal to
    /// the current request; the caller must answer "temporarily unavailable",
    /// never a placeholder chunk.
    #[error("fact store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Errors produced by [`Generator`](crate::generator::Generator)
/// implementations or by the pipeline's timeout wrapper around them.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The generator did not answer within the configured deadline.
    #[error("generation timed out after {0}s")]
    Timeout(u64),

    /// The upstream provider returned an error or unusable payload.
    #[error("generation failed: {0}")]
    Provider(String),

    /// No generator is configured.
    #[error("generator is disabled")]
    Disabled,
}
