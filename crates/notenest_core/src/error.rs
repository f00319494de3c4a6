//! crates/notenest_core/src/error.rs
//!
//! The error type surfaced by the profile core's operations.

use crate::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Unauthenticated")]
    Unauthenticated,

    /// The caller does not own the resource it tried to mutate.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("You have already reviewed this note")]
    AlreadyReviewed,

    #[error("You have already reported this note")]
    AlreadyReported,

    #[error("Invalid input: {0}")]
    Validation(String),

    /// An optimistic transaction kept losing to concurrent writers.
    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    #[error("Flashcard generation failed: {0}")]
    Generation(PortError),

    /// A store or blob operation failed. The caller may retry.
    #[error("Storage error: {0}")]
    Store(#[from] PortError),
}

pub type CoreResult<T> = Result<T, CoreError>;
