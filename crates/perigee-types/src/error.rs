//! Error types for the Perigee engine.
//!
//! All crates return `PerigeeResult<T>` from fallible operations.

use thiserror::Error;

/// Unified error type for the Perigee engine.
#[derive(Debug, Error)]
pub enum PerigeeError {
    /// A propagation lane failed to reach the superstep time limit,
    /// or produced non-finite trajectory data.
    #[error("Integration error: {0}")]
    Integration(String),

    /// A size would exceed the width of an internal counter.
    #[error("Overflow detected: {0}")]
    Overflow(String),

    /// Configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A pipeline invariant was violated (e.g. a malformed BVH node).
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

/// Convenience alias for `Result<T, PerigeeError>`.
pub type PerigeeResult<T> = Result<T, PerigeeError>;
