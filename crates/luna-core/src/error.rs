//! The closed failure taxonomy Luna's core operations raise.
//!
//! Library functions that need to surface one of these kinds return
//! `Result<T, LunaError>`; functions that merely propagate I/O or
//! third-party failures use `anyhow::Result` instead, matching the rest of
//! the workspace.

use thiserror::Error;

/// One of the five failure kinds the core distinguishes.
#[derive(Debug, Error)]
pub enum LunaError {
    /// An annotation line or field could not be parsed.
    #[error("malformed input at {where_}: {detail}")]
    MalformedInput {
        /// Where the bad input was found (e.g. `"line 42"`, `"header"`).
        where_: String,
        /// What was wrong with it.
        detail: String,
    },

    /// A data-model invariant would be violated by the requested operation.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A required resource (channel, file, table row) was not found.
    #[error("missing resource: {0}")]
    MissingResource(String),

    /// A numeric computation degenerated (zero variance, rank deficiency,
    /// too few observations, non-positive Welch bin).
    #[error("degenerate numerics: {0}")]
    DegenerateNumerics(String),

    /// An operation was attempted on a sealed (query-built) annotation class.
    #[error("state error: {0}")]
    StateError(String),
}

impl LunaError {
    /// Build a [`LunaError::MalformedInput`] from a location and detail.
    pub fn malformed(where_: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::MalformedInput {
            where_: where_.into(),
            detail: detail.into(),
        }
    }
}
