use thiserror::Error;

/// Errors raised by the role model, storage adapter, and pipeline runtime.
///
/// `CoreError` does not itself distinguish "user-visible" from "engine" failures —
/// that split happens one layer up, in `mashery_engine::Error`, which wraps each
/// variant here into either a `Response` or an `Internal` outcome. Storage
/// failures are the one variant that is always internal.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("input is invalid: {0}")]
    InputInvalid(String),

    #[error("operation violates role state invariant: {0}")]
    StateInvariant(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("storage failure: {0}")]
    Storage(String),

    /// Non-storage engine-fatal failure (e.g. upstream transport). Treated
    /// the same as `Storage` by callers deciding "response vs. bubble to
    /// host" — kept as a distinct variant purely so logs don't call a
    /// transport outage a storage failure.
    #[error("engine failure: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InputInvalid(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::StateInvariant(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
