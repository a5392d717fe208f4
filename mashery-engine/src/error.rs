//! Error taxonomy (§7, §7.1): `Error` unifies the three crate-boundary error
//! types below `mashery-engine` into exactly two host-visible shapes —
//! `Error::Response` (a typed, user-visible failure; no state change) and
//! `Error::Internal` (an engine failure the host should log and treat as
//! non-user-facing, per §7's `StorageFailure` row).
//!
//! Grounded on `path_role.go`/`path_role_grant.go`'s error returns
//! (`logical.ErrorResponse(...)` vs. a Go `error` return) and `plugin.go`'s
//! top-level error wrapping.

use thiserror::Error;

use mashery_client::ClientError;
use mashery_core::CoreError;
use mashery_crypto::CryptoError;

/// A user-visible error response: no state change, surfaced verbatim to the caller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResponseError {
    #[error("{0}")]
    InputInvalid(String),
    #[error("{0}")]
    StateInvariant(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("upstream returned status {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("{0}")]
    CryptoFailure(String),
}

impl ResponseError {
    pub fn access_denied() -> Self {
        Self::StateInvariant("access denied".to_string())
    }
}

/// The engine-wide error type. Everything that crosses a handler boundary is
/// either a `Response` (render it) or an `Internal` failure (log it, and tell
/// the host this request could not be completed for reasons the caller
/// cannot fix by changing their request).
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Response(#[from] ResponseError),
    #[error("internal engine failure: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, Error>;

impl Error {
    pub fn input_invalid(msg: impl Into<String>) -> Self {
        Error::Response(ResponseError::InputInvalid(msg.into()))
    }

    pub fn state_invariant(msg: impl Into<String>) -> Self {
        Error::Response(ResponseError::StateInvariant(msg.into()))
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::Response(ResponseError::NotFound(msg.into()))
    }

    /// Maps a `CoreError` the way §7.1 prescribes: every variant except
    /// `Storage`/`Internal` is user-visible; those two are engine-fatal.
    pub fn from_core(e: CoreError) -> Self {
        match e {
            CoreError::InputInvalid(m) => Error::Response(ResponseError::InputInvalid(m)),
            CoreError::StateInvariant(m) => Error::Response(ResponseError::StateInvariant(m)),
            CoreError::NotFound(m) => Error::Response(ResponseError::NotFound(m)),
            CoreError::Storage(m) => Error::Internal(format!("storage: {m}")),
            CoreError::Internal(m) => Error::Internal(m),
        }
    }
}

impl From<CoreError> for Error {
    fn from(e: CoreError) -> Self {
        Error::from_core(e)
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        // Decrypt/verify/parse failures are user-visible and non-fatal (§7 CryptoFailure).
        Error::Response(ResponseError::CryptoFailure(e.to_string()))
    }
}

impl From<ClientError> for Error {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Upstream { status, body } => Error::Response(ResponseError::Upstream { status, body }),
            // Transport/token-acquisition/pin-rejection failures bubble as engine errors (§7: "Upstream
            // transport errors bubble up"); they are not the caller's to fix by resubmitting the request.
            other => Error::Internal(other.to_string()),
        }
    }
}

/// Converts a `CoreError` raised inside a pipeline stage into the
/// `CoreError` channel used to short-circuit that stage's own pipeline —
/// i.e. wraps a crypto/client failure as a `CoreError` so it can travel
/// through a `mashery_core::Stage` before being unwrapped again by the
/// handler via `Error::from_core`.
pub(crate) fn crypto_as_core(e: CryptoError) -> CoreError {
    CoreError::InputInvalid(format!("crypto failure: {e}"))
}

pub(crate) fn client_as_core(e: ClientError) -> CoreError {
    match e {
        ClientError::Upstream { status, body } => CoreError::invalid(format!("upstream {status}: {body}")),
        other => CoreError::Internal(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_failure_maps_to_internal() {
        let e = Error::from_core(CoreError::Storage("disk full".into()));
        assert!(matches!(e, Error::Internal(_)));
    }

    #[test]
    fn not_found_maps_to_response() {
        let e = Error::from_core(CoreError::NotFound("role r1".into()));
        assert!(matches!(e, Error::Response(ResponseError::NotFound(_))));
    }

    #[test]
    fn upstream_client_error_stays_a_response() {
        let e: Error = ClientError::Upstream {
            status: 404,
            body: "not found".into(),
        }
        .into();
        assert!(matches!(e, Error::Response(ResponseError::Upstream { status: 404, .. })));
    }

    #[test]
    fn transport_client_error_is_internal() {
        let e: Error = ClientError::Transport("connection reset".into()).into();
        assert!(matches!(e, Error::Internal(_)));
    }
}
