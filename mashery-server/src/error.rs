//! Path-table errors: everything that can go wrong binding a `Request` to an
//! `Engine` call before the engine itself ever runs (no route matched the
//! path, a required field was missing or malformed). Once a route is bound,
//! failures are `mashery_engine::Error` and pass through unchanged.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServerError {
    #[error("no route matches path {0:?}")]
    NoRoute(String),
    #[error("operation {op:?} is not supported on {path:?}")]
    UnsupportedOperation { path: String, op: &'static str },
    #[error("field {0:?} is required")]
    MissingField(String),
    #[error("field {0:?} could not be parsed")]
    InvalidField(String),
}

/// Everything `dispatch` can return: a routing failure (this crate's own
/// concern) or whatever the bound `Engine` call produced once routing
/// succeeded (§7's error taxonomy, unchanged).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Route(#[from] ServerError),
    #[error(transparent)]
    Engine(#[from] mashery_engine::Error),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
