//! Upstream-facing client layer: token acquisition and refresh,
//! retry-on-stale-token, TLS pinning policy, proxy-aware HTTP, and the
//! per-role client pool built on top of it.
//!
//! This crate knows about HTTP and the upstream's wire shapes, but nothing
//! about storage or the pipeline runtime — it is handed role credentials and
//! backend configuration by `mashery-engine` and returns wrapped responses.

pub mod error;
pub mod http;
pub mod oauth;
pub mod pin;
pub mod pool;
pub mod v2;
pub mod v3;
pub mod verifier;

pub use error::{ClientError, ClientResult};
pub use oauth::{AcquiredToken, OAuthHelperSlot, V3Credentials, V3OAuthHelper, V3_TOKEN_ENDPOINT};
pub use pin::chain_is_accepted;
pub use pool::{ClientPool, IDLE_EVICTION_SECS};
pub use v2::{V2Client, V2Request, V2_ENDPOINT_BASE};
pub use v3::{TokenRefresher, V3Client, WrappedResponse, STALE_TOKEN_MAX_ATTEMPTS, V3_ENDPOINT_BASE};
