//! Role model, storage contract, and pipeline runtime for the credential-custody engine.
//!
//! This crate has no knowledge of HTTP, PEM, or any particular upstream — it
//! is the part of the system that would survive a rewrite of the transport
//! layer untouched: role/usage records and their predicates, backend
//! configuration, the storage adapter contract, and the generic pipeline
//! executor stages are composed over.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod role;
pub mod storage;

pub use config::{BackendConfiguration, PinDescriptor, ProxyAuthMode, TlsPinningConfig, TlsPinningMode};
pub use error::{CoreError, CoreResult};
pub use pipeline::{MappingRunner, RequestContext, Runner, SimpleRunner, Stage, StageOutcome};
pub use role::{RoleKeys, RoleUsage, StoredRole, TOKEN_RENEWAL_WINDOW_SECS, UNBOUNDED};
pub use storage::{InMemoryStorage, Storage, StorageJsonExt};

/// Seconds since the Unix epoch, used throughout as the engine's single
/// notion of "now" (role expiry, token expiry, quota).
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Storage key layout, rooted at a per-mount backend UUID.
pub mod paths {
    pub fn config(backend_uuid: &str) -> String {
        format!("{backend_uuid}/config")
    }

    pub fn roles_root(backend_uuid: &str) -> String {
        format!("{backend_uuid}/role/")
    }

    pub fn role_keys(backend_uuid: &str, role: &str) -> String {
        format!("{backend_uuid}/role/{role}/key")
    }

    pub fn role_usage(backend_uuid: &str, role: &str) -> String {
        format!("{backend_uuid}/role/{role}/usage")
    }

    pub fn role_private_key(backend_uuid: &str, role: &str) -> String {
        format!("{backend_uuid}/role/{role}/pk")
    }
}
