//! Host-visible response shape (§6): `Response {Data, Headers, Warnings, Secret?}`.
//!
//! Grounded on `path_role_grant.go`'s `createV3LeasedResponse`/`v3Secret.Response(...)`
//! and the plain (non-leased) responses `path_role.go`'s `renderRole` builds.

use std::collections::BTreeMap;

use serde_json::Value;

/// Lease parameters for a secret-bearing response (§6 `Secret`). `renew`/`revoke`
/// are genuinely no-ops here — V2 signatures and V3 access tokens are neither
/// renewable nor revocable at the upstream, matching the donor's `noopRenewRevoke`.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretLease {
    pub lease_type: &'static str,
    pub default_duration_secs: u64,
    pub max_ttl_secs: u64,
    pub renewable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EngineResponse {
    pub data: BTreeMap<String, Value>,
    pub headers: BTreeMap<String, Vec<String>>,
    pub warnings: Vec<String>,
    pub secret: Option<SecretLease>,
}

impl EngineResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(name.into()).or_default().push(value.into());
        self
    }

    pub fn with_secret(mut self, secret: SecretLease) -> Self {
        self.secret = Some(secret);
        self
    }
}

/// `lease ≈ 1 min` V2 access secret (§4.7 Issue grant).
pub fn v2_access_secret(max_ttl_secs: u64) -> SecretLease {
    SecretLease {
        lease_type: "v2_access",
        default_duration_secs: 60,
        max_ttl_secs,
        renewable: true,
    }
}

/// `lease ≈ 15 min`, `max_ttl ≈ 90%` of the token's own lifetime (§4.7 Issue grant).
pub fn v3_access_secret(token_lifetime_secs: u64) -> SecretLease {
    SecretLease {
        lease_type: "v3_access",
        default_duration_secs: 15 * 60,
        max_ttl_secs: (token_lifetime_secs as f64 * 0.9).round() as u64,
        renewable: true,
    }
}
