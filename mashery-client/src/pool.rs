//! Upstream client pool: cached per-role V2 and V3 clients, keyed by
//! `(backend_uuid, role_name)`, with idle eviction and wholesale teardown on
//! configuration change.
//!
//! Grounded on `plugin.go`'s `AuthPlugin.v2Clients`/`v3Clients` maps,
//! `GetMasheryV2Client`/`GetMasheryV3Client`, `Housekeeping` (15-minute idle
//! cutoff), and `AcceptConfigurationUpdate`.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use dashmap::DashMap;
use mashery_core::{BackendConfiguration, RoleKeys};

use crate::error::ClientResult;
use crate::http::build_http_client;
use crate::oauth::OAuthHelperSlot;
use crate::v2::V2Client;
use crate::v3::V3Client;

/// Idle eviction cutoff: a cached client unused for this long
/// is closed and removed on the next housekeeping pass.
pub const IDLE_EVICTION_SECS: u64 = 15 * 60;

struct V2Entry {
    client: Arc<V2Client>,
    last_used: RwLock<Instant>,
}

struct V3Entry {
    client: Arc<V3Client>,
    token: Arc<RwLock<String>>,
    last_used: RwLock<Instant>,
}

/// Shared, mutable client pool. One instance per mount, held behind an
/// `Arc` by the engine and torn down wholesale on `accept_config_update`.
pub struct ClientPool {
    v2: DashMap<(String, String), V2Entry>,
    v3: DashMap<(String, String), V3Entry>,
    oauth: OAuthHelperSlot,
    http: RwLock<Option<reqwest::Client>>,
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientPool {
    pub fn new() -> Self {
        Self {
            v2: DashMap::new(),
            v3: DashMap::new(),
            oauth: OAuthHelperSlot::new(),
            http: RwLock::new(None),
        }
    }

    fn shared_http(&self, cfg: &BackendConfiguration) -> ClientResult<reqwest::Client> {
        if let Some(existing) = self.http.read().expect("http client lock poisoned").as_ref() {
            return Ok(existing.clone());
        }
        let client = build_http_client(cfg)?;
        *self.http.write().expect("http client lock poisoned") = Some(client.clone());
        Ok(client)
    }

    pub fn oauth_helper(&self, cfg: &BackendConfiguration) -> Arc<crate::oauth::V3OAuthHelper> {
        self.oauth.get_or_init(cfg)
    }

    /// Returns the cached V3 client for `(backend_uuid, role)`, updating its
    /// token to `current_token` and refreshing `last_used`, or builds and
    /// caches a new one.
    pub fn v3_client(
        &self,
        backend_uuid: &str,
        role: &str,
        current_token: &str,
        cfg: &BackendConfiguration,
    ) -> ClientResult<Arc<V3Client>> {
        let key = (backend_uuid.to_string(), role.to_string());
        if let Some(entry) = self.v3.get(&key) {
            *entry.token.write().expect("v3 token lock poisoned") = current_token.to_string();
            *entry.last_used.write().expect("last-used lock poisoned") = Instant::now();
            return Ok(entry.client.clone());
        }

        let http = self.shared_http(cfg)?;
        let token = Arc::new(RwLock::new(current_token.to_string()));
        let client = Arc::new(V3Client::new(http, token.clone()));
        self.v3.insert(
            key,
            V3Entry {
                client: client.clone(),
                token,
                last_used: RwLock::new(Instant::now()),
            },
        );
        Ok(client)
    }

    /// Returns the cached V2 client for `(backend_uuid, role)`, or builds and
    /// caches a new one from `keys`. The V2 signature is recomputed fresh on
    /// every call inside `V2Client` itself, so there is nothing to refresh here
    /// beyond `last_used`.
    pub fn v2_client(&self, backend_uuid: &str, role: &str, keys: &RoleKeys, cfg: &BackendConfiguration) -> ClientResult<Arc<V2Client>> {
        let key = (backend_uuid.to_string(), role.to_string());
        if let Some(entry) = self.v2.get(&key) {
            *entry.last_used.write().expect("last-used lock poisoned") = Instant::now();
            return Ok(entry.client.clone());
        }

        let http = self.shared_http(cfg)?;
        let client = Arc::new(V2Client::new(http, keys.area_nid, keys.api_key.clone(), keys.key_secret.clone()));
        self.v2.insert(
            key,
            V2Entry {
                client: client.clone(),
                last_used: RwLock::new(Instant::now()),
            },
        );
        Ok(client)
    }

    /// Housekeeping pass: removes any cached client idle for longer
    /// than `IDLE_EVICTION_SECS`. Closure is implicit (dropping the `Arc`);
    /// best-effort and never fails the pass.
    pub fn evict_idle(&self) {
        let cutoff = Instant::now() - std::time::Duration::from_secs(IDLE_EVICTION_SECS);
        self.v2.retain(|_, entry| *entry.last_used.read().expect("last-used lock poisoned") >= cutoff);
        self.v3.retain(|_, entry| *entry.last_used.read().expect("last-used lock poisoned") >= cutoff);
    }

    /// Accepts a new backend configuration: every cached client is dropped
    /// and the OAuth helper is torn down so both rebuild against the new
    /// TLS/proxy parameters on next use.
    pub fn accept_config_update(&self) {
        self.v2.clear();
        self.v3.clear();
        self.oauth.reset();
        *self.http.write().expect("http client lock poisoned") = None;
    }

    pub fn v2_len(&self) -> usize {
        self.v2.len()
    }

    pub fn v3_len(&self) -> usize {
        self.v3.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_update_clears_every_cached_client() {
        let pool = ClientPool::new();
        let cfg = BackendConfiguration::default();
        let keys = RoleKeys {
            area_nid: 1,
            api_key: "k".into(),
            key_secret: "s".into(),
            ..RoleKeys::new()
        };
        pool.v2_client("b1", "r1", &keys, &cfg).unwrap();
        pool.v3_client("b1", "r1", "tok", &cfg).unwrap();
        assert_eq!(pool.v2_len(), 1);
        assert_eq!(pool.v3_len(), 1);

        pool.accept_config_update();
        assert_eq!(pool.v2_len(), 0);
        assert_eq!(pool.v3_len(), 0);
    }
}
