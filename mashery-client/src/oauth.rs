//! V3 OAuth client-credentials token exchange, shared across every
//! role's V3 client via a single helper rebuilt wholesale on configuration
//! change.
//!
//! Grounded on `plugin.go`'s `GetOAuthHelper` (`sync.Once`-guarded lazy init,
//! torn down on `AcceptConfigurationUpdate`) and `transformers_v3.go`'s
//! `ensureAccessTokenValid`/`retrieveV3AccessToken` callers.

use std::sync::Arc;

use mashery_core::BackendConfiguration;
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::error::{ClientError, ClientResult};
use crate::http::build_http_client;

/// Upstream V3 OAuth token endpoint. Mashery's V3 API exposes a single,
/// fixed endpoint for client-credentials-style exchanges regardless of area.
pub const V3_TOKEN_ENDPOINT: &str = "https://api.mashery.com/v3/token";

#[derive(Debug, Clone)]
pub struct V3Credentials {
    pub api_key: String,
    pub key_secret: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AcquiredToken {
    pub access_token: String,
    pub obtained_unix: i64,
    pub expiry_unix: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Lazily-built, shared OAuth client. Rebuilt wholesale (new `http::Client`,
/// fresh `OnceCell`) whenever the backend configuration changes so TLS/proxy
/// parameters never go stale mid-process.
pub struct V3OAuthHelper {
    client: OnceCell<reqwest::Client>,
    cfg: BackendConfiguration,
}

impl V3OAuthHelper {
    pub fn new(cfg: BackendConfiguration) -> Self {
        Self {
            client: OnceCell::new(),
            cfg,
        }
    }

    async fn http_client(&self) -> ClientResult<&reqwest::Client> {
        self.client
            .get_or_try_init(|| async { build_http_client(&self.cfg) })
            .await
    }

    /// Performs the OAuth client-credentials exchange against
    /// `V3_TOKEN_ENDPOINT`. Failure is surfaced as-is: no retry,
    /// no side effects — the caller owns writing the result into `Usage`.
    pub async fn retrieve_access_token_for(&self, creds: &V3Credentials) -> ClientResult<AcquiredToken> {
        let client = self.http_client().await?;

        let form = [
            ("grant_type", "password"),
            ("username", creds.username.as_str()),
            ("password", creds.password.as_str()),
        ];

        let response = client
            .post(V3_TOKEN_ENDPOINT)
            .basic_auth(&creds.api_key, Some(&creds.key_secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| ClientError::TokenAcquisition(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::TokenAcquisition(format!("status {status}: {body}")));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| ClientError::TokenAcquisition(format!("malformed token response: {e}")))?;

        let now = chrono::Utc::now().timestamp();
        Ok(AcquiredToken {
            access_token: parsed.access_token,
            obtained_unix: now,
            expiry_unix: now + parsed.expires_in,
        })
    }
}

/// Single-flight construction of the process-wide `V3OAuthHelper`, mirroring
/// `sync.Once` — replaced wholesale (not merely reset) on config change so
/// in-flight borrowers of the old `Arc` finish against the old parameters.
#[derive(Default)]
pub struct OAuthHelperSlot {
    inner: std::sync::Mutex<Option<Arc<V3OAuthHelper>>>,
}

impl OAuthHelperSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_init(&self, cfg: &BackendConfiguration) -> Arc<V3OAuthHelper> {
        let mut guard = self.inner.lock().expect("oauth helper slot lock poisoned");
        if let Some(existing) = guard.as_ref() {
            return existing.clone();
        }
        let helper = Arc::new(V3OAuthHelper::new(cfg.clone()));
        *guard = Some(helper.clone());
        helper
    }

    /// Tears the helper down so the next `get_or_init` rebuilds it against
    /// the new configuration.
    pub fn reset(&self) {
        let mut guard = self.inner.lock().expect("oauth helper slot lock poisoned");
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_reuses_the_same_helper_until_reset() {
        let slot = OAuthHelperSlot::new();
        let cfg = BackendConfiguration::default();
        let a = slot.get_or_init(&cfg);
        let b = slot.get_or_init(&cfg);
        assert!(Arc::ptr_eq(&a, &b));
        slot.reset();
        let c = slot.get_or_init(&cfg);
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
