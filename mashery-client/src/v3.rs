//! V3 bearer-token REST client and the stale-token retry loop.
//!
//! Grounded on `transformers_v3.go`'s `fetchWithErrorHandling` (bounded
//! 3-attempt retry on `ERR_403_DEVELOPER_INACTIVE`) and its
//! `fetchV3Resource`/`writeToV3Resource`/`deleteV3Resource` callers, which
//! this module generalizes into `fetch_any`/`post_any`/`put_any`/`delete_any`.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ClientError, ClientResult};
use crate::oauth::AcquiredToken;

/// At most this many attempts at a V3 call before giving up on a
/// continuously-stale token. Kept as a fixed constant rather than configurable
/// policy.
pub const STALE_TOKEN_MAX_ATTEMPTS: u32 = 3;

const STALE_TOKEN_ERROR_CODE: &str = "ERR_403_DEVELOPER_INACTIVE";

/// Upstream V3 REST base; area id is carried in each resource path by callers.
pub const V3_ENDPOINT_BASE: &str = "https://api.mashery.com/v3/rest";

#[derive(Debug, Clone)]
pub struct WrappedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl WrappedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_stale_token_error(&self) -> bool {
        self.status == 403 && self.header("X-Mashery-Error-Code") == Some(STALE_TOKEN_ERROR_CODE)
    }
}

/// Implemented by the engine layer, which alone can persist a refreshed
/// token into `Usage` (the client pool has no storage access).
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> ClientResult<AcquiredToken>;
}

pub struct V3Client {
    http: reqwest::Client,
    /// Swapped in place by the pool on every token refresh so in-flight
    /// callers observe either the old or the new token atomically.
    token: std::sync::Arc<std::sync::RwLock<String>>,
    base_url: String,
}

impl V3Client {
    pub fn new(http: reqwest::Client, token: std::sync::Arc<std::sync::RwLock<String>>) -> Self {
        Self {
            http,
            token,
            base_url: V3_ENDPOINT_BASE.to_string(),
        }
    }

    /// Test-only seam: points the client at a local mock server instead of
    /// the real upstream so the stale-token retry loop can be exercised over
    /// actual HTTP.
    #[cfg(test)]
    fn with_base_url(http: reqwest::Client, token: std::sync::Arc<std::sync::RwLock<String>>, base_url: String) -> Self {
        Self { http, token, base_url }
    }

    fn current_token(&self) -> String {
        self.token.read().expect("v3 token lock poisoned").clone()
    }

    fn set_token(&self, token: String) {
        *self.token.write().expect("v3 token lock poisoned") = token;
    }

    async fn call(&self, method: &str, path: &str, body: Option<&Value>) -> ClientResult<WrappedResponse> {
        let url = format!("{}{path}", self.base_url);
        let mut req = self
            .http
            .request(
                method.parse().map_err(|_| ClientError::Transport(format!("bad method {method}")))?,
                &url,
            )
            .bearer_auth(self.current_token());
        if let Some(b) = body {
            req = req.json(b);
        }
        let response = req.send().await.map_err(|e| ClientError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await.map_err(|e| ClientError::Transport(e.to_string()))?.to_vec();
        Ok(WrappedResponse { status, headers, body })
    }

    /// Runs one HTTP call with the stale-token retry loop: on
    /// `ERR_403_DEVELOPER_INACTIVE`, clears the cached token, asks
    /// `refresher` for a fresh one, and retries — up to
    /// `STALE_TOKEN_MAX_ATTEMPTS` times. Any other response (including a
    /// differently-flavored 403) is returned as-is without retry.
    pub async fn fetch_with_retry(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
        refresher: &dyn TokenRefresher,
    ) -> ClientResult<WrappedResponse> {
        for attempt in 0..STALE_TOKEN_MAX_ATTEMPTS {
            let response = self.call(method, path, body).await?;
            if !response.is_stale_token_error() {
                return Ok(response);
            }
            tracing::debug!(attempt, path, "stale V3 token, refreshing and retrying");
            self.set_token(String::new());
            let fresh = refresher
                .refresh()
                .await
                .map_err(|e| ClientError::TokenAcquisition(e.to_string()))?;
            self.set_token(fresh.access_token);
        }
        Err(ClientError::StaleTokenExhausted {
            attempts: STALE_TOKEN_MAX_ATTEMPTS,
        })
    }

    pub async fn fetch_any(&self, path: &str, refresher: &dyn TokenRefresher) -> ClientResult<WrappedResponse> {
        self.fetch_with_retry("GET", path, None, refresher).await
    }

    pub async fn delete_any(&self, path: &str, refresher: &dyn TokenRefresher) -> ClientResult<WrappedResponse> {
        self.fetch_with_retry("DELETE", path, None, refresher).await
    }

    pub async fn post_any(&self, path: &str, body: &Value, refresher: &dyn TokenRefresher) -> ClientResult<WrappedResponse> {
        self.fetch_with_retry("POST", path, Some(body), refresher).await
    }

    pub async fn put_any(&self, path: &str, body: &Value, refresher: &dyn TokenRefresher) -> ClientResult<WrappedResponse> {
        self.fetch_with_retry("PUT", path, Some(body), refresher).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingRefresher {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self) -> ClientResult<AcquiredToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AcquiredToken {
                access_token: "fresh".to_string(),
                obtained_unix: 0,
                expiry_unix: 3600,
            })
        }
    }

    #[tokio::test]
    async fn fetch_with_retry_refreshes_once_on_stale_token_then_succeeds() {
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/areas/a1"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(
                ResponseTemplate::new(403).insert_header("X-Mashery-Error-Code", "ERR_403_DEVELOPER_INACTIVE"),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/areas/a1"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}"))
            .mount(&server)
            .await;

        let token = std::sync::Arc::new(std::sync::RwLock::new("stale".to_string()));
        let client = V3Client::with_base_url(reqwest::Client::new(), token, server.uri());
        let refresher = CountingRefresher { calls: AtomicU32::new(0) };

        let response = client.fetch_with_retry("GET", "/areas/a1", None, &refresher).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"{\"ok\":true}");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_with_retry_gives_up_after_max_attempts_of_continuous_staleness() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/areas/a1"))
            .respond_with(
                ResponseTemplate::new(403).insert_header("X-Mashery-Error-Code", "ERR_403_DEVELOPER_INACTIVE"),
            )
            .mount(&server)
            .await;

        let token = std::sync::Arc::new(std::sync::RwLock::new("stale".to_string()));
        let client = V3Client::with_base_url(reqwest::Client::new(), token, server.uri());
        let refresher = CountingRefresher { calls: AtomicU32::new(0) };

        let err = client.fetch_with_retry("GET", "/areas/a1", None, &refresher).await.unwrap_err();
        assert!(matches!(err, ClientError::StaleTokenExhausted { attempts } if attempts == STALE_TOKEN_MAX_ATTEMPTS));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), STALE_TOKEN_MAX_ATTEMPTS as u32);
    }

    #[test]
    fn stale_token_detection() {
        let resp = WrappedResponse {
            status: 403,
            headers: vec![("X-Mashery-Error-Code".to_string(), "ERR_403_DEVELOPER_INACTIVE".to_string())],
            body: vec![],
        };
        assert!(resp.is_stale_token_error());

        let other_403 = WrappedResponse {
            status: 403,
            headers: vec![],
            body: vec![],
        };
        assert!(!other_403.is_stale_token_error());
    }
}
