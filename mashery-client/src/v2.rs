//! V2 signed JSON-RPC client: a single `object.query`
//! style RPC call signed with `apikey`/`sig` query parameters.
//!
//! Grounded on `transformers_v2.go`'s `verifyVaultV2OperationRequest` /
//! `executeV2CallToRawResponseUsing` and `path_proxy_v2.go`'s proxy path.

use mashery_core::now_unix;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mashery_crypto::v2_signature;

use crate::error::{ClientError, ClientResult};

/// V2 upstream endpoint; area NID is a path segment (Mashery V2 convention).
pub const V2_ENDPOINT_BASE: &str = "https://api.mashery.com/v2/json-rpc";

#[derive(Debug, Clone, Serialize)]
pub struct V2Request {
    pub id: i64,
    pub method: String,
    pub params: Value,
    pub jsonrpc: String,
}

impl Default for V2Request {
    fn default() -> Self {
        Self {
            id: 1,
            method: "object.query".to_string(),
            params: Value::Null,
            jsonrpc: "2.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct V2RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
}

pub struct V2Client {
    http: reqwest::Client,
    area_nid: i64,
    api_key: String,
    key_secret: String,
}

impl V2Client {
    pub fn new(http: reqwest::Client, area_nid: i64, api_key: String, key_secret: String) -> Self {
        Self {
            http,
            area_nid,
            api_key,
            key_secret,
        }
    }

    /// Recomputes the `sig` query parameter fresh for this call.
    fn signature(&self) -> String {
        v2_signature(&self.api_key, &self.key_secret, now_unix())
    }

    pub async fn invoke_raw(&self, request: &V2Request) -> ClientResult<V2RawResponse> {
        let url = format!("{V2_ENDPOINT_BASE}/{}", self.area_nid);
        let response = self
            .http
            .post(&url)
            .query(&[("apikey", self.api_key.as_str()), ("sig", self.signature().as_str())])
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let content_type = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.clone());
        let body = response
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?
            .to_vec();

        Ok(V2RawResponse {
            status,
            body,
            content_type,
            headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_request_is_object_query_jsonrpc_2() {
        let req = V2Request::default();
        assert_eq!(req.method, "object.query");
        assert_eq!(req.jsonrpc, "2.0");
    }
}
