//! Proxy and CLI rendering stages (§4.7 Proxy V2/V3, CLI V3 CRUD, CLI V2; §4.8
//! Proxy rendering).
//!
//! Grounded on `path_proxy_v2.go`/`path_proxy_v3.go`'s `renderProxiedResponse`
//! and `transformers_v3.go`'s `bounceErrorCodes`/list-rendering helpers
//! (`renderKeyList`, `renderKeyInfo`, `renderSingleObject`, `renderCount`).

use mashery_core::{CoreError, RequestContext, Stage, StageOutcome};
use serde_json::{Value, json};

use crate::heap::ApiResponseHeap;
use crate::response::EngineResponse;

/// Echoed verbatim in every proxy-mode response's `X-Proxy-Mode` header.
const PLUGIN_VERSION: &str = "mashery-secrets-engine/0.1.0";

/// `renderProxiedResponse`: the raw upstream response, unmodified beyond a
/// handful of header remaps. Proxy mode never reinterprets upstream status —
/// a 403 or 404 from the upstream is returned to the caller as-is (§4.7).
pub fn render_proxy_response() -> impl Stage<ApiResponseHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut ApiResponseHeap| async move {
        let response = heap.response.as_ref().expect("upstream call ran first");
        let content_type = response.header("Content-Type").unwrap_or("text/plain").to_string();

        let mut out = EngineResponse::new()
            .with("status", json!(response.status))
            .with("content_type", json!(content_type))
            .with("body", json!(String::from_utf8_lossy(&response.body).into_owned()))
            .with_header("X-Proxy-Mode", PLUGIN_VERSION);

        for (name, value) in &response.headers {
            if name.eq_ignore_ascii_case("date") {
                out = out.with_header("X-Server-Date", value.clone());
            } else if name.starts_with("X-") || name.starts_with("x-") || name.starts_with("WWW-") || name.starts_with("www-") {
                out = out.with_header(name.clone(), value.clone());
            }
        }

        Ok(StageOutcome::Respond(out))
    }
}

/// The four CLI render modes §4.8 names beyond plain proxying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliRenderMode {
    /// Indexes a parsed JSON array by `id`, rendering only the ids (Vault's
    /// `keys` list convention).
    ListOfIds,
    /// Same indexing, but keeps the full object per id.
    ArrayOfObjects,
    /// The upstream body is already a single JSON object; fields pass through verbatim.
    SingleObject,
    /// Reads `X-Total-Count`; `-1` when the header is absent or unparsable.
    ObjectCount,
}

fn parse_body(body: &[u8]) -> Result<Value, ()> {
    serde_json::from_slice(body).map_err(|_| ())
}

/// `renderKeyList`/`renderKeyInfo`/`renderSingleObject`/`renderCount`, unified
/// behind one stage parameterized by `mode` since all four share the same
/// "unparsable JSON becomes a warning, not a hard error" fallback.
pub fn render_cli(mode: CliRenderMode) -> impl Stage<ApiResponseHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut ApiResponseHeap| async move {
        let response = heap.response.as_ref().expect("upstream call ran first");

        if mode == CliRenderMode::ObjectCount {
            let count = response
                .header("X-Total-Count")
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(-1);
            return Ok(StageOutcome::Respond(EngineResponse::new().with("count", json!(count))));
        }

        let parsed = match parse_body(&response.body) {
            Ok(v) => v,
            Err(()) => {
                let out = EngineResponse::new()
                    .with("unparsed_body", json!(String::from_utf8_lossy(&response.body).into_owned()))
                    .with_warning("upstream response body was not valid JSON");
                return Ok(StageOutcome::Respond(out));
            }
        };

        match mode {
            CliRenderMode::SingleObject => {
                let mut out = EngineResponse::new();
                if let Value::Object(map) = parsed {
                    for (k, v) in map {
                        out = out.with(k, v);
                    }
                } else {
                    out = out.with("value", parsed);
                }
                Ok(StageOutcome::Respond(out))
            }
            CliRenderMode::ListOfIds | CliRenderMode::ArrayOfObjects => {
                let items = match &parsed {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };

                let mut ids = Vec::with_capacity(items.len());
                let mut warnings = Vec::new();
                let mut key_info = serde_json::Map::new();
                for (idx, item) in items.iter().enumerate() {
                    match item.get("id") {
                        Some(id) => {
                            ids.push(id.clone());
                            if mode == CliRenderMode::ArrayOfObjects {
                                key_info.insert(id.as_str().map(str::to_string).unwrap_or_else(|| id.to_string()), item.clone());
                            }
                        }
                        None => warnings.push(format!("element at index {idx} has no id field")),
                    }
                }

                let mut out = EngineResponse::new().with("keys", json!(ids));
                if mode == CliRenderMode::ArrayOfObjects {
                    out = out.with("key_info", Value::Object(key_info));
                }
                for w in warnings {
                    out = out.with_warning(w);
                }
                if let Some(total) = response.header("X-Total-Count").and_then(|v| v.parse::<usize>().ok()) {
                    if total != ids.len() {
                        out = out.with_warning(format!("X-Total-Count ({total}) disagrees with the rendered list length ({})", ids.len()));
                    }
                }
                Ok(StageOutcome::Respond(out))
            }
            CliRenderMode::ObjectCount => unreachable!("handled above"),
        }
    }
}

/// `bounceErrorCodes`: CLI mode's upstream-failure translation, distinct from
/// proxy mode's pass-through. Runs ahead of the render stages above.
pub fn bounce_error_codes() -> impl Stage<ApiResponseHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut ApiResponseHeap| async move {
        let response = heap.response.as_ref().expect("upstream call ran first");
        match response.status {
            200..=299 => Ok(StageOutcome::Continue),
            403 => Err(CoreError::invariant("access denied")),
            404 => Err(CoreError::not_found("upstream resource")),
            other => Err(CoreError::invariant(format!("unsupported upstream status {other}"))),
        }
    }
}

/// `blockCLIWriteUnlessEnabled`: gates POST/PUT/DELETE CLI calls behind the
/// mount's `cli_write_enabled` flag (§4.7 CLI V3 CRUD).
pub fn block_unless_cli_write_enabled(cli_write_enabled: bool, method: &str) -> impl Stage<ApiResponseHeap, EngineResponse> + use<> {
    let blocked = !cli_write_enabled && !method.eq_ignore_ascii_case("GET");
    move |_ctx: &RequestContext, _heap: &mut ApiResponseHeap| async move {
        if blocked {
            return Err(CoreError::invariant("CLI write operations are disabled for this mount"));
        }
        Ok(StageOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mashery_client::v3::WrappedResponse;

    fn heap_with(status: u16, headers: Vec<(&str, &str)>, body: &str) -> ApiResponseHeap {
        ApiResponseHeap {
            response: Some(WrappedResponse {
                status,
                headers: headers.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                body: body.as_bytes().to_vec(),
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn proxy_response_echoes_x_and_www_headers_and_remaps_date() {
        let ctx = RequestContext::new("proxy_v3", "roles/r1/proxy/v3/foo");
        let mut heap = heap_with(
            200,
            vec![("Date", "Tue"), ("X-Mashery-Responder", "prod"), ("WWW-Authenticate", "Bearer"), ("Content-Type", "application/json")],
            "{}",
        );
        let out = render_proxy_response().run(&ctx, &mut heap).await.unwrap();
        match out {
            StageOutcome::Respond(resp) => {
                assert!(resp.headers.contains_key("X-Server-Date"));
                assert!(resp.headers.contains_key("X-Mashery-Responder"));
                assert!(resp.headers.contains_key("WWW-Authenticate"));
                assert!(resp.headers.contains_key("X-Proxy-Mode"));
            }
            _ => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn list_of_ids_warns_on_missing_id_without_failing() {
        let ctx = RequestContext::new("cli_v3", "roles/r1/v3/applications");
        let mut heap = heap_with(200, vec![], r#"[{"id":"a"},{"name":"no-id"}]"#);
        let out = render_cli(CliRenderMode::ListOfIds).run(&ctx, &mut heap).await.unwrap();
        match out {
            StageOutcome::Respond(resp) => {
                assert_eq!(resp.data["keys"], json!(["a"]));
                assert_eq!(resp.warnings.len(), 1);
            }
            _ => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn total_count_mismatch_adds_a_reconciliation_warning() {
        let ctx = RequestContext::new("cli_v3", "roles/r1/v3/applications");
        let mut heap = heap_with(200, vec![("X-Total-Count", "5")], r#"[{"id":"a"}]"#);
        let out = render_cli(CliRenderMode::ListOfIds).run(&ctx, &mut heap).await.unwrap();
        match out {
            StageOutcome::Respond(resp) => {
                assert_eq!(resp.data["keys"], json!(["a"]));
                assert!(resp.warnings.iter().any(|w| w.contains("X-Total-Count")));
            }
            _ => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn unparsable_body_becomes_a_warning_not_an_error() {
        let ctx = RequestContext::new("cli_v3", "roles/r1/v3/applications");
        let mut heap = heap_with(200, vec![], "not json");
        let out = render_cli(CliRenderMode::SingleObject).run(&ctx, &mut heap).await.unwrap();
        match out {
            StageOutcome::Respond(resp) => {
                assert_eq!(resp.data["unparsed_body"], json!("not json"));
                assert_eq!(resp.warnings.len(), 1);
            }
            _ => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn object_count_reads_x_total_count_header() {
        let ctx = RequestContext::new("cli_v3", "roles/r1/v3/applications");
        let mut heap = heap_with(200, vec![("X-Total-Count", "42")], "ignored");
        let out = render_cli(CliRenderMode::ObjectCount).run(&ctx, &mut heap).await.unwrap();
        match out {
            StageOutcome::Respond(resp) => assert_eq!(resp.data["count"], json!(42)),
            _ => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn object_count_defaults_to_negative_one_without_header() {
        let ctx = RequestContext::new("cli_v3", "roles/r1/v3/applications");
        let mut heap = heap_with(200, vec![], "ignored");
        let out = render_cli(CliRenderMode::ObjectCount).run(&ctx, &mut heap).await.unwrap();
        match out {
            StageOutcome::Respond(resp) => assert_eq!(resp.data["count"], json!(-1)),
            _ => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn bounce_error_codes_maps_403_and_404() {
        let ctx = RequestContext::new("cli_v3", "roles/r1/v3/applications");
        let mut heap = heap_with(403, vec![], "");
        let err = bounce_error_codes().run(&ctx, &mut heap).await.unwrap_err();
        assert!(matches!(err, CoreError::StateInvariant(_)));

        let mut heap = heap_with(404, vec![], "");
        let err = bounce_error_codes().run(&ctx, &mut heap).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
