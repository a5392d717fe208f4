//! End-to-end smoke-test driver (§8, §10.4): exercises every literal
//! end-to-end scenario in the specification straight through the path
//! layer (`mashery_server::dispatch`), the same entry point a real host
//! adapter would call. Not part of the library surface proper — this is
//! the "not core" adapter §1 says a host must supply, kept here so the
//! standalone binary has something runnable without one.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail, ensure};
use mashery_engine::Engine;
use mashery_server::{Operation, Request, dispatch};
use serde_json::{Value, json};

fn data(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

async fn call(engine: &Engine, op: Operation, path: &str, fields: &[(&str, Value)]) -> Result<mashery_engine::EngineResponse> {
    let req = Request::new(op, path).with_data(data(fields));
    dispatch(engine, &req).await.with_context(|| format!("{op:?} {path}"))
}

async fn expect_error(engine: &Engine, op: Operation, path: &str, fields: &[(&str, Value)]) -> Result<String> {
    let req = Request::new(op, path).with_data(data(fields));
    match dispatch(engine, &req).await {
        Ok(resp) => bail!("{op:?} {path} unexpectedly succeeded: {:?}", resp.data),
        Err(e) => Ok(e.to_string()),
    }
}

fn is_lowercase_md5(s: &str) -> bool {
    s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

/// Scenario 1 (§8): create a role, read it back, confirm the derived
/// capability and human-readable term/use fields.
async fn scenario1_create_then_read(engine: &Engine) -> Result<()> {
    call(
        engine,
        Operation::Create,
        "roles/r1",
        &[("area_nid", json!(456)), ("api_key", json!("k")), ("secret", json!("s"))],
    )
    .await?;
    let resp = call(engine, Operation::Read, "roles/r1", &[]).await?;
    ensure!(resp.data["v2_capable"] == json!(true), "r1 should be v2-capable");
    ensure!(resp.data["v3_capable"] == json!(false), "r1 should not be v3-capable");
    ensure!(resp.data["qps"] == json!(2), "default qps should be 2");
    ensure!(resp.data["term"] == json!("\u{221e}"), "fresh role has an unbounded term");
    ensure!(resp.data["term_remaining"] == json!("\u{221e}"), "fresh role has unbounded term");
    ensure!(resp.data["use_remaining"] == json!("\u{221e}"), "fresh role has unbounded use");
    tracing::info!("scenario 1 (create + read) ok");
    Ok(())
}

/// Scenario 2 (§8): a V2 grant carries the area/key pair and a valid MD5 signature.
async fn scenario2_v2_grant(engine: &Engine) -> Result<()> {
    let resp = call(engine, Operation::Read, "roles/r1/grant", &[("api", json!(2))]).await?;
    ensure!(resp.data["area_nid"] == json!(456));
    ensure!(resp.data["api_key"] == json!("k"));
    let sig = resp.data["sig"].as_str().context("sig field should be a string")?;
    ensure!(is_lowercase_md5(sig), "sig {sig:?} should be 32 lowercase hex characters");
    tracing::info!("scenario 2 (v2 grant) ok");
    Ok(())
}

/// Scenario 3 (§8): a role force-proxied in by an import refuses to issue a grant.
async fn scenario3_force_proxy_blocks_grant(engine: &Engine) -> Result<()> {
    call(
        engine,
        Operation::Create,
        "roles/r2-seed",
        &[("area_id", json!("a2")), ("api_key", json!("k2")), ("secret", json!("s2")), ("username", json!("u2")), ("password", json!("p2"))],
    )
    .await?;
    let pem = call(engine, Operation::Read, "roles/r2/pem", &[]).await?.data["pem"].as_str().context("pem")?.to_string();
    let envelope = call(engine, Operation::Update, "roles/r2-seed/export", &[("pem", json!(pem)), ("force_proxy_mode", json!(true))])
        .await?
        .data["pem"]
        .as_str()
        .context("export envelope")?
        .to_string();
    call(engine, Operation::Update, "roles/r2/import", &[("pem", json!(envelope))]).await?;

    let message = expect_error(engine, Operation::Read, "roles/r2/grant", &[("api", json!(3))]).await?;
    ensure!(message.contains("proxy mode"), "expected a proxy-mode error, got {message:?}");
    tracing::info!("scenario 3 (proxy-mode block) ok");
    Ok(())
}

/// Scenario 4 (§8): a role imported with a 2-use quota serves two reads, then
/// refuses the third as depleted.
async fn scenario4_quota_depletion(engine: &Engine) -> Result<()> {
    call(
        engine,
        Operation::Create,
        "roles/r3-seed",
        &[("area_id", json!("a3")), ("api_key", json!("k3")), ("secret", json!("s3")), ("username", json!("u3")), ("password", json!("p3"))],
    )
    .await?;
    let pem = call(engine, Operation::Read, "roles/r3/pem", &[]).await?.data["pem"].as_str().context("pem")?.to_string();
    let envelope = call(engine, Operation::Update, "roles/r3-seed/export", &[("pem", json!(pem)), ("explicit_num_uses", json!(2))])
        .await?
        .data["pem"]
        .as_str()
        .context("export envelope")?
        .to_string();
    call(engine, Operation::Update, "roles/r3/import", &[("pem", json!(envelope))]).await?;

    call(engine, Operation::Read, "roles/r3", &[]).await?;
    call(engine, Operation::Read, "roles/r3", &[]).await?;
    let message = expect_error(engine, Operation::Read, "roles/r3", &[]).await?;
    ensure!(message.contains("depleted"), "expected a depleted-quota error, got {message:?}");
    tracing::info!("scenario 4 (quota depletion) ok");
    Ok(())
}

/// Scenario 5 (§8): round-tripping a role's data through export/import
/// leaves the destination with the explicit term the export carried.
async fn scenario5_export_import_round_trip(engine: &Engine) -> Result<()> {
    call(
        engine,
        Operation::Create,
        "roles/src",
        &[("area_id", json!("a5")), ("api_key", json!("k5")), ("secret", json!("s5")), ("username", json!("u5")), ("password", json!("p5"))],
    )
    .await?;
    let pem1 = call(engine, Operation::Read, "roles/src/pem", &[]).await?.data["pem"].as_str().context("pem-1")?.to_string();
    let pem2 = call(engine, Operation::Update, "roles/dst/export", &[("pem", json!(pem1)), ("explicit_term", json!("3d"))])
        .await?
        .data["pem"]
        .as_str()
        .context("pem-2")?
        .to_string();
    call(engine, Operation::Update, "roles/src/import", &[("pem", json!(pem2))]).await?;

    let resp = call(engine, Operation::Read, "roles/src", &[]).await?;
    let term_remaining = resp.data["term_remaining"].as_str().context("term_remaining")?;
    ensure!(term_remaining != "\u{221e}", "imported role should have a bounded term, got {term_remaining:?}");
    tracing::info!(term_remaining, "scenario 5 (export/import round trip) ok");
    Ok(())
}

/// Scenario 6 (§8): `custom` pinning with no pins configured reads back as
/// `default` in effect while still reporting the desired mode (Q4).
async fn scenario6_pin_fallback(engine: &Engine) -> Result<()> {
    call(engine, Operation::Update, "config", &[("tls_pinning", json!("custom"))]).await?;
    let resp = call(engine, Operation::Read, "config", &[]).await?;
    ensure!(resp.data["tls_pinning (desired)"] == json!("custom"));
    ensure!(resp.data["tls_pinning (effective)"] == json!("default"));
    tracing::info!("scenario 6 (pin fallback) ok");
    Ok(())
}

/// Runs every scenario in order against a single freshly-mounted `Engine`.
/// Scenarios build on roles named after themselves so later ones never
/// depend on earlier ones leaving particular state behind, aside from
/// sharing one mount the way a single engine instance genuinely would.
pub async fn run_all(engine: &Engine) -> Result<()> {
    scenario1_create_then_read(engine).await?;
    scenario2_v2_grant(engine).await?;
    scenario3_force_proxy_blocks_grant(engine).await?;
    scenario4_quota_depletion(engine).await?;
    scenario5_export_import_round_trip(engine).await?;
    scenario6_pin_fallback(engine).await?;
    tracing::info!("all smoke-test scenarios passed");
    Ok(())
}
