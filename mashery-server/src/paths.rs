//! Path surface (C9): binds the table of path patterns in §6 to the
//! `Engine` operation each one invokes, and the field schema each expects.
//!
//! The pattern-matching mechanism itself (turning a raw incoming path string
//! into a dispatch decision) is the thin, non-core part of this module —
//! it stands in for the host's own path router (§1 Out of scope), which in
//! a real mount would walk a framework-level pattern tree instead of the
//! straight segment match below. What *is* core, and grounded in §6's path
//! table, is which fields each pattern accepts and which `Engine` call it
//! binds to.

use mashery_core::{PinDescriptor, RequestContext};
use mashery_engine::Engine;
use mashery_engine::stages::config::ConfigFields;
use mashery_engine::stages::exchange::ExportParams;
use mashery_engine::stages::proxy::CliRenderMode;
use mashery_engine::stages::role::RoleKeyFields;
use mashery_engine::{EngineResponse, heap::PinLevel};
use serde_json::Value;

use crate::contract::{Operation, Request};
use crate::error::{DispatchError, DispatchResult, ServerError};

fn segments(path: &str) -> Vec<&str> {
    path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect()
}

fn require_string(req: &Request, key: &str) -> DispatchResult<String> {
    req.fields().get_string(key).ok_or_else(|| ServerError::MissingField(key.to_string()).into())
}

fn pin_level(segment: &str, path: &str) -> DispatchResult<PinLevel> {
    match segment {
        "leaf" => Ok(PinLevel::Leaf),
        "issuer" => Ok(PinLevel::Issuer),
        "root" => Ok(PinLevel::Root),
        _ => Err(ServerError::NoRoute(path.to_string()).into()),
    }
}

fn pin_descriptor(req: &Request) -> DispatchResult<PinDescriptor> {
    Ok(PinDescriptor {
        common_name: req.fields().get_string("common_name"),
        serial_number: req.fields().get_hex_bytes("serial_number")?,
        fingerprint: req.fields().get_hex_bytes("fingerprint")?,
    })
}

fn role_key_fields(req: &Request) -> RoleKeyFields {
    let f = req.fields();
    RoleKeyFields {
        area_id: f.get_string("area_id"),
        area_nid: f.get_i64("area_nid"),
        api_key: f.get_string("api_key"),
        key_secret: f.get_string("secret").or_else(|| f.get_string("key_secret")),
        username: f.get_string("username"),
        password: f.get_string("password"),
        max_qps: f.get_i64("max_qps").map(|v| v as i32),
    }
}

fn config_fields(req: &Request) -> DispatchResult<ConfigFields> {
    let f = req.fields();
    let proxy_auth_mode = match f.get_string("proxy_auth_mode").as_deref() {
        None => None,
        Some("none") => Some(mashery_core::ProxyAuthMode::None),
        Some("basic") => Some(mashery_core::ProxyAuthMode::Basic),
        Some(_) => return Err(ServerError::InvalidField("proxy_auth_mode".to_string()).into()),
    };
    let tls_pinning = match f.get_string("tls_pinning").as_deref() {
        None => None,
        Some("default") => Some(mashery_core::TlsPinningMode::Default),
        Some("system") => Some(mashery_core::TlsPinningMode::System),
        Some("custom") => Some(mashery_core::TlsPinningMode::Custom),
        Some("insecure") => Some(mashery_core::TlsPinningMode::Insecure),
        Some(_) => return Err(ServerError::InvalidField("tls_pinning".to_string()).into()),
    };
    Ok(ConfigFields {
        oaep_label: f.get_hex_bytes("oaep_label")?,
        proxy_server_url: f.get_string("proxy_server_url"),
        proxy_auth_mode,
        proxy_username: f.get_string("proxy_username"),
        proxy_password: f.get_string("proxy_password"),
        cli_write_enabled: f.get_bool("cli_write_enabled"),
        network_latency_ms: f.get_i64("network_latency_ms").map(|v| v as u32),
        tls_pinning,
    })
}

fn export_params(req: &Request) -> DispatchResult<ExportParams> {
    let f = req.fields();
    Ok(ExportParams {
        recipient_pem: require_string(req, "pem")?,
        explicit_term: f.get_string("explicit_term"),
        explicit_num_uses: f.get_i64("explicit_num_uses"),
        explicit_qps: f.get_i64("explicit_qps").map(|v| v as i32),
        v2_only: f.get_bool("v2_only").unwrap_or(false),
        v3_only: f.get_bool("v3_only").unwrap_or(false),
        force_proxy_mode: f.get_bool("force_proxy_mode").unwrap_or(false),
        exportable: f.get_bool("exportable").unwrap_or(false),
    })
}

/// `GET`/`POST`/`PUT`/`DELETE` the operation maps to for a CLI V3 call; `List`
/// reads the same way as `Read` (no upstream verb for "list", it is a render
/// choice — see `cli_v3_render_mode`).
fn http_method_for(op: Operation) -> &'static str {
    match op {
        Operation::Create => "POST",
        Operation::Read | Operation::List => "GET",
        Operation::Update => "PUT",
        Operation::Delete => "DELETE",
    }
}

/// Chooses a CLI render mode from the operation and an explicit `count`
/// override field. This mapping is this crate's own judgment call (§9 Open
/// Questions has no guidance here): a `List` renders as `keys` unless the
/// caller set `count=true`, anything else renders as a single object.
fn cli_v3_render_mode(op: Operation, req: &Request) -> CliRenderMode {
    if req.fields().get_bool("count").unwrap_or(false) {
        return CliRenderMode::ObjectCount;
    }
    match op {
        Operation::List => CliRenderMode::ListOfIds,
        _ => CliRenderMode::SingleObject,
    }
}

/// Binds a `Request` to the `Engine` call §6's path table says it belongs to,
/// and runs it. This is the one function in the crate that actually needs a
/// concrete path-matching mechanism; everything upstream of it (route
/// registration, field-schema validation against a declared shape) is the
/// host's own path router, out of scope per §1.
pub async fn dispatch(engine: &Engine, req: &Request) -> DispatchResult<EngineResponse> {
    let segs = segments(&req.path);
    match segs.as_slice() {
        ["config"] => match req.operation {
            Operation::Read => Ok(engine.read_backend_config(&RequestContext::new("read_config", req.path.clone())).await?),
            Operation::Update => Ok(engine
                .write_backend_config(&RequestContext::new("write_config", req.path.clone()), config_fields(req)?)
                .await?),
            op => Err(ServerError::UnsupportedOperation { path: req.path.clone(), op: op_name(&op) }.into()),
        },
        ["config", "certs", level] => {
            let level = pin_level(level, &req.path)?;
            match req.operation {
                Operation::Update => Ok(engine
                    .set_pin(&RequestContext::new("set_pin", req.path.clone()), level, pin_descriptor(req)?)
                    .await?),
                Operation::Delete => Ok(engine.clear_pin(&RequestContext::new("clear_pin", req.path.clone()), level).await?),
                op => Err(ServerError::UnsupportedOperation { path: req.path.clone(), op: op_name(&op) }.into()),
            }
        }
        ["roles"] => match req.operation {
            Operation::List => Ok(engine.list_roles().await?),
            op => Err(ServerError::UnsupportedOperation { path: req.path.clone(), op: op_name(&op) }.into()),
        },
        ["roles", name] => {
            let ctx = RequestContext::new("role", req.path.clone());
            match req.operation {
                Operation::Create => Ok(engine.create_role(&ctx, name, role_key_fields(req)).await?),
                Operation::Read => Ok(engine.read_role(&ctx, name).await?),
                Operation::Update => Ok(engine.update_role(&ctx, name, role_key_fields(req)).await?),
                Operation::Delete => Ok(engine.delete_role(&ctx, name).await?),
                op => Err(ServerError::UnsupportedOperation { path: req.path.clone(), op: op_name(&op) }.into()),
            }
        }
        ["roles", name, "grant"] => {
            if req.operation != Operation::Read {
                return Err(ServerError::UnsupportedOperation { path: req.path.clone(), op: op_name(&req.operation) }.into());
            }
            let ctx = RequestContext::new("grant", req.path.clone());
            let as_lease = req.fields().get_bool("lease").unwrap_or(false);
            match req.fields().get_i64("api").unwrap_or(3) {
                2 => Ok(engine.issue_grant_v2(&ctx, name, as_lease).await?),
                _ => Ok(engine.issue_grant_v3(&ctx, name, as_lease).await?),
            }
        }
        ["roles", name, "token"] => {
            let ctx = RequestContext::new("token", req.path.clone());
            match req.operation {
                Operation::Read => Ok(engine.fetch_cached_token(&ctx, name).await?),
                Operation::Delete => Ok(engine.forget_cached_token(&ctx, name).await?),
                op => Err(ServerError::UnsupportedOperation { path: req.path.clone(), op: op_name(&op) }.into()),
            }
        }
        ["roles", name, "pem"] => {
            if req.operation != Operation::Read {
                return Err(ServerError::UnsupportedOperation { path: req.path.clone(), op: op_name(&req.operation) }.into());
            }
            let pem = engine.get_export_pem(name, req.fields().get_string("common_name").as_deref()).await?;
            Ok(EngineResponse::new().with("pem", Value::String(pem)))
        }
        ["roles", name, "export"] => {
            if req.operation != Operation::Update {
                return Err(ServerError::UnsupportedOperation { path: req.path.clone(), op: op_name(&req.operation) }.into());
            }
            let ctx = RequestContext::new("export_role", req.path.clone());
            let (pem, warnings) = engine.export_role(&ctx, name, export_params(req)?).await?;
            let mut out = EngineResponse::new().with("pem", Value::String(pem));
            for w in warnings {
                out = out.with_warning(w);
            }
            Ok(out)
        }
        ["roles", name, "import"] => {
            if req.operation != Operation::Update {
                return Err(ServerError::UnsupportedOperation { path: req.path.clone(), op: op_name(&req.operation) }.into());
            }
            let ctx = RequestContext::new("import_role", req.path.clone());
            Ok(engine.import_role(&ctx, name, &require_string(req, "pem")?).await?)
        }
        ["roles", name, "v2"] | ["roles", name, "v2", _] => {
            if req.operation != Operation::Create {
                return Err(ServerError::UnsupportedOperation { path: req.path.clone(), op: op_name(&req.operation) }.into());
            }
            let ctx = RequestContext::new("cli_v2", req.path.clone());
            let method = match segs.get(3) {
                Some(m) => m.to_string(),
                None => require_string(req, "method")?,
            };
            let params = req.data.get("params").cloned().unwrap_or(Value::Null);
            Ok(engine.cli_v2(&ctx, name, &method, params).await?)
        }
        ["roles", name, "v3", rest @ ..] if !rest.is_empty() => {
            let ctx = RequestContext::new("cli_v3", req.path.clone());
            let sub_path = rest.join("/");
            let body = req.data.get("body").cloned();
            let mode = cli_v3_render_mode(req.operation, req);
            Ok(engine.cli_v3(&ctx, name, http_method_for(req.operation), &sub_path, body, mode).await?)
        }
        ["roles", name, "proxy", "v2"] => {
            if req.operation != Operation::Create {
                return Err(ServerError::UnsupportedOperation { path: req.path.clone(), op: op_name(&req.operation) }.into());
            }
            let ctx = RequestContext::new("proxy_v2", req.path.clone());
            let method = require_string(req, "method")?;
            let params = req.data.get("params").cloned().unwrap_or(Value::Null);
            Ok(engine.proxy_v2(&ctx, name, &method, params).await?)
        }
        ["roles", name, "proxy", "v3", rest @ ..] if !rest.is_empty() => {
            if req.operation == Operation::List {
                return Err(ServerError::UnsupportedOperation { path: req.path.clone(), op: op_name(&req.operation) }.into());
            }
            let ctx = RequestContext::new("proxy_v3", req.path.clone());
            let sub_path = rest.join("/");
            let body = req.data.get("body").cloned();
            Ok(engine.proxy_v3(&ctx, name, http_method_for(req.operation), &sub_path, body).await?)
        }
        _ => Err(ServerError::NoRoute(req.path.clone()).into()),
    }
}

fn op_name(op: &Operation) -> &'static str {
    match op {
        Operation::Create => "create",
        Operation::Read => "read",
        Operation::Update => "update",
        Operation::Delete => "delete",
        Operation::List => "list",
    }
}
