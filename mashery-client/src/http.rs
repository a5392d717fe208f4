//! Shared HTTP client construction: TLS pinning mode, proxy
//! configuration, and the network-latency hint are all sourced from
//! `BackendConfiguration` and applied identically whether the caller is
//! about to build a V2, V3, or OAuth client.
//!
//! Grounded on `transport.HTTPClientParams` (`plugin.go`'s `GetOAuthHelper`
//! and `GetMasheryV3Client`), which plumbs the same three knobs into every
//! upstream-facing client.

use mashery_core::{BackendConfiguration, ProxyAuthMode};

use crate::error::{ClientError, ClientResult};
use crate::verifier::client_config_for;

/// Builds a `reqwest::Client` configured per `cfg`'s effective TLS pinning
/// mode and proxy settings. Each call produces an independent client; the
/// pool is what amortizes this across requests for the same role.
pub fn build_http_client(cfg: &BackendConfiguration) -> ClientResult<reqwest::Client> {
    let tls_config = client_config_for(cfg.effective_tls_pinning(), &cfg.tls_pins)?;

    let mut builder = reqwest::Client::builder().use_preconfigured_tls(tls_config);

    if let Some(url) = cfg.proxy_server_url() {
        let mut proxy =
            reqwest::Proxy::all(url).map_err(|e| ClientError::Transport(format!("invalid proxy url: {e}")))?;
        if cfg.proxy_auth_mode == ProxyAuthMode::Basic {
            if let (Some(user), Some(pass)) = (&cfg.proxy_username, &cfg.proxy_password) {
                proxy = proxy.basic_auth(user, pass);
            }
        }
        builder = builder.proxy(proxy);
    } else {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|e| ClientError::Transport(format!("failed to build http client: {e}")))
}
