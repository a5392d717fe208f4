//! Process-wide tunables: OAEP label, proxy, TLS-pinning policy, pin chain descriptors.

use serde::{Deserialize, Serialize};

/// Replaces a configured network-latency hint of `0` when forming client parameters.
pub const DEFAULT_NETWORK_LATENCY_MS: u32 = 147;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsPinningMode {
    Default,
    System,
    Custom,
    Insecure,
}

impl Default for TlsPinningMode {
    fn default() -> Self {
        TlsPinningMode::Default
    }
}

/// A pin descriptor for one chain position (leaf, issuer, or root). Any
/// non-empty subset of the three fields is a constraint; an empty descriptor
/// imposes no constraint at that level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PinDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Vec<u8>>,
}

impl PinDescriptor {
    pub fn is_empty(&self) -> bool {
        self.common_name.is_none() && self.serial_number.is_none() && self.fingerprint.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsPinningConfig {
    #[serde(default)]
    pub leaf: PinDescriptor,
    #[serde(default)]
    pub issuer: PinDescriptor,
    #[serde(default)]
    pub root: PinDescriptor,
}

impl TlsPinningConfig {
    pub fn all_empty(&self) -> bool {
        self.leaf.is_empty() && self.issuer.is_empty() && self.root.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyAuthMode {
    None,
    Basic,
}

impl Default for ProxyAuthMode {
    fn default() -> Self {
        ProxyAuthMode::None
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfiguration {
    /// Random 32 bytes generated once at first mount; used as the RSA-OAEP label.
    pub oaep_label: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_server_url: Option<String>,
    #[serde(default)]
    pub proxy_auth_mode: ProxyAuthMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_password: Option<String>,
    #[serde(default)]
    pub cli_write_enabled: bool,
    /// Milliseconds; 0 reads as `DEFAULT_NETWORK_LATENCY_MS` (see `effective_network_latency`).
    #[serde(default)]
    pub network_latency_ms: u32,
    #[serde(default)]
    pub tls_pinning: TlsPinningMode,
    #[serde(default)]
    pub tls_pins: TlsPinningConfig,
}

impl BackendConfiguration {
    pub fn new(oaep_label: Vec<u8>) -> Self {
        Self {
            oaep_label,
            ..Default::default()
        }
    }

    pub fn effective_network_latency(&self) -> u32 {
        if self.network_latency_ms == 0 {
            DEFAULT_NETWORK_LATENCY_MS
        } else {
            self.network_latency_ms
        }
    }

    /// `custom` with no pin constraints anywhere silently falls back to `default`.
    pub fn effective_tls_pinning(&self) -> TlsPinningMode {
        match self.tls_pinning {
            TlsPinningMode::Custom if self.tls_pins.all_empty() => TlsPinningMode::Default,
            other => other,
        }
    }

    pub fn proxy_server_url(&self) -> Option<&str> {
        self.proxy_server_url.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_with_no_pins_falls_back_to_default() {
        let cfg = BackendConfiguration {
            tls_pinning: TlsPinningMode::Custom,
            ..Default::default()
        };
        assert_eq!(cfg.effective_tls_pinning(), TlsPinningMode::Default);
    }

    #[test]
    fn custom_with_any_pin_stays_custom() {
        let mut cfg = BackendConfiguration {
            tls_pinning: TlsPinningMode::Custom,
            ..Default::default()
        };
        cfg.tls_pins.leaf.common_name = Some("api.example.com".into());
        assert_eq!(cfg.effective_tls_pinning(), TlsPinningMode::Custom);
    }

    #[test]
    fn zero_latency_reads_as_default() {
        let cfg = BackendConfiguration::default();
        assert_eq!(cfg.effective_network_latency(), DEFAULT_NETWORK_LATENCY_MS);
    }
}
