//! TLS verification modes (C3/C10): a `rustls::ClientConfig` per
//! `TlsPinningMode`, wrapping the default webpki chain validation with an
//! additional pin check drawn from `pin::chain_is_accepted`.
//!
//! Grounded on the donor's `transport.DefaultTLSConfig()` / `TLSPinner`
//! selection in `data_structs.go`'s `EffectiveTLSConfiguration`; realized here
//! over `rustls::ClientConfig` and a custom `ServerCertVerifier` rather than
//! Go's `tls.Config.VerifyPeerCertificate` hook, since rustls exposes the
//! same seam as a trait instead of a callback.

use std::sync::Arc;

use mashery_core::TlsPinningConfig;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

use crate::error::{ClientError, ClientResult};
use crate::pin::chain_is_accepted;

/// Delegates ordinary chain/hostname validation to a `WebPkiServerVerifier`
/// built over `roots`, then additionally requires the presented chain to
/// satisfy `pins` (leaf/issuer/root).
#[derive(Debug)]
struct PinningVerifier {
    inner: Arc<WebPkiServerVerifier>,
    pins: TlsPinningConfig,
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let verified =
            self.inner
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;

        let mut chain_der: Vec<Vec<u8>> = Vec::with_capacity(intermediates.len() + 1);
        chain_der.push(end_entity.as_ref().to_vec());
        chain_der.extend(intermediates.iter().map(|c| c.as_ref().to_vec()));

        match chain_is_accepted(&chain_der, &self.pins) {
            Ok(true) => Ok(verified),
            Ok(false) => Err(rustls::Error::General(
                "certificate chain did not satisfy configured pins".into(),
            )),
            Err(e) => Err(rustls::Error::General(e.to_string())),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Accepts any certificate chain and hostname. `insecure` pinning mode only —
/// diagnostic use.
#[derive(Debug)]
struct AcceptAnyVerifier;

impl ServerCertVerifier for AcceptAnyVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}

fn default_root_store() -> RootCertStore {
    RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned())
}

fn system_root_store() -> ClientResult<RootCertStore> {
    let mut store = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        tracing::warn!(error = %err, "error loading a native root certificate");
    }
    for cert in native.certs {
        store
            .add(cert)
            .map_err(|e| ClientError::CertificateParse(e.to_string()))?;
    }
    Ok(store)
}

/// Builds the `rustls::ClientConfig` for one of the four pinning modes.
/// `custom` with no configured pins is the caller's responsibility to have
/// already resolved to `default` (see `BackendConfiguration::effective_tls_pinning`).
pub fn client_config_for(
    mode: mashery_core::TlsPinningMode,
    pins: &TlsPinningConfig,
) -> ClientResult<rustls::ClientConfig> {
    use mashery_core::TlsPinningMode::*;

    let builder = rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| ClientError::CertificateParse(e.to_string()))?;

    let config = match mode {
        Insecure => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyVerifier))
            .with_no_client_auth(),
        System => {
            let roots = Arc::new(system_root_store()?);
            let inner = WebPkiServerVerifier::builder(roots)
                .build()
                .map_err(|e| ClientError::CertificateParse(e.to_string()))?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(PinningVerifier {
                    inner,
                    pins: pins.clone(),
                }))
                .with_no_client_auth()
        }
        Default | Custom => {
            let roots = Arc::new(default_root_store());
            let inner = WebPkiServerVerifier::builder(roots)
                .build()
                .map_err(|e| ClientError::CertificateParse(e.to_string()))?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(PinningVerifier {
                    inner,
                    pins: pins.clone(),
                }))
                .with_no_client_auth()
        }
    };

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_builds_a_config() {
        let cfg = client_config_for(mashery_core::TlsPinningMode::Default, &TlsPinningConfig::default());
        assert!(cfg.is_ok());
    }

    #[test]
    fn insecure_mode_builds_a_config() {
        let cfg = client_config_for(mashery_core::TlsPinningMode::Insecure, &TlsPinningConfig::default());
        assert!(cfg.is_ok());
    }
}
