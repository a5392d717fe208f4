use thiserror::Error;

/// Upstream client layer failures.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("upstream returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("access denied by upstream (stale token exhausted {attempts} attempts)")]
    StaleTokenExhausted { attempts: u32 },

    #[error("token acquisition failed: {0}")]
    TokenAcquisition(String),

    #[error("TLS pinning rejected the presented certificate chain: {0}")]
    PinRejected(String),

    #[error("certificate parse failure: {0}")]
    CertificateParse(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
