use thiserror::Error;

/// Crypto/PEM subsystem failures. All variants map to the `CryptoFailure`
/// error kind at the engine boundary — user-visible, never fatal to the
/// process.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("malformed PEM: {0}")]
    MalformedPem(String),

    #[error("unexpected PEM block type: expected {expected}, got {actual}")]
    WrongPemType { expected: &'static str, actual: String },

    #[error("recipient certificate is not yet valid (not-before is in the future)")]
    CertificateNotYetValid,

    #[error("recipient certificate has expired")]
    CertificateExpired,

    #[error("certificate parse failure: {0}")]
    CertificateParse(String),

    #[error("key generation failure: {0}")]
    KeyGeneration(String),

    #[error("encryption failure: {0}")]
    Encryption(String),

    #[error("decryption failure: {0}")]
    Decryption(String),

    #[error("compression failure: {0}")]
    Compression(String),

    #[error("invalid duration expression: {0}")]
    InvalidDuration(String),

    #[error("invalid pin descriptor: {0}")]
    InvalidPin(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
