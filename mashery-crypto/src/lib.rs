//! PEM framing, self-signed certificates, the RSA-OAEP role-data envelope,
//! gzip, the V2 MD5 signature, and the export-term duration grammar.

pub mod cert;
pub mod duration;
pub mod envelope;
pub mod error;
pub mod generate;
pub mod pem;
pub mod signature;

pub use cert::{RECIPIENT_CERT_LIFETIME_SECS, mint_recipient_certificate, validate_recipient_certificate};
pub use duration::{ParsedDuration, parse_export_term};
pub use envelope::{
    ExportedRoleKeys, ExportedUsageTerm, RoleDataExchange, decrypt_envelope, encrypt_envelope,
    gzip_compress, gzip_decompress, wrap_role_data_pem,
};
pub use error::{CryptoError, CryptoResult};
pub use generate::{ROLE_KEY_BITS, deserialize_private_key, generate_role_keypair, serialize_private_key};
pub use pem::{PemBlock, ROLE_DATA_TAG, ROLE_RECIPIENT_TAG};
pub use signature::v2_signature;
