//! Encrypted role-exchange operations (§4.7 Export, Import, Get export PEM).
//!
//! Grounded on `path_role_impexp.go`'s `pathRoleExport`/`pathRoleImport`/
//! `pathRolePEMRead`. Unlike the role/grant stages, these are written as
//! plain async functions rather than formal `Stage<H, R>` chains: the crypto
//! objects they pass between steps (`RsaPrivateKey`, `RsaPublicKey`) don't
//! have the cheap, serializable shape the rest of the heap types share, so
//! threading them through a generic heap would only add ceremony — see
//! DESIGN.md.

use std::collections::BTreeMap;

use mashery_core::{BackendConfiguration, RoleKeys, RoleUsage, Storage, StorageJsonExt, now_unix, paths};
use mashery_crypto::{
    ExportedRoleKeys, ExportedUsageTerm, PemBlock, RoleDataExchange, decrypt_envelope, deserialize_private_key,
    encrypt_envelope, generate_role_keypair, mint_recipient_certificate, parse_export_term, serialize_private_key,
    validate_recipient_certificate, wrap_role_data_pem,
};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};

use crate::error::{Error, EngineResult, ResponseError};

/// Loads the role's private key, generating and persisting one on first use
/// (§4.5: "generated lazily on first export/import request").
async fn load_or_create_private_key(
    storage: &dyn Storage,
    backend_uuid: &str,
    role_name: &str,
) -> EngineResult<RsaPrivateKey> {
    let path = paths::role_private_key(backend_uuid, role_name);
    if let Some(bytes) = storage.read_binary(&path).await? {
        return Ok(deserialize_private_key(&bytes)?);
    }
    let key = generate_role_keypair().await?;
    storage.write_binary(&path, serialize_private_key(&key)?).await?;
    Ok(key)
}

/// `pathRolePEMRead` / "Get export PEM": the role's recipient certificate,
/// minted fresh every call from its (lazily created) keypair.
pub async fn get_export_pem(storage: &dyn Storage, backend_uuid: &str, role_name: &str, common_name: Option<&str>) -> EngineResult<PemBlock> {
    let private_key = load_or_create_private_key(storage, backend_uuid, role_name).await?;
    Ok(mint_recipient_certificate(&private_key, role_name, common_name, now_unix())?)
}

/// Parameters accepted by export (`path_role_impexp.go`'s `pathRoleExportFields`).
#[derive(Debug, Clone, Default)]
pub struct ExportParams {
    pub recipient_pem: String,
    pub explicit_term: Option<String>,
    pub explicit_num_uses: Option<i64>,
    pub explicit_qps: Option<i32>,
    pub v2_only: bool,
    pub v3_only: bool,
    pub force_proxy_mode: bool,
    pub exportable: bool,
}

/// `pathRoleExport`: `readRole → blockIfNotExportable → readRecipientCertificate → renderEncryptedRoleData`.
pub async fn export_role(
    storage: &dyn Storage,
    backend_uuid: &str,
    cfg: &BackendConfiguration,
    role_name: &str,
    params: &ExportParams,
) -> EngineResult<(PemBlock, Vec<String>)> {
    let keys: RoleKeys = storage
        .read_json(&paths::role_keys(backend_uuid, role_name))
        .await?
        .ok_or_else(|| Error::not_found(format!("role {role_name}")))?;
    if !keys.exportable {
        return Err(Error::Response(ResponseError::StateInvariant(
            "this role is not exportable".to_string(),
        )));
    }

    let recipient_block = PemBlock::decode(&params.recipient_pem)?;
    let now = now_unix();
    let recipient_key = validate_recipient_certificate(&recipient_block, now)?;

    let mut warnings = Vec::new();
    let mut explicit_term = 0i64;
    if let Some(term) = &params.explicit_term {
        let parsed = parse_export_term(term, now)?;
        explicit_term = now + parsed.seconds;
        if let Some(w) = parsed.warning {
            warnings.push(w);
        }
    }

    let mut exported_keys = ExportedRoleKeys {
        area_id: keys.area_id.clone(),
        area_nid: keys.area_nid,
        api_key: keys.api_key.clone(),
        key_secret: keys.key_secret.clone(),
        username: keys.username.clone(),
        password: keys.password.clone(),
        max_qps: params.explicit_qps.unwrap_or(keys.max_qps),
        force_proxy_mode: params.force_proxy_mode || keys.force_proxy_mode,
        exportable: params.exportable,
    };
    if params.v2_only {
        exported_keys.area_id.clear();
        exported_keys.username.clear();
        exported_keys.password.clear();
    }
    if params.v3_only {
        exported_keys.area_nid = 0;
    }

    let exchange = RoleDataExchange {
        role_data: exported_keys,
        usage_term: Some(ExportedUsageTerm {
            explicit_term,
            explicit_num_uses: params.explicit_num_uses.unwrap_or(mashery_core::UNBOUNDED),
        }),
    };

    let ciphertext = encrypt_envelope(&exchange, &recipient_key, &cfg.oaep_label)?;

    let mut headers = BTreeMap::new();
    headers.insert("Origin-Role".to_string(), role_name.to_string());
    headers.insert(
        "Recipient-Common-Name".to_string(),
        recipient_block.header("Common-Name").unwrap_or("Bearer").to_string(),
    );
    headers.insert("Explicit-Term".to_string(), explicit_term.to_string());
    headers.insert(
        "Explicit-Num-Uses".to_string(),
        params.explicit_num_uses.unwrap_or(mashery_core::UNBOUNDED).to_string(),
    );
    let exported = &exchange.role_data;
    let v2_capable = exported.area_nid > 0 && !exported.api_key.is_empty() && !exported.key_secret.is_empty();
    headers.insert("V2-Capable".to_string(), v2_capable.to_string());
    headers.insert("Force-Proxy-Mode".to_string(), exchange.role_data.force_proxy_mode.to_string());
    headers.insert("Max-QPS".to_string(), exchange.role_data.max_qps.to_string());

    Ok((wrap_role_data_pem(ciphertext, headers), warnings))
}

/// `pathRoleImport`: `parseIncomingPEM → readRole(required) → loadPrivateKey →
/// decryptAndAssign → saveKeys → saveUsage`. The caller is responsible for
/// the "role must already exist" gate (§4.7): that check happens one layer up
/// where the existence probe naturally lives (mirroring the donor's
/// `ExistenceCheck`-driven `CreateOperation` refusal).
pub async fn import_role(storage: &dyn Storage, backend_uuid: &str, cfg: &BackendConfiguration, role_name: &str, envelope_pem: &str) -> EngineResult<()> {
    let block = PemBlock::decode(envelope_pem)?;
    let private_key = load_or_create_private_key(storage, backend_uuid, role_name).await?;
    let exchange = decrypt_envelope(&block.contents, &private_key, &cfg.oaep_label)?;

    let existing_usage: RoleUsage = storage
        .read_json(&paths::role_usage(backend_uuid, role_name))
        .await?
        .unwrap_or_else(RoleUsage::unbounded);

    let data = exchange.role_data;
    let keys = RoleKeys {
        area_id: data.area_id,
        area_nid: data.area_nid,
        api_key: data.api_key,
        key_secret: data.key_secret,
        username: data.username,
        password: data.password,
        max_qps: data.max_qps,
        force_proxy_mode: data.force_proxy_mode,
        imported: true,
        exportable: data.exportable,
    };

    let usage = match exchange.usage_term {
        Some(term) => RoleUsage {
            explicit_term: term.explicit_term,
            explicit_num_uses: term.explicit_num_uses,
            remaining_num_uses: if term.explicit_num_uses > 0 { term.explicit_num_uses } else { mashery_core::UNBOUNDED },
            ..existing_usage
        },
        None => existing_usage,
    };

    storage.write_json(&paths::role_keys(backend_uuid, role_name), &keys).await?;
    storage.write_json(&paths::role_usage(backend_uuid, role_name), &usage).await?;
    Ok(())
}

// `rsa::pkcs8::EncodePublicKey`/`DecodePublicKey` are re-exported so future
// callers can serialize `RsaPublicKey` into `RoleExportHeap.recipient_public_key`
// without reaching back into the `rsa` crate directly.
pub fn encode_public_key_der(key: &rsa::RsaPublicKey) -> EngineResult<Vec<u8>> {
    Ok(key.to_public_key_der().map_err(|e| mashery_crypto::CryptoError::CertificateParse(e.to_string()))?.into_vec())
}

pub fn decode_public_key_der(der: &[u8]) -> EngineResult<rsa::RsaPublicKey> {
    Ok(rsa::RsaPublicKey::from_public_key_der(der).map_err(|e| mashery_crypto::CryptoError::CertificateParse(e.to_string()))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mashery_core::InMemoryStorage;

    #[tokio::test]
    async fn p1_export_then_import_round_trips_keys() {
        let src_storage = InMemoryStorage::new();
        let dst_storage = InMemoryStorage::new();
        let cfg = BackendConfiguration::new(b"mount-label".to_vec());
        let backend_uuid = "b1";

        src_storage
            .write_json(
                &paths::role_keys(backend_uuid, "src"),
                &RoleKeys {
                    area_nid: 456,
                    api_key: "k".into(),
                    key_secret: "s".into(),
                    exportable: true,
                    ..RoleKeys::new()
                },
            )
            .await
            .unwrap();

        let recipient_pem = get_export_pem(&dst_storage, backend_uuid, "dst", None).await.unwrap().encode();

        let (envelope, warnings) = export_role(
            &src_storage,
            backend_uuid,
            &cfg,
            "src",
            &ExportParams {
                recipient_pem,
                explicit_term: Some("3d".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(warnings.is_empty());
        assert_eq!(envelope.tag, mashery_crypto::ROLE_DATA_TAG);

        import_role(&dst_storage, backend_uuid, &cfg, "dst", &envelope.encode()).await.unwrap();

        let imported_keys: RoleKeys = dst_storage.read_json(&paths::role_keys(backend_uuid, "dst")).await.unwrap().unwrap();
        assert_eq!(imported_keys.api_key, "k");
        assert!(imported_keys.imported);

        let imported_usage: RoleUsage = dst_storage.read_json(&paths::role_usage(backend_uuid, "dst")).await.unwrap().unwrap();
        assert!(imported_usage.explicit_term > now_unix());
    }

    #[tokio::test]
    async fn non_exportable_role_is_blocked() {
        let storage = InMemoryStorage::new();
        let cfg = BackendConfiguration::new(b"label".to_vec());
        storage
            .write_json(
                &paths::role_keys("b1", "r1"),
                &RoleKeys {
                    exportable: false,
                    ..RoleKeys::new()
                },
            )
            .await
            .unwrap();
        let recipient_pem = get_export_pem(&storage, "b1", "dst", None).await.unwrap().encode();
        let err = export_role(
            &storage,
            "b1",
            &cfg,
            "r1",
            &ExportParams {
                recipient_pem,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Response(ResponseError::StateInvariant(_))));
    }
}
