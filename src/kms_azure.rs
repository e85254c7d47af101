use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;

use crate::config::AzureCredentials;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::kms::{build_post, KmsContext, ResponseField};

const API_VERSION: &str = "7.1";
const WRAP_ALG: &str = "RSA-OAEP-256";

#[derive(Serialize)]
struct KeyOperationRequest<'a> {
    alg: &'a str,
    value: &'a str,
}

/// Unwrap a DEK through Key Vault `unwrapkey`.
pub(crate) fn unwrap_request(
    creds: &AzureCredentials,
    key_vault_endpoint: &Endpoint,
    key_name: &str,
    key_version: Option<&str>,
    wrapped: &[u8],
) -> Result<KmsContext> {
    build(
        creds,
        key_vault_endpoint,
        key_name,
        key_version,
        "unwrapkey",
        wrapped,
    )
}

/// Wrap a DEK through Key Vault `wrapkey`.
pub(crate) fn wrap_request(
    creds: &AzureCredentials,
    key_vault_endpoint: &Endpoint,
    key_name: &str,
    key_version: Option<&str>,
    dek: &[u8],
) -> Result<KmsContext> {
    build(
        creds,
        key_vault_endpoint,
        key_name,
        key_version,
        "wrapkey",
        dek,
    )
}

fn build(
    creds: &AzureCredentials,
    endpoint: &Endpoint,
    key_name: &str,
    key_version: Option<&str>,
    operation: &str,
    payload: &[u8],
) -> Result<KmsContext> {
    let value = URL_SAFE_NO_PAD.encode(payload);
    let body = serde_json::to_vec(&KeyOperationRequest {
        alg: WRAP_ALG,
        value: &value,
    })
    .map_err(|e| Error::client(format!("cannot serialize KMS request: {e}")))?;

    let path = match key_version {
        Some(version) => {
            format!("/keys/{key_name}/{version}/{operation}?api-version={API_VERSION}")
        }
        None => format!("/keys/{key_name}/{operation}?api-version={API_VERSION}"),
    };
    let bearer = format!("Bearer {}", creds.access_token);
    let headers: Vec<(&str, &str)> = vec![
        ("Content-Type", "application/json"),
        ("Authorization", &bearer),
        ("Accept", "application/json"),
    ];
    let message = build_post(endpoint.host(), &path, &headers, &body);
    Ok(KmsContext::new(
        endpoint.clone(),
        message,
        ResponseField::AzureValue,
    ))
}
