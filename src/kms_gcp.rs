use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

use crate::config::GcpCredentials;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::kms::{build_post, KmsContext, ResponseField};

const DEFAULT_HOST: &str = "cloudkms.googleapis.com";

#[derive(Serialize)]
struct DecryptRequest<'a> {
    ciphertext: &'a str,
}

#[derive(Serialize)]
struct EncryptRequest<'a> {
    plaintext: &'a str,
}

pub(crate) struct GcpKeyPath<'a> {
    pub project_id: &'a str,
    pub location: &'a str,
    pub key_ring: &'a str,
    pub key_name: &'a str,
    pub key_version: Option<&'a str>,
}

impl GcpKeyPath<'_> {
    fn resource(&self, with_version: bool) -> String {
        let mut path = format!(
            "/v1/projects/{}/locations/{}/keyRings/{}/cryptoKeys/{}",
            self.project_id, self.location, self.key_ring, self.key_name
        );
        if with_version {
            if let Some(version) = self.key_version {
                path.push_str(&format!("/cryptoKeyVersions/{version}"));
            }
        }
        path
    }
}

/// Unwrap: Cloud KMS `decrypt`. Versions are not addressable on decrypt; the
/// ciphertext identifies the version.
pub(crate) fn decrypt_request(
    creds: &GcpCredentials,
    path: &GcpKeyPath<'_>,
    endpoint: Option<&Endpoint>,
    wrapped: &[u8],
) -> Result<KmsContext> {
    let ciphertext = STANDARD.encode(wrapped);
    let body = serde_json::to_vec(&DecryptRequest {
        ciphertext: &ciphertext,
    })
    .map_err(|e| Error::client(format!("cannot serialize KMS request: {e}")))?;
    build(
        creds,
        endpoint,
        format!("{}:decrypt", path.resource(false)),
        body,
        ResponseField::GcpPlaintext,
    )
}

/// Wrap: Cloud KMS `encrypt`, pinned to a key version when one is set.
pub(crate) fn encrypt_request(
    creds: &GcpCredentials,
    path: &GcpKeyPath<'_>,
    endpoint: Option<&Endpoint>,
    dek: &[u8],
) -> Result<KmsContext> {
    let plaintext = STANDARD.encode(dek);
    let body = serde_json::to_vec(&EncryptRequest {
        plaintext: &plaintext,
    })
    .map_err(|e| Error::client(format!("cannot serialize KMS request: {e}")))?;
    build(
        creds,
        endpoint,
        format!("{}:encrypt", path.resource(true)),
        body,
        ResponseField::GcpCiphertext,
    )
}

fn build(
    creds: &GcpCredentials,
    endpoint: Option<&Endpoint>,
    path: String,
    body: Vec<u8>,
    field: ResponseField,
) -> Result<KmsContext> {
    let endpoint = match endpoint {
        Some(e) => e.clone(),
        None => Endpoint::parse(DEFAULT_HOST)?,
    };
    let bearer = format!("Bearer {}", creds.access_token);
    let headers: Vec<(&str, &str)> = vec![
        ("Content-Type", "application/json"),
        ("Authorization", &bearer),
    ];
    let message = build_post(endpoint.host(), &path, &headers, &body);
    Ok(KmsContext::new(endpoint, message, field))
}
