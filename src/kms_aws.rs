use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ring::{digest, hmac};
use serde::Serialize;

use crate::config::AwsCredentials;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::kms::{build_post, KmsContext, ResponseField};

const SERVICE: &str = "kms";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

#[derive(Serialize)]
struct DecryptRequest<'a> {
    #[serde(rename = "CiphertextBlob")]
    ciphertext_blob: &'a str,
}

#[derive(Serialize)]
struct EncryptRequest<'a> {
    #[serde(rename = "KeyId")]
    key_id: &'a str,
    #[serde(rename = "Plaintext")]
    plaintext: &'a str,
}

/// Unwrap: KMS `Decrypt`. The ciphertext blob identifies the CMK on the
/// server side.
pub(crate) fn decrypt_request(
    creds: &AwsCredentials,
    region: &str,
    endpoint: Option<&Endpoint>,
    wrapped: &[u8],
) -> Result<KmsContext> {
    let blob = STANDARD.encode(wrapped);
    let body = serde_json::to_vec(&DecryptRequest {
        ciphertext_blob: &blob,
    })
    .map_err(|e| Error::client(format!("cannot serialize KMS request: {e}")))?;
    build(
        creds,
        region,
        endpoint,
        "TrentService.Decrypt",
        body,
        ResponseField::AwsPlaintext,
        Utc::now(),
    )
}

/// Wrap: KMS `Encrypt` against a specific CMK.
pub(crate) fn encrypt_request(
    creds: &AwsCredentials,
    region: &str,
    cmk: &str,
    endpoint: Option<&Endpoint>,
    plaintext: &[u8],
) -> Result<KmsContext> {
    let encoded = STANDARD.encode(plaintext);
    let body = serde_json::to_vec(&EncryptRequest {
        key_id: cmk,
        plaintext: &encoded,
    })
    .map_err(|e| Error::client(format!("cannot serialize KMS request: {e}")))?;
    build(
        creds,
        region,
        endpoint,
        "TrentService.Encrypt",
        body,
        ResponseField::AwsCiphertextBlob,
        Utc::now(),
    )
}

fn build(
    creds: &AwsCredentials,
    region: &str,
    endpoint: Option<&Endpoint>,
    target: &str,
    body: Vec<u8>,
    field: ResponseField,
    now: DateTime<Utc>,
) -> Result<KmsContext> {
    let endpoint = match endpoint {
        Some(e) => e.clone(),
        None => Endpoint::parse(&format!("kms.{region}.amazonaws.com"))?,
    };
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let authorization = sign(creds, region, endpoint.host(), target, &amz_date, &body);

    let mut headers: Vec<(&str, &str)> = vec![
        ("Content-Type", CONTENT_TYPE),
        ("X-Amz-Date", &amz_date),
        ("X-Amz-Target", target),
    ];
    if let Some(token) = &creds.session_token {
        headers.push(("X-Amz-Security-Token", token));
    }
    headers.push(("Authorization", &authorization));

    let message = build_post(endpoint.host(), "/", &headers, &body);
    Ok(KmsContext::new(endpoint, message, field))
}

/// AWS Signature Version 4 over the canonical request. Signed headers are
/// `content-type;host;x-amz-date;x-amz-target`, plus the security token when
/// present (alphabetical order is load-bearing).
fn sign(
    creds: &AwsCredentials,
    region: &str,
    host: &str,
    target: &str,
    amz_date: &str,
    body: &[u8],
) -> String {
    let date_stamp = &amz_date[..8];
    let mut canonical_headers = format!(
        "content-type:{CONTENT_TYPE}\nhost:{host}\nx-amz-date:{amz_date}\n"
    );
    let mut signed_headers = String::from("content-type;host;x-amz-date");
    if let Some(token) = &creds.session_token {
        canonical_headers.push_str(&format!("x-amz-security-token:{token}\n"));
        signed_headers.push_str(";x-amz-security-token");
    }
    canonical_headers.push_str(&format!("x-amz-target:{target}\n"));
    signed_headers.push_str(";x-amz-target");

    let canonical_request = format!(
        "POST\n/\n\n{canonical_headers}\n{signed_headers}\n{}",
        hex(digest::digest(&digest::SHA256, body).as_ref())
    );
    let scope = format!("{date_stamp}/{region}/{SERVICE}/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        hex(digest::digest(&digest::SHA256, canonical_request.as_bytes()).as_ref())
    );

    let k_secret = format!("AWS4{}", creds.secret_access_key);
    let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(k_date.as_ref(), region.as_bytes());
    let k_service = hmac_sha256(k_region.as_ref(), SERVICE.as_bytes());
    let k_signing = hmac_sha256(k_service.as_ref(), b"aws4_request");
    let signature = hex(hmac_sha256(k_signing.as_ref(), string_to_sign.as_bytes()).as_ref());

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        creds.access_key_id
    )
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> hmac::Tag {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
