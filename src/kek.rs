use bson::{doc, Bson, Document};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};

/// Key-encryption-key descriptor: which KMS holds the KEK that wraps a DEK,
/// and how to address it.
///
/// Parsed from and serialized to the `masterKey` document grammar:
///
/// ```text
/// aws:   { provider: "aws", region, key, endpoint? }
/// azure: { provider: "azure", keyVaultEndpoint, keyName, keyVersion? }
/// gcp:   { provider: "gcp", projectId, location, keyRing, keyName,
///          keyVersion?, endpoint? }
/// local: { provider: "local" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kek {
    Aws {
        region: String,
        cmk: String,
        endpoint: Option<Endpoint>,
    },
    Azure {
        key_vault_endpoint: Endpoint,
        key_name: String,
        key_version: Option<String>,
    },
    Gcp {
        project_id: String,
        location: String,
        key_ring: String,
        key_name: String,
        key_version: Option<String>,
        endpoint: Option<Endpoint>,
    },
    Local,
}

fn required_utf8(doc: &Document, field: &str) -> Result<String> {
    match doc.get(field) {
        Some(Bson::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Bson::String(_)) => Err(Error::client(format!(
            "field \"{field}\" must be a non-empty string"
        ))),
        Some(_) => Err(Error::client(format!(
            "field \"{field}\" must be a string"
        ))),
        None => Err(Error::client(format!("missing required field \"{field}\""))),
    }
}

fn optional_utf8(doc: &Document, field: &str) -> Result<Option<String>> {
    match doc.get(field) {
        None => Ok(None),
        Some(_) => required_utf8(doc, field).map(Some),
    }
}

fn required_endpoint(doc: &Document, field: &str) -> Result<Endpoint> {
    let raw = required_utf8(doc, field)?;
    Endpoint::parse(&raw)
}

fn optional_endpoint(doc: &Document, field: &str) -> Result<Option<Endpoint>> {
    match optional_utf8(doc, field)? {
        None => Ok(None),
        Some(raw) => Endpoint::parse(&raw).map(Some),
    }
}

impl Kek {
    pub fn parse(doc: &Document) -> Result<Kek> {
        let provider = required_utf8(doc, "provider")?;
        match provider.as_str() {
            "aws" => Ok(Kek::Aws {
                cmk: required_utf8(doc, "key")?,
                region: required_utf8(doc, "region")?,
                endpoint: optional_endpoint(doc, "endpoint")?,
            }),
            "azure" => Ok(Kek::Azure {
                key_vault_endpoint: required_endpoint(doc, "keyVaultEndpoint")?,
                key_name: required_utf8(doc, "keyName")?,
                key_version: optional_utf8(doc, "keyVersion")?,
            }),
            "gcp" => Ok(Kek::Gcp {
                endpoint: optional_endpoint(doc, "endpoint")?,
                project_id: required_utf8(doc, "projectId")?,
                location: required_utf8(doc, "location")?,
                key_ring: required_utf8(doc, "keyRing")?,
                key_name: required_utf8(doc, "keyName")?,
                key_version: optional_utf8(doc, "keyVersion")?,
            }),
            "local" => Ok(Kek::Local),
            other => Err(Error::client(format!(
                "unrecognized KMS provider: {other}"
            ))),
        }
    }

    pub fn provider(&self) -> &'static str {
        match self {
            Kek::Aws { .. } => "aws",
            Kek::Azure { .. } => "azure",
            Kek::Gcp { .. } => "gcp",
            Kek::Local => "local",
        }
    }

    /// Serialize to the `masterKey` grammar. Optional fields are omitted when
    /// absent; endpoints render as their original host-and-port string.
    pub fn to_document(&self) -> Document {
        match self {
            Kek::Aws {
                region,
                cmk,
                endpoint,
            } => {
                let mut d = doc! {
                    "provider": "aws",
                    "region": region.clone(),
                    "key": cmk.clone(),
                };
                if let Some(e) = endpoint {
                    d.insert("endpoint", e.host_and_port());
                }
                d
            }
            Kek::Azure {
                key_vault_endpoint,
                key_name,
                key_version,
            } => {
                let mut d = doc! {
                    "provider": "azure",
                    "keyVaultEndpoint": key_vault_endpoint.host_and_port(),
                    "keyName": key_name.clone(),
                };
                if let Some(v) = key_version {
                    d.insert("keyVersion", v.clone());
                }
                d
            }
            Kek::Gcp {
                project_id,
                location,
                key_ring,
                key_name,
                key_version,
                endpoint,
            } => {
                let mut d = doc! {
                    "provider": "gcp",
                    "projectId": project_id.clone(),
                    "location": location.clone(),
                    "keyRing": key_ring.clone(),
                    "keyName": key_name.clone(),
                };
                if let Some(v) = key_version {
                    d.insert("keyVersion", v.clone());
                }
                if let Some(e) = endpoint {
                    d.insert("endpoint", e.host_and_port());
                }
                d
            }
            Kek::Local => doc! { "provider": "local" },
        }
    }
}
