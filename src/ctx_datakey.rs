use std::sync::Arc;

use bson::spec::BinarySubtype;
use bson::{doc, Binary, Bson, Document};
use rand::RngCore;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::KmsCredentials;
use crate::error::{Error, Result};
use crate::kek::Kek;
use crate::key::uuid_to_bson;
use crate::kms::KmsContext;
use crate::kms_gcp::GcpKeyPath;
use crate::traits::Aead;
use crate::{kms_aws, kms_azure, kms_gcp, kms_local};

/// Creation of a new DEK: generate fresh material, wrap it under the given
/// KEK (one KMS exchange for remote providers, in-process for local), and
/// finalize into a complete key document ready for the key vault.
pub(crate) struct DataKeyOp {
    id: Uuid,
    kek: Kek,
    alt_names: Vec<String>,
    kms: Option<KmsContext>,
    wrapped: Option<Vec<u8>>,
}

impl DataKeyOp {
    pub(crate) fn new(
        kek: Kek,
        alt_names: Vec<String>,
        creds: &KmsCredentials,
        crypto: &Arc<dyn Aead>,
    ) -> Result<DataKeyOp> {
        for (i, name) in alt_names.iter().enumerate() {
            if alt_names[..i].contains(name) {
                return Err(Error::client(format!(
                    "duplicate key alternate name \"{name}\""
                )));
            }
        }
        let mut dek = Zeroizing::new(vec![0u8; crypto.key_len()]);
        rand::rngs::OsRng.fill_bytes(&mut dek);

        let mut kms = None;
        let mut wrapped = None;
        match &kek {
            Kek::Local => {
                let master = creds.local_master_key.as_ref().ok_or_else(|| {
                    Error::client("no credentials configured for KMS provider: local")
                })?;
                wrapped = Some(kms_local::wrap(crypto, master, &dek)?);
            }
            Kek::Aws {
                region,
                cmk,
                endpoint,
            } => {
                let aws = creds.aws.as_ref().ok_or_else(|| {
                    Error::client("no credentials configured for KMS provider: aws")
                })?;
                kms = Some(kms_aws::encrypt_request(
                    aws,
                    region,
                    cmk,
                    endpoint.as_ref(),
                    &dek,
                )?);
            }
            Kek::Azure {
                key_vault_endpoint,
                key_name,
                key_version,
            } => {
                let azure = creds.azure.as_ref().ok_or_else(|| {
                    Error::client("no credentials configured for KMS provider: azure")
                })?;
                kms = Some(kms_azure::wrap_request(
                    azure,
                    key_vault_endpoint,
                    key_name,
                    key_version.as_deref(),
                    &dek,
                )?);
            }
            Kek::Gcp {
                project_id,
                location,
                key_ring,
                key_name,
                key_version,
                endpoint,
            } => {
                let gcp = creds.gcp.as_ref().ok_or_else(|| {
                    Error::client("no credentials configured for KMS provider: gcp")
                })?;
                let path = GcpKeyPath {
                    project_id,
                    location,
                    key_ring,
                    key_name,
                    key_version: key_version.as_deref(),
                };
                kms = Some(kms_gcp::encrypt_request(gcp, &path, endpoint.as_ref(), &dek)?);
            }
        }
        Ok(DataKeyOp {
            id: Uuid::new_v4(),
            kek,
            alt_names,
            kms,
            wrapped,
        })
    }

    pub(crate) fn next_kms(&mut self) -> Option<&mut KmsContext> {
        if self.kms.as_ref().is_some_and(|k| !k.is_settled()) {
            self.kms.as_mut()
        } else {
            None
        }
    }

    pub(crate) fn kms_done(&mut self) -> Result<()> {
        if let Some(kms) = self.kms.as_mut() {
            if let Some(err) = kms.error() {
                return Err(err.clone());
            }
            if !kms.is_done() {
                return Err(Error::client(
                    "KMS requests are not complete; feed the subcontext first",
                ));
            }
            let wrapped = kms
                .take_result()
                .ok_or_else(|| Error::kms("KMS subcontext produced no wrapped key"))?;
            self.wrapped = Some(wrapped.to_vec());
        }
        Ok(())
    }

    pub(crate) fn finalize(&mut self) -> Result<Document> {
        let wrapped = self
            .wrapped
            .clone()
            .ok_or_else(|| Error::client("data key was never wrapped"))?;
        let now = bson::DateTime::now();
        let mut out = doc! {
            "_id": uuid_to_bson(&self.id),
            "keyMaterial": Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes: wrapped,
            }),
            "creationDate": now,
            "updateDate": now,
            "status": 0_i32,
            "version": 0_i64,
            "masterKey": self.kek.to_document(),
        };
        if !self.alt_names.is_empty() {
            out.insert(
                "keyAltNames",
                Bson::Array(
                    self.alt_names
                        .iter()
                        .map(|n| Bson::String(n.clone()))
                        .collect(),
                ),
            );
        }
        Ok(out)
    }
}
