use std::sync::Arc;

use bson::Document;
use zeroize::Zeroizing;

use crate::aead::Aes256Gcm;
use crate::broker::KeyBroker;
use crate::config::{AwsCredentials, AzureCredentials, CryptOptions, GcpCredentials};
use crate::ctx::{Context, State, Variant};
use crate::ctx_datakey::DataKeyOp;
use crate::ctx_decrypt::DecryptOp;
use crate::ctx_encrypt::{AutoEncrypt, ExplicitEncrypt};
use crate::error::{Error, Result};
use crate::kek::Kek;
use crate::payload::{Algorithm, KeyRef};
use crate::traits::Aead;

/// The embedding library handle: KMS credentials, schema map, and the crypto
/// implementation. Read-only once built; shared by any number of contexts,
/// each of which may be pumped on its own thread.
pub struct Crypt {
    opts: Arc<CryptOptions>,
    crypto: Arc<dyn Aead>,
}

impl Crypt {
    pub fn builder() -> CryptBuilder {
        CryptBuilder {
            opts: CryptOptions::default(),
            crypto: None,
        }
    }

    /// Automatic encryption of a command against `ns` ("db.coll"). Starts at
    /// `NeedCollInfo`, or `NeedMarkings` when the schema map covers `ns`.
    pub fn encrypt_context(&self, ns: &str, cmd: Document) -> Result<Context> {
        let (variant, state) = AutoEncrypt::new(ns, cmd, &self.opts.schema_map)?;
        Ok(Context::new(
            Variant::EncryptAuto(variant),
            state,
            KeyBroker::new(true),
            self.crypto.clone(),
            Arc::new(self.opts.kms.clone()),
        ))
    }

    /// Explicit encryption of `{"v": <value>}` under one DEK, referenced by
    /// id or alternate name. Starts at `NeedKeys`.
    pub fn explicit_encrypt_context(
        &self,
        msg: Document,
        algorithm: Algorithm,
        key: KeyRef,
    ) -> Result<Context> {
        let mut kb = KeyBroker::new(true);
        let variant = ExplicitEncrypt::new(msg, algorithm, key, &mut kb)?;
        Ok(Context::new(
            Variant::EncryptExplicit(variant),
            State::NeedKeys,
            kb,
            self.crypto.clone(),
            Arc::new(self.opts.kms.clone()),
        ))
    }

    /// Decryption of every encrypted field in `payload`. Starts at
    /// `NeedKeys`, or `NothingToDo` when no field is encrypted.
    pub fn decrypt_context(&self, payload: Document) -> Result<Context> {
        let mut kb = KeyBroker::new(true);
        let (variant, state) = DecryptOp::new(payload, &mut kb)?;
        Ok(Context::new(
            Variant::Decrypt(variant),
            state,
            kb,
            self.crypto.clone(),
            Arc::new(self.opts.kms.clone()),
        ))
    }

    /// Creation of a new DEK wrapped by `kek`. Starts at `NeedKms`; local
    /// KEKs wrap in-process, so `next_kms_ctx` immediately returns none.
    pub fn create_data_key_context(
        &self,
        kek: Kek,
        alt_names: Vec<String>,
    ) -> Result<Context> {
        let variant = DataKeyOp::new(kek, alt_names, &self.opts.kms, &self.crypto)?;
        Ok(Context::new(
            Variant::CreateDataKey(variant),
            State::NeedKms,
            KeyBroker::new(true),
            self.crypto.clone(),
            Arc::new(self.opts.kms.clone()),
        ))
    }
}

/// Builder for [`Crypt`]. At least one KMS provider must be configured.
pub struct CryptBuilder {
    opts: CryptOptions,
    crypto: Option<Arc<dyn Aead>>,
}

impl CryptBuilder {
    pub fn aws_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.opts.kms.aws = Some(AwsCredentials {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        });
        self
    }

    pub fn aws_session_token(mut self, token: impl Into<String>) -> Self {
        if let Some(aws) = self.opts.kms.aws.as_mut() {
            aws.session_token = Some(token.into());
        }
        self
    }

    pub fn azure_credentials(mut self, access_token: impl Into<String>) -> Self {
        self.opts.kms.azure = Some(AzureCredentials {
            access_token: access_token.into(),
        });
        self
    }

    pub fn gcp_credentials(mut self, access_token: impl Into<String>) -> Self {
        self.opts.kms.gcp = Some(GcpCredentials {
            access_token: access_token.into(),
        });
        self
    }

    pub fn local_master_key(mut self, key: Vec<u8>) -> Self {
        self.opts.kms.local_master_key = Some(Zeroizing::new(key));
        self
    }

    /// Register a schema for a namespace, letting auto-encrypt skip the
    /// collection-info round trip.
    pub fn schema(mut self, ns: impl Into<String>, schema: Document) -> Self {
        self.opts.schema_map.insert(ns.into(), schema);
        self
    }

    /// Replace the bundled AES-256-GCM with a custom AEAD.
    pub fn crypto(mut self, crypto: Arc<dyn Aead>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    pub fn build(self) -> Result<Crypt> {
        if !self.opts.kms.any_configured() {
            return Err(Error::client("no KMS providers configured"));
        }
        let crypto = self.crypto.unwrap_or_else(|| Arc::new(Aes256Gcm::new()));
        if let Some(key) = &self.opts.kms.local_master_key {
            if key.len() != crypto.key_len() {
                return Err(Error::client(format!(
                    "invalid local master key size {}, must be {} bytes",
                    key.len(),
                    crypto.key_len()
                )));
            }
        }
        Ok(Crypt {
            opts: Arc::new(self.opts),
            crypto,
        })
    }
}
