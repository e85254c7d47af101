//! Client-side field-level encryption engine for document databases.
//!
//! The crate owns no sockets and spawns no threads: every operation is a
//! [`Context`] the caller pumps, performing the I/O each state mandates
//! (collection-info fetch, marking, key fetch, KMS exchanges) and feeding
//! results back until the context is [`State::Ready`] and can be finalized.

pub mod aead;
pub mod broker;
pub mod config;
pub mod crypt;
pub mod ctx;
mod ctx_datakey;
mod ctx_decrypt;
mod ctx_encrypt;
pub mod endpoint;
pub mod error;
pub mod kek;
pub mod key;
pub mod kms;
mod kms_aws;
mod kms_azure;
mod kms_gcp;
pub mod kms_local;
pub mod logging;
pub mod payload;
pub mod traits;

pub use aead::Aes256Gcm;
pub use broker::{BrokerState, KeyBroker};
pub use config::{AwsCredentials, AzureCredentials, GcpCredentials, KmsCredentials};
pub use crypt::{Crypt, CryptBuilder};
pub use ctx::{Context, State};
pub use endpoint::Endpoint;
pub use error::{Error, ErrorKind, Result, Status};
pub use kek::Kek;
pub use key::KeyDocument;
pub use kms::KmsContext;
pub use payload::{Algorithm, Ciphertext, KeyRef, Marking};
pub use traits::Aead;
