use std::sync::Arc;

use bson::spec::BinarySubtype;
use bson::{doc, Binary, Bson, Document};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::key::{uuid_from_bson, uuid_to_bson};
use crate::traits::Aead;

/// Field encryption algorithm, carried as the leading byte of a ciphertext
/// payload. Nonce policy for the deterministic variant is the `Aead`
/// implementation's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Deterministic,
    Random,
}

impl Algorithm {
    pub(crate) fn blob_subtype(self) -> u8 {
        match self {
            Algorithm::Deterministic => 1,
            Algorithm::Random => 2,
        }
    }

    fn from_i32(v: i32) -> Result<Algorithm> {
        match v {
            1 => Ok(Algorithm::Deterministic),
            2 => Ok(Algorithm::Random),
            other => Err(Error::client(format!("unknown algorithm tag {other}"))),
        }
    }
}

/// How a marking refers to its DEK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRef {
    Id(Uuid),
    AltName(String),
}

/// A marking placeholder: binary subtype 6 whose first byte is zero, wrapping
/// a BSON document `{a: <algorithm>, v: <value>, ki: <uuid> | ka: <name>}`.
#[derive(Debug, Clone)]
pub struct Marking {
    pub algorithm: Algorithm,
    pub value: Bson,
    pub key: KeyRef,
}

impl Marking {
    pub fn parse(payload: &[u8]) -> Result<Marking> {
        if payload.first() != Some(&0) {
            return Err(Error::client("payload is not a marking placeholder"));
        }
        let inner = Document::from_reader(&payload[1..])
            .map_err(|e| Error::client(format!("malformed marking: {e}")))?;
        let algorithm = Algorithm::from_i32(
            inner
                .get_i32("a")
                .map_err(|_| Error::client("marking missing algorithm"))?,
        )?;
        let value = inner
            .get("v")
            .cloned()
            .ok_or_else(|| Error::client("marking missing value"))?;
        let key = match (inner.get("ki"), inner.get("ka")) {
            (Some(ki), None) => KeyRef::Id(uuid_from_bson(ki, "marking key id")?),
            (None, Some(Bson::String(name))) => KeyRef::AltName(name.clone()),
            (None, Some(_)) => {
                return Err(Error::client("marking key alt name must be a string"))
            }
            _ => {
                return Err(Error::client(
                    "marking must carry exactly one of ki or ka",
                ))
            }
        };
        Ok(Marking {
            algorithm,
            value,
            key,
        })
    }

    /// Render back to the subtype-6 binary form. The inverse of `parse`.
    pub fn to_binary(&self) -> Result<Binary> {
        let mut inner = doc! { "a": self.algorithm.blob_subtype() as i32 };
        inner.insert("v", self.value.clone());
        match &self.key {
            KeyRef::Id(id) => inner.insert("ki", uuid_to_bson(id)),
            KeyRef::AltName(name) => inner.insert("ka", name.clone()),
        };
        let mut bytes = vec![0u8];
        inner
            .to_writer(&mut bytes)
            .map_err(|e| Error::client(format!("cannot serialize marking: {e}")))?;
        Ok(Binary {
            subtype: BinarySubtype::Encrypted,
            bytes,
        })
    }
}

/// An encrypted field payload:
/// `blob_subtype(1) ‖ key_id(16) ‖ original_bson_type(1) ‖ ciphertext`.
#[derive(Debug, Clone)]
pub struct Ciphertext {
    pub algorithm: Algorithm,
    pub key_id: Uuid,
    pub original_type: u8,
    pub bytes: Vec<u8>,
}

const CIPHERTEXT_HEADER_LEN: usize = 1 + 16 + 1;

impl Ciphertext {
    pub fn parse(payload: &[u8]) -> Result<Ciphertext> {
        if payload.len() <= CIPHERTEXT_HEADER_LEN {
            return Err(Error::client("ciphertext payload too short"));
        }
        let algorithm = match payload[0] {
            1 => Algorithm::Deterministic,
            2 => Algorithm::Random,
            0 => return Err(Error::client("unexpected marking placeholder")),
            other => {
                return Err(Error::client(format!(
                    "unknown ciphertext blob subtype {other}"
                )))
            }
        };
        let key_id = Uuid::from_slice(&payload[1..17])
            .map_err(|_| Error::client("ciphertext carries invalid key id"))?;
        Ok(Ciphertext {
            algorithm,
            key_id,
            original_type: payload[17],
            bytes: payload[CIPHERTEXT_HEADER_LEN..].to_vec(),
        })
    }

    pub fn to_binary(&self) -> Binary {
        let mut bytes = Vec::with_capacity(CIPHERTEXT_HEADER_LEN + self.bytes.len());
        bytes.push(self.algorithm.blob_subtype());
        bytes.extend_from_slice(self.key_id.as_bytes());
        bytes.push(self.original_type);
        bytes.extend_from_slice(&self.bytes);
        Binary {
            subtype: BinarySubtype::Encrypted,
            bytes,
        }
    }
}

/// True when the payload is a marking placeholder rather than a ciphertext.
pub(crate) fn is_marking(payload: &[u8]) -> bool {
    payload.first() == Some(&0)
}

/// Encrypt one value under a DEK. The AEAD plaintext is the serialized
/// document `{"v": <value>}` so arbitrary BSON types survive the round trip.
pub(crate) fn encrypt_value(
    crypto: &Arc<dyn Aead>,
    dek: &[u8],
    key_id: Uuid,
    algorithm: Algorithm,
    value: &Bson,
) -> Result<Ciphertext> {
    let wrapper = doc! { "v": value.clone() };
    let mut plaintext = Vec::new();
    wrapper
        .to_writer(&mut plaintext)
        .map_err(|e| Error::client(format!("cannot serialize value: {e}")))?;
    let bytes = crypto
        .encrypt(&plaintext, dek)
        .map_err(|e| Error::client(format!("field encryption failed: {e}")))?;
    Ok(Ciphertext {
        algorithm,
        key_id,
        original_type: value.element_type() as u8,
        bytes,
    })
}

/// Decrypt one payload back to its original value, checking that the embedded
/// type byte matches what was decrypted.
pub(crate) fn decrypt_value(
    crypto: &Arc<dyn Aead>,
    dek: &[u8],
    ct: &Ciphertext,
) -> Result<Bson> {
    let plaintext = crypto
        .decrypt(&ct.bytes, dek)
        .map_err(|e| Error::client(format!("field decryption failed: {e}")))?;
    let wrapper = Document::from_reader(plaintext.as_slice())
        .map_err(|e| Error::client(format!("malformed decrypted value: {e}")))?;
    let value = wrapper
        .get("v")
        .cloned()
        .ok_or_else(|| Error::client("decrypted payload missing value"))?;
    if value.element_type() as u8 != ct.original_type {
        return Err(Error::client("decrypted value type mismatch"));
    }
    Ok(value)
}

/// Walk every subtype-6 binary in a document tree.
pub(crate) fn visit_encrypted(
    doc: &Document,
    f: &mut impl FnMut(&[u8]) -> Result<()>,
) -> Result<()> {
    for (_, value) in doc.iter() {
        visit_bson(value, f)?;
    }
    Ok(())
}

fn visit_bson(value: &Bson, f: &mut impl FnMut(&[u8]) -> Result<()>) -> Result<()> {
    match value {
        Bson::Binary(bin) if bin.subtype == BinarySubtype::Encrypted => f(&bin.bytes),
        Bson::Document(d) => visit_encrypted(d, f),
        Bson::Array(items) => {
            for item in items {
                visit_bson(item, f)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Rebuild a document tree, replacing every subtype-6 binary with whatever
/// the callback produces for its payload.
pub(crate) fn map_encrypted(
    doc: &Document,
    f: &mut impl FnMut(&[u8]) -> Result<Bson>,
) -> Result<Document> {
    let mut out = Document::new();
    for (key, value) in doc.iter() {
        out.insert(key.clone(), map_bson(value, f)?);
    }
    Ok(out)
}

fn map_bson(value: &Bson, f: &mut impl FnMut(&[u8]) -> Result<Bson>) -> Result<Bson> {
    match value {
        Bson::Binary(bin) if bin.subtype == BinarySubtype::Encrypted => f(&bin.bytes),
        Bson::Document(d) => Ok(Bson::Document(map_encrypted(d, f)?)),
        Bson::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(map_bson(item, f)?);
            }
            Ok(Bson::Array(out))
        }
        other => Ok(other.clone()),
    }
}
