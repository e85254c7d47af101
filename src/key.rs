use bson::spec::BinarySubtype;
use bson::{Bson, Document};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::kek::Kek;

/// A validated data-encryption-key document as fetched from the key vault
/// collection. Only `_id`, `keyAltNames`, `masterKey`, and `keyMaterial` are
/// consumed; the bookkeeping fields are checked for presence and type.
#[derive(Debug, Clone)]
pub struct KeyDocument {
    pub id: Uuid,
    pub alt_names: Vec<String>,
    pub kek: Kek,
    pub key_material: Vec<u8>,
}

pub(crate) fn uuid_from_bson(value: &Bson, what: &str) -> Result<Uuid> {
    match value {
        Bson::Binary(bin) if bin.subtype == BinarySubtype::Uuid => {
            Uuid::from_slice(&bin.bytes)
                .map_err(|_| Error::client(format!("{what} is not a valid UUID")))
        }
        _ => Err(Error::client(format!(
            "{what} must be a UUID (binary subtype 4)"
        ))),
    }
}

pub(crate) fn uuid_to_bson(id: &Uuid) -> Bson {
    Bson::Binary(bson::Binary {
        subtype: BinarySubtype::Uuid,
        bytes: id.as_bytes().to_vec(),
    })
}

fn check_datetime(doc: &Document, field: &str) -> Result<()> {
    match doc.get(field) {
        Some(Bson::DateTime(_)) => Ok(()),
        Some(_) => Err(Error::client(format!(
            "key document field \"{field}\" must be a datetime"
        ))),
        None => Err(Error::client(format!(
            "key document missing field \"{field}\""
        ))),
    }
}

fn check_int(doc: &Document, field: &str) -> Result<()> {
    match doc.get(field) {
        Some(Bson::Int32(_)) | Some(Bson::Int64(_)) => Ok(()),
        Some(_) => Err(Error::client(format!(
            "key document field \"{field}\" must be an integer"
        ))),
        None => Err(Error::client(format!(
            "key document missing field \"{field}\""
        ))),
    }
}

impl KeyDocument {
    pub fn parse(doc: &Document) -> Result<KeyDocument> {
        let id = uuid_from_bson(
            doc.get("_id")
                .ok_or_else(|| Error::client("key document missing field \"_id\""))?,
            "key document _id",
        )?;

        let mut alt_names = Vec::new();
        if let Some(value) = doc.get("keyAltNames") {
            let arr = value.as_array().ok_or_else(|| {
                Error::client("key document field \"keyAltNames\" must be an array")
            })?;
            for item in arr {
                let name = item.as_str().ok_or_else(|| {
                    Error::client("keyAltNames entries must be strings")
                })?;
                if alt_names.iter().any(|n| n == name) {
                    return Err(Error::client(format!(
                        "duplicate key alternate name \"{name}\""
                    )));
                }
                alt_names.push(name.to_string());
            }
        }

        let master_key = doc.get_document("masterKey").map_err(|_| {
            Error::client("key document missing or invalid field \"masterKey\"")
        })?;
        let kek = Kek::parse(master_key)?;

        let key_material = match doc.get("keyMaterial") {
            Some(Bson::Binary(bin)) if bin.subtype == BinarySubtype::Generic => {
                bin.bytes.clone()
            }
            Some(_) => {
                return Err(Error::client(
                    "key document field \"keyMaterial\" must be generic binary",
                ))
            }
            None => {
                return Err(Error::client(
                    "key document missing field \"keyMaterial\"",
                ))
            }
        };
        if key_material.is_empty() {
            return Err(Error::client("key document has empty keyMaterial"));
        }

        check_datetime(doc, "creationDate")?;
        check_datetime(doc, "updateDate")?;
        check_int(doc, "status")?;
        check_int(doc, "version")?;

        Ok(KeyDocument {
            id,
            alt_names,
            kek,
            key_material,
        })
    }
}
