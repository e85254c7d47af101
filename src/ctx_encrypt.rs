use std::collections::HashMap;
use std::sync::Arc;

use bson::{doc, Bson, Document};
use uuid::Uuid;

use crate::broker::KeyBroker;
use crate::ctx::State;
use crate::error::{Error, Result};
use crate::payload::{
    encrypt_value, map_encrypted, visit_encrypted, Algorithm, KeyRef, Marking,
};
use crate::traits::Aead;

/// Automatic (schema-driven) encryption of a whole command.
///
/// Pump shape: fetch the collection schema (skipped when the configured
/// schema map covers the namespace), have the marker rewrite the command
/// with placeholders, fetch the referenced DEKs, unwrap them, then replace
/// every placeholder with ciphertext.
pub(crate) struct AutoEncrypt {
    coll: String,
    cmd: Document,
    schema: Option<Document>,
    remote_schema: bool,
    collinfo_fed: bool,
    marked: Option<Document>,
}

impl AutoEncrypt {
    /// Returns the variant and its initial state.
    pub(crate) fn new(
        ns: &str,
        cmd: Document,
        schema_map: &HashMap<String, Document>,
    ) -> Result<(AutoEncrypt, State)> {
        let (_, coll) = ns
            .split_once('.')
            .filter(|(db, coll)| !db.is_empty() && !coll.is_empty())
            .ok_or_else(|| {
                Error::client(format!("invalid namespace \"{ns}\", expected db.coll"))
            })?;
        let local_schema = schema_map.get(ns).cloned();
        let state = if local_schema.is_some() {
            State::NeedMarkings
        } else {
            State::NeedCollInfo
        };
        Ok((
            AutoEncrypt {
                coll: coll.to_string(),
                cmd,
                remote_schema: local_schema.is_none(),
                schema: local_schema,
                collinfo_fed: false,
                marked: None,
            },
            state,
        ))
    }

    pub(crate) fn op_collinfo(&mut self) -> Result<Document> {
        Ok(doc! { "name": self.coll.clone() })
    }

    pub(crate) fn feed_collinfo(&mut self, doc: &Document) -> Result<()> {
        if self.collinfo_fed {
            return Err(Error::client(
                "expected at most one collection info document",
            ));
        }
        self.collinfo_fed = true;
        if let Ok(options) = doc.get_document("options") {
            if let Ok(validator) = options.get_document("validator") {
                if let Ok(schema) = validator.get_document("$jsonSchema") {
                    self.schema = Some(schema.clone());
                }
            }
        }
        Ok(())
    }

    pub(crate) fn done_collinfo(&mut self) -> Result<State> {
        // No collection info means no server-side schema; the marker still
        // runs so an embedder-side schema can apply.
        Ok(State::NeedMarkings)
    }

    pub(crate) fn op_markings(&mut self) -> Result<Document> {
        let mut out = self.cmd.clone();
        out.insert("jsonSchema", self.schema.clone().unwrap_or_default());
        out.insert("isRemoteSchema", self.remote_schema);
        Ok(out)
    }

    pub(crate) fn feed_markings(&mut self, doc: &Document) -> Result<()> {
        if self.marked.is_some() {
            return Err(Error::client("expected at most one marked reply"));
        }
        let ok = match doc.get("ok") {
            Some(Bson::Int32(v)) => *v == 1,
            Some(Bson::Int64(v)) => *v == 1,
            Some(Bson::Double(v)) => *v == 1.0,
            _ => false,
        };
        if !ok {
            return Err(Error::client("marking reply is not ok"));
        }
        let result = doc
            .get_document("result")
            .map_err(|_| Error::client("marking reply missing field \"result\""))?;
        self.marked = Some(result.clone());
        Ok(())
    }

    pub(crate) fn done_markings(&mut self, kb: &mut KeyBroker) -> Result<State> {
        let marked = self
            .marked
            .as_ref()
            .ok_or_else(|| Error::client("no marked reply fed"))?;
        let mut placeholders = 0usize;
        visit_encrypted(marked, &mut |payload| {
            let marking = Marking::parse(payload)?;
            match &marking.key {
                KeyRef::Id(id) => kb.request_id(*id)?,
                KeyRef::AltName(name) => kb.request_alt_name(name)?,
            }
            placeholders += 1;
            Ok(())
        })?;
        if placeholders == 0 {
            return Ok(State::NothingToDo);
        }
        log::debug!("marking pass found {placeholders} placeholder(s)");
        Ok(State::NeedKeys)
    }

    pub(crate) fn finalize(
        &mut self,
        kb: &KeyBroker,
        crypto: &Arc<dyn Aead>,
        nothing_to_do: bool,
    ) -> Result<Document> {
        let marked = match (&self.marked, nothing_to_do) {
            (Some(m), _) => m,
            (None, true) => return Ok(self.cmd.clone()),
            (None, false) => return Err(Error::client("no marked reply fed")),
        };
        if nothing_to_do {
            return Ok(marked.clone());
        }
        map_encrypted(marked, &mut |bytes| {
            let marking = Marking::parse(bytes)?;
            let (dek, key_id) = resolve_marking_key(kb, &marking.key)?;
            let ct = encrypt_value(crypto, dek, key_id, marking.algorithm, &marking.value)?;
            Ok(Bson::Binary(ct.to_binary()))
        })
    }
}

fn resolve_marking_key<'a>(kb: &'a KeyBroker, key: &KeyRef) -> Result<(&'a [u8], Uuid)> {
    match key {
        KeyRef::Id(id) => Ok((kb.key_by_id(id)?, *id)),
        KeyRef::AltName(name) => {
            let dek = kb.key_by_alt_name(name)?;
            let id = kb.id_for_alt_name(name).ok_or_else(|| {
                Error::client(format!("alternate name \"{name}\" has no resolved id"))
            })?;
            Ok((dek, id))
        }
    }
}

/// Explicit encryption of a single value under a named DEK.
pub(crate) struct ExplicitEncrypt {
    value: Bson,
    algorithm: Algorithm,
    key: KeyRef,
}

impl ExplicitEncrypt {
    /// Registers the key request; the context starts at `NeedKeys`.
    pub(crate) fn new(
        msg: Document,
        algorithm: Algorithm,
        key: KeyRef,
        kb: &mut KeyBroker,
    ) -> Result<ExplicitEncrypt> {
        let value = msg
            .get("v")
            .cloned()
            .ok_or_else(|| Error::client("message must contain field \"v\""))?;
        match &key {
            KeyRef::Id(id) => kb.request_id(*id)?,
            KeyRef::AltName(name) => kb.request_alt_name(name)?,
        }
        Ok(ExplicitEncrypt {
            value,
            algorithm,
            key,
        })
    }

    pub(crate) fn finalize(&mut self, kb: &KeyBroker, crypto: &Arc<dyn Aead>) -> Result<Document> {
        let (dek, key_id) = resolve_marking_key(kb, &self.key)?;
        let ct = encrypt_value(crypto, dek, key_id, self.algorithm, &self.value)?;
        Ok(doc! { "v": Bson::Binary(ct.to_binary()) })
    }
}
