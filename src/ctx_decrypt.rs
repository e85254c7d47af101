use std::sync::Arc;

use bson::{Bson, Document};

use crate::broker::KeyBroker;
use crate::ctx::State;
use crate::error::{Error, Result};
use crate::payload::{decrypt_value, is_marking, map_encrypted, visit_encrypted, Ciphertext};
use crate::traits::Aead;

/// Decryption of every encrypted field in a document.
///
/// The payload is scanned once at construction: each subtype-6 ciphertext
/// registers its DEK id with the broker. A payload without encrypted fields
/// starts (and ends) at `NothingToDo`.
pub(crate) struct DecryptOp {
    payload: Document,
}

impl DecryptOp {
    pub(crate) fn new(payload: Document, kb: &mut KeyBroker) -> Result<(DecryptOp, State)> {
        let mut found = 0usize;
        visit_encrypted(&payload, &mut |bytes| {
            if is_marking(bytes) {
                return Err(Error::client(
                    "unexpected marking placeholder in ciphertext document",
                ));
            }
            let ct = Ciphertext::parse(bytes)?;
            kb.request_id(ct.key_id)?;
            found += 1;
            Ok(())
        })?;
        let state = if found == 0 {
            State::NothingToDo
        } else {
            log::debug!("decrypt payload references {found} encrypted field(s)");
            State::NeedKeys
        };
        Ok((DecryptOp { payload }, state))
    }

    pub(crate) fn finalize(
        &mut self,
        kb: &KeyBroker,
        crypto: &Arc<dyn Aead>,
        nothing_to_do: bool,
    ) -> Result<Document> {
        if nothing_to_do {
            return Ok(self.payload.clone());
        }
        map_encrypted(&self.payload, &mut |bytes| {
            let ct = Ciphertext::parse(bytes)?;
            let dek = kb.key_by_id(&ct.key_id)?;
            let value: Bson = decrypt_value(crypto, dek, &ct)?;
            Ok(value)
        })
    }
}
