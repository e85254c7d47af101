use std::sync::Arc;

use bson::Document;

use crate::broker::KeyBroker;
use crate::config::KmsCredentials;
use crate::ctx_datakey::DataKeyOp;
use crate::ctx_decrypt::DecryptOp;
use crate::ctx_encrypt::{AutoEncrypt, ExplicitEncrypt};
use crate::error::{Error, Result, Status};
use crate::kms::KmsContext;
use crate::traits::Aead;

/// Observable pump states. The caller reads the state, performs the I/O it
/// mandates, and feeds results back until `Ready` (or `NothingToDo`), then
/// finalizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Emit the collection-info filter; feed the collection-info reply.
    NeedCollInfo,
    /// Emit the command for marking; feed the marked reply.
    NeedMarkings,
    /// Emit the key vault filter; feed key documents.
    NeedKeys,
    /// Drive the KMS subcontexts from `next_kms_ctx`.
    NeedKms,
    /// All inputs gathered; `finalize` will produce the output.
    Ready,
    /// Terminal success: the payload required no work.
    NothingToDo,
    /// Terminal: `finalize` produced the output.
    Done,
    /// Terminal: the status channel carries the first failure.
    Error,
}

pub(crate) enum Variant {
    EncryptAuto(AutoEncrypt),
    EncryptExplicit(ExplicitEncrypt),
    Decrypt(DecryptOp),
    CreateDataKey(DataKeyOp),
}

/// One encryption, decryption, or key-creation operation.
///
/// A context performs no I/O of its own; every network round trip is done by
/// the caller between pump calls. It is `Send` but not internally
/// synchronized: one thread pumps one context at a time. Dropping the
/// context cancels the operation and zeroizes key material.
pub struct Context {
    state: State,
    status: Status,
    kb: KeyBroker,
    crypto: Arc<dyn Aead>,
    creds: Arc<KmsCredentials>,
    variant: Variant,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("state", &self.state)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

fn wrong_state() -> Error {
    Error::client("wrong state")
}

impl Context {
    pub(crate) fn new(
        variant: Variant,
        state: State,
        kb: KeyBroker,
        crypto: Arc<dyn Aead>,
        creds: Arc<KmsCredentials>,
    ) -> Self {
        Context {
            state,
            status: Status::ok(),
            kb,
            crypto,
            creds,
            variant,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Current status: ok, or the first recorded failure.
    pub fn status(&self) -> Status {
        self.status.clone()
    }

    /// If the context already failed, every driver call returns the original
    /// failure; nothing overwrites it.
    fn guard(&self) -> Result<()> {
        if self.state == State::Error {
            return Err(self
                .status
                .error()
                .cloned()
                .unwrap_or_else(|| Error::client("context is failed")));
        }
        Ok(())
    }

    fn fail(&mut self, err: Error) -> Error {
        self.status.set_once(err);
        self.state = State::Error;
        self.status.error().cloned().expect("failure was recorded")
    }

    fn transition(&mut self, next: State) {
        log::trace!("context state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Emit the outbound document for the current `Need*` state: the
    /// collection-info filter, the command to mark, or the key vault filter.
    pub fn db_op(&mut self) -> Result<Document> {
        self.guard()?;
        let r = match self.state {
            State::NeedCollInfo => match &mut self.variant {
                Variant::EncryptAuto(e) => e.op_collinfo(),
                _ => Err(wrong_state()),
            },
            State::NeedMarkings => match &mut self.variant {
                Variant::EncryptAuto(e) => e.op_markings(),
                _ => Err(wrong_state()),
            },
            State::NeedKeys => self.kb.filter(),
            _ => Err(wrong_state()),
        };
        r.map_err(|e| self.fail(e))
    }

    /// Ingest one result document for the current `Need*` state. May be
    /// called once per result; key documents accumulate.
    pub fn db_feed(&mut self, doc: &Document) -> Result<()> {
        self.guard()?;
        let r = match self.state {
            State::NeedCollInfo => match &mut self.variant {
                Variant::EncryptAuto(e) => e.feed_collinfo(doc),
                _ => Err(wrong_state()),
            },
            State::NeedMarkings => match &mut self.variant {
                Variant::EncryptAuto(e) => e.feed_markings(doc),
                _ => Err(wrong_state()),
            },
            State::NeedKeys => self.kb.add_doc(doc),
            _ => Err(wrong_state()),
        };
        r.map_err(|e| self.fail(e))
    }

    /// Close the current ingest phase and compute the next state.
    pub fn db_done(&mut self) -> Result<()> {
        self.guard()?;
        let r = match self.state {
            State::NeedCollInfo => match &mut self.variant {
                Variant::EncryptAuto(e) => e.done_collinfo(),
                _ => Err(wrong_state()),
            },
            State::NeedMarkings => match &mut self.variant {
                Variant::EncryptAuto(e) => e.done_markings(&mut self.kb),
                _ => Err(wrong_state()),
            },
            State::NeedKeys => self
                .kb
                .done_adding_docs(&self.creds, &self.crypto)
                .map(|()| State::NeedKms),
            _ => Err(wrong_state()),
        };
        match r {
            Ok(next) => {
                self.transition(next);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// In `NeedKms`, one subcontext that still needs driving, or none.
    /// Iteration order is unspecified; callers must not depend on it.
    pub fn next_kms_ctx(&mut self) -> Option<&mut KmsContext> {
        if self.state != State::NeedKms {
            return None;
        }
        match &mut self.variant {
            Variant::CreateDataKey(d) => d.next_kms(),
            _ => self.kb.next_kms(),
        }
    }

    /// Assert the KMS phase is complete and advance to `Ready`.
    pub fn kms_done(&mut self) -> Result<()> {
        self.guard()?;
        if self.state != State::NeedKms {
            return Err(self.fail(wrong_state()));
        }
        let r = match &mut self.variant {
            Variant::CreateDataKey(d) => d.kms_done(),
            _ => self.kb.kms_done(&self.crypto),
        };
        match r {
            Ok(()) => {
                self.transition(State::Ready);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Produce the operation's output document. Legal in `Ready` and in
    /// `NothingToDo` (where the payload comes back unchanged).
    pub fn finalize(&mut self) -> Result<Document> {
        self.guard()?;
        if self.state != State::Ready && self.state != State::NothingToDo {
            return Err(self.fail(wrong_state()));
        }
        let nothing_to_do = self.state == State::NothingToDo;
        let r = match &mut self.variant {
            Variant::EncryptAuto(e) => e.finalize(&self.kb, &self.crypto, nothing_to_do),
            Variant::EncryptExplicit(e) => e.finalize(&self.kb, &self.crypto),
            Variant::Decrypt(d) => d.finalize(&self.kb, &self.crypto, nothing_to_do),
            Variant::CreateDataKey(d) => d.finalize(),
        };
        match r {
            Ok(out) => {
                self.transition(State::Done);
                Ok(out)
            }
            Err(e) => Err(self.fail(e)),
        }
    }
}
