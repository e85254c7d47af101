use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use bson::{doc, Bson, Document};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::KmsCredentials;
use crate::error::{Error, Result};
use crate::kek::Kek;
use crate::key::{uuid_to_bson, KeyDocument};
use crate::kms::KmsContext;
use crate::kms_gcp::GcpKeyPath;
use crate::traits::Aead;
use crate::{kms_aws, kms_azure, kms_gcp, kms_local};

/// Broker lifecycle. Progression is monotonic; operations check the state
/// they are legal in and fail otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BrokerState {
    CollectingRequests,
    RequestsFrozen,
    AddingDocs,
    DocsFrozen,
    KmsRunning,
    KmsComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    /// Requested, no key document seen yet.
    Pending,
    /// A key document satisfied this entry.
    Resolved,
    /// Unresolved at freeze time, tolerated in permissive mode.
    Skipped,
    /// Unified into another entry; a tombstone.
    Merged,
}

struct Entry {
    id: Option<Uuid>,
    alt_names: BTreeSet<String>,
    state: EntryState,
    kek: Option<Kek>,
    wrapped: Option<Vec<u8>>,
    unwrapped: Option<Zeroizing<Vec<u8>>>,
    kms: Option<KmsContext>,
}

impl Entry {
    fn requested_id(id: Uuid) -> Self {
        Entry {
            id: Some(id),
            alt_names: BTreeSet::new(),
            state: EntryState::Pending,
            kek: None,
            wrapped: None,
            unwrapped: None,
            kms: None,
        }
    }

    fn requested_alt_name(name: String) -> Self {
        Entry {
            id: None,
            alt_names: std::iter::once(name).collect(),
            state: EntryState::Pending,
            kek: None,
            wrapped: None,
            unwrapped: None,
            kms: None,
        }
    }

    fn criterion(&self) -> String {
        match (&self.id, self.alt_names.iter().next()) {
            (Some(id), _) => format!("id={id}"),
            (None, Some(name)) => format!("altName={name}"),
            (None, None) => "unknown".to_string(),
        }
    }
}

/// Aggregates the DEKs an operation needs, de-duplicates them, drives the
/// KMS subcontexts that unwrap each one, and serves the decrypted material.
///
/// Entries live in an arena; id→entry and alt-name→entry maps unify requests
/// that turn out to name the same key.
pub struct KeyBroker {
    state: BrokerState,
    strict: bool,
    entries: Vec<Entry>,
    id_index: HashMap<Uuid, usize>,
    name_index: HashMap<String, usize>,
    cursor: usize,
}

impl KeyBroker {
    /// `strict` makes an unsatisfied key request a hard error at
    /// `done_adding_docs`; permissive brokers mark such entries skipped.
    pub fn new(strict: bool) -> Self {
        KeyBroker {
            state: BrokerState::CollectingRequests,
            strict,
            entries: Vec::new(),
            id_index: HashMap::new(),
            name_index: HashMap::new(),
            cursor: 0,
        }
    }

    pub fn state(&self) -> BrokerState {
        self.state
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_state(&self, allowed: &[BrokerState], what: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(Error::client(format!(
            "cannot {what} in broker state {:?}",
            self.state
        )))
    }

    /// Request a key by id. Duplicate requests collapse into one entry.
    pub fn request_id(&mut self, id: Uuid) -> Result<()> {
        self.check_state(&[BrokerState::CollectingRequests], "request a key")?;
        if self.id_index.contains_key(&id) {
            return Ok(());
        }
        self.entries.push(Entry::requested_id(id));
        self.id_index.insert(id, self.entries.len() - 1);
        Ok(())
    }

    /// Request a key by alternate name. Whether the name refers to a key that
    /// is also requested by id is unknown until a key document arrives;
    /// unification happens in `add_doc`.
    pub fn request_alt_name(&mut self, name: &str) -> Result<()> {
        self.check_state(&[BrokerState::CollectingRequests], "request a key")?;
        if self.name_index.contains_key(name) {
            return Ok(());
        }
        self.entries.push(Entry::requested_alt_name(name.to_string()));
        self.name_index.insert(name.to_string(), self.entries.len() - 1);
        Ok(())
    }

    /// Freeze the request set and emit the find filter matching every
    /// outstanding criterion. Empty document when nothing was requested.
    pub fn filter(&mut self) -> Result<Document> {
        self.check_state(&[BrokerState::CollectingRequests], "build the key filter")?;
        self.state = BrokerState::RequestsFrozen;
        if self.entries.is_empty() {
            return Ok(Document::new());
        }
        let ids: Vec<Bson> = self
            .entries
            .iter()
            .filter_map(|e| e.id.as_ref())
            .map(uuid_to_bson)
            .collect();
        let names: Vec<Bson> = self
            .entries
            .iter()
            .filter(|e| e.id.is_none())
            .flat_map(|e| e.alt_names.iter())
            .map(|n| Bson::String(n.clone()))
            .collect();
        log::trace!(
            "key filter: {} id(s), {} alt name(s)",
            ids.len(),
            names.len()
        );
        Ok(doc! {
            "$or": [
                { "_id": { "$in": ids } },
                { "keyAltNames": { "$in": names } },
            ]
        })
    }

    /// Ingest one candidate key document. The document must satisfy at least
    /// one outstanding request; entries it satisfies are unified. Feeding the
    /// same document twice is a no-op.
    pub fn add_doc(&mut self, doc: &Document) -> Result<()> {
        self.check_state(
            &[BrokerState::RequestsFrozen, BrokerState::AddingDocs],
            "add a key document",
        )?;
        self.state = BrokerState::AddingDocs;
        let kd = KeyDocument::parse(doc)?;

        if let Some(&i) = self.id_index.get(&kd.id) {
            if self.entries[i].state == EntryState::Resolved {
                // same key fed twice
                return Ok(());
            }
        }

        let mut matched: Vec<usize> = Vec::new();
        if let Some(&i) = self.id_index.get(&kd.id) {
            matched.push(i);
        }
        for name in &kd.alt_names {
            if let Some(&i) = self.name_index.get(name) {
                if !matched.contains(&i) {
                    matched.push(i);
                }
            }
        }
        if matched.is_empty() {
            return Err(Error::client(format!(
                "key document {} does not match any outstanding key request",
                kd.id
            )));
        }
        for &i in &matched {
            if self.entries[i].state == EntryState::Resolved {
                return Err(Error::client(format!(
                    "key document {} conflicts with an already resolved key",
                    kd.id
                )));
            }
        }

        // Unify everything the document satisfied into the lowest slot.
        let canonical = *matched.iter().min().expect("matched is non-empty");
        let mut names: BTreeSet<String> = kd.alt_names.iter().cloned().collect();
        for &i in &matched {
            if i == canonical {
                continue;
            }
            let merged = std::mem::take(&mut self.entries[i].alt_names);
            names.extend(merged);
            self.entries[i].state = EntryState::Merged;
            log::debug!("unified key request slot {i} into {canonical}");
        }
        let entry = &mut self.entries[canonical];
        names.extend(std::mem::take(&mut entry.alt_names));
        entry.id = Some(kd.id);
        entry.alt_names = names;
        entry.kek = Some(kd.kek);
        entry.wrapped = Some(kd.key_material);
        entry.state = EntryState::Resolved;

        self.id_index.insert(kd.id, canonical);
        for name in self.entries[canonical].alt_names.clone() {
            self.name_index.insert(name, canonical);
        }
        log::debug!("key {} resolved", kd.id);
        Ok(())
    }

    /// Close ingestion. In strict mode every request must have been
    /// satisfied. Resolved entries get a KMS subcontext per their KEK
    /// variant; local KEKs unwrap in-process and complete immediately.
    pub fn done_adding_docs(
        &mut self,
        creds: &KmsCredentials,
        crypto: &Arc<dyn Aead>,
    ) -> Result<()> {
        self.check_state(
            &[BrokerState::RequestsFrozen, BrokerState::AddingDocs],
            "finish adding key documents",
        )?;
        let unresolved: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.state == EntryState::Pending)
            .map(Entry::criterion)
            .collect();
        if !unresolved.is_empty() {
            if self.strict {
                return Err(Error::client(format!(
                    "could not satisfy key requests: [{}]",
                    unresolved.join(", ")
                )));
            }
            for e in &mut self.entries {
                if e.state == EntryState::Pending {
                    e.state = EntryState::Skipped;
                }
            }
        }
        self.state = BrokerState::DocsFrozen;

        for entry in &mut self.entries {
            if entry.state != EntryState::Resolved {
                continue;
            }
            let kek = entry.kek.as_ref().expect("resolved entry has a KEK");
            let wrapped = entry.wrapped.as_deref().expect("resolved entry is wrapped");
            match kek {
                Kek::Local => {
                    let master = creds
                        .local_master_key
                        .as_ref()
                        .ok_or_else(|| missing_credentials("local"))?;
                    let dek = kms_local::unwrap(crypto, master, wrapped)?;
                    check_dek_len(dek.len(), crypto.key_len())?;
                    entry.unwrapped = Some(dek);
                }
                Kek::Aws {
                    region, endpoint, ..
                } => {
                    let aws = creds.aws.as_ref().ok_or_else(|| missing_credentials("aws"))?;
                    entry.kms = Some(kms_aws::decrypt_request(
                        aws,
                        region,
                        endpoint.as_ref(),
                        wrapped,
                    )?);
                }
                Kek::Azure {
                    key_vault_endpoint,
                    key_name,
                    key_version,
                } => {
                    let azure = creds
                        .azure
                        .as_ref()
                        .ok_or_else(|| missing_credentials("azure"))?;
                    entry.kms = Some(kms_azure::unwrap_request(
                        azure,
                        key_vault_endpoint,
                        key_name,
                        key_version.as_deref(),
                        wrapped,
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
                    let gcp = creds.gcp.as_ref().ok_or_else(|| missing_credentials("gcp"))?;
                    let path = GcpKeyPath {
                        project_id,
                        location,
                        key_ring,
                        key_name,
                        key_version: key_version.as_deref(),
                    };
                    entry.kms = Some(kms_gcp::decrypt_request(
                        gcp,
                        &path,
                        endpoint.as_ref(),
                        wrapped,
                    )?);
                }
            }
        }
        self.state = BrokerState::KmsRunning;
        self.cursor = 0;
        Ok(())
    }

    /// One subcontext that still needs driving, or none. Iteration order is
    /// unspecified; every incomplete subcontext is eventually yielded.
    pub fn next_kms(&mut self) -> Option<&mut KmsContext> {
        if self.state != BrokerState::KmsRunning || self.entries.is_empty() {
            return None;
        }
        let n = self.entries.len();
        for off in 0..n {
            let i = (self.cursor + off) % n;
            let pending = matches!(&self.entries[i].kms, Some(kms) if !kms.is_settled());
            if pending {
                self.cursor = (i + 1) % n;
                return self.entries[i].kms.as_mut();
            }
        }
        None
    }

    /// Assert every subcontext completed, harvest the unwrapped DEKs, and
    /// make them available for lookup. The first subcontext failure wins.
    pub fn kms_done(&mut self, crypto: &Arc<dyn Aead>) -> Result<()> {
        self.check_state(&[BrokerState::KmsRunning], "finish the KMS phase")?;
        for entry in &mut self.entries {
            let Some(kms) = entry.kms.as_mut() else {
                continue;
            };
            if let Some(err) = kms.error() {
                return Err(err.clone());
            }
            if !kms.is_done() {
                return Err(Error::client(
                    "KMS requests are not complete; feed every subcontext first",
                ));
            }
            let dek = kms
                .take_result()
                .ok_or_else(|| Error::kms("KMS subcontext produced no key material"))?;
            check_dek_len(dek.len(), crypto.key_len())?;
            entry.unwrapped = Some(dek);
        }
        self.state = BrokerState::KmsComplete;
        log::debug!("kms phase complete: {} key(s) unwrapped", self.entries.len());
        Ok(())
    }

    /// Unwrapped key material by id. Legal once the KMS phase completed.
    pub fn key_by_id(&self, id: &Uuid) -> Result<&[u8]> {
        self.check_state(&[BrokerState::KmsComplete], "look up key material")?;
        let entry = self
            .id_index
            .get(id)
            .map(|&i| &self.entries[i])
            .filter(|e| e.state == EntryState::Resolved);
        match entry.and_then(|e| e.unwrapped.as_deref()) {
            Some(dek) => Ok(dek),
            None => Err(Error::client(format!("no key material for key id {id}"))),
        }
    }

    /// Unwrapped key material by alternate name.
    pub fn key_by_alt_name(&self, name: &str) -> Result<&[u8]> {
        self.check_state(&[BrokerState::KmsComplete], "look up key material")?;
        let entry = self
            .name_index
            .get(name)
            .map(|&i| &self.entries[i])
            .filter(|e| e.state == EntryState::Resolved);
        match entry.and_then(|e| e.unwrapped.as_deref()) {
            Some(dek) => Ok(dek),
            None => Err(Error::client(format!(
                "no key material for key alternate name \"{name}\""
            ))),
        }
    }

    /// Id the given alt name resolved to, once known.
    pub fn id_for_alt_name(&self, name: &str) -> Option<Uuid> {
        self.name_index
            .get(name)
            .and_then(|&i| self.entries[i].id)
    }
}

fn missing_credentials(provider: &str) -> Error {
    Error::client(format!(
        "no credentials configured for KMS provider: {provider}"
    ))
}

fn check_dek_len(got: usize, want: usize) -> Result<()> {
    if got != want {
        return Err(Error::kms(format!(
            "unwrapped key material is {got} bytes, expected {want}"
        )));
    }
    Ok(())
}
