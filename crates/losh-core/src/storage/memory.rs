//! In-process store.
//!
//! Holds records in `BTreeMap`s, enforces the same referential integrity a
//! real catalog store does, and keeps a log of every accepted write. Lookup
//! and write failures can be injected per kind.

use super::{NodeStore, Record, RecordSource, check_links};
use crate::primitives::FIRST_UID;
use crate::schema::Schema;
use crate::types::{Identity, Kind, LoshError, Uid};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One accepted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create(Uid, Kind),
    Update(Uid, Kind),
}

impl WriteOp {
    #[must_use]
    pub fn uid(self) -> Uid {
        match self {
            WriteOp::Create(uid, _) | WriteOp::Update(uid, _) => uid,
        }
    }
}

/// In-memory [`NodeStore`].
#[derive(Debug)]
pub struct MemoryStore {
    schema: Arc<Schema>,
    records: BTreeMap<Uid, Record>,
    alt_index: BTreeMap<(Kind, String), Uid>,
    next_uid: u64,
    log: Vec<WriteOp>,
    failing_writes: BTreeSet<Kind>,
    failing_lookups: bool,
}

impl MemoryStore {
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            records: BTreeMap::new(),
            alt_index: BTreeMap::new(),
            next_uid: FIRST_UID,
            log: Vec::new(),
            failing_writes: BTreeSet::new(),
            failing_lookups: false,
        }
    }

    /// Insert reference data directly, bypassing the write log.
    pub fn seed(&mut self, mut record: Record) -> Result<Uid, LoshError> {
        self.insert_new(&mut record)
    }

    /// Make every write of `kind` fail with an I/O error.
    pub fn fail_writes_of(&mut self, kind: Kind) {
        self.failing_writes.insert(kind);
    }

    /// Make every alternate-key lookup fail with an I/O error.
    pub fn fail_lookups(&mut self) {
        self.failing_lookups = true;
    }

    /// Stop injecting failures.
    pub fn clear_failures(&mut self) {
        self.failing_writes.clear();
        self.failing_lookups = false;
    }

    /// Writes accepted so far, in order. Seeded records are not included.
    #[must_use]
    pub fn writes(&self) -> &[WriteOp] {
        &self.log
    }

    #[must_use]
    pub fn record(&self, uid: Uid) -> Option<&Record> {
        self.records.get(&uid)
    }

    /// The record of `kind` with the given alternate key.
    #[must_use]
    pub fn find(&self, kind: Kind, alt_id: &str) -> Option<&Record> {
        self.alt_index
            .get(&(kind, alt_id.to_string()))
            .and_then(|uid| self.records.get(uid))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check(&self, record: &Record) -> Result<(), LoshError> {
        if self.failing_writes.contains(&record.kind) {
            return Err(LoshError::IoError(format!(
                "injected write failure for {}",
                record.kind
            )));
        }
        check_links(&self.schema, record, |uid| {
            Ok(self.records.get(&uid).map(|r| r.kind))
        })
    }

    fn insert_new(&mut self, record: &mut Record) -> Result<Uid, LoshError> {
        if let Some(alt) = &record.alt_id
            && self.alt_index.contains_key(&(record.kind, alt.clone()))
        {
            return Err(LoshError::Integrity(format!(
                "{} already exists",
                record.describe()
            )));
        }
        let uid = Uid(self.next_uid);
        self.next_uid += 1;
        record.id = Some(uid);
        if let Some(alt) = &record.alt_id {
            self.alt_index.insert((record.kind, alt.clone()), uid);
        }
        self.records.insert(uid, record.clone());
        Ok(uid)
    }
}

impl NodeStore for MemoryStore {
    fn find_id_by_alt_key(&self, kind: Kind, alt_id: &str) -> Result<Option<Uid>, LoshError> {
        if self.failing_lookups {
            return Err(LoshError::IoError(format!(
                "injected lookup failure for {kind}"
            )));
        }
        Ok(self.alt_index.get(&(kind, alt_id.to_string())).copied())
    }

    fn create(&mut self, record: &Record) -> Result<Uid, LoshError> {
        if record.id.is_some() {
            return Err(LoshError::Integrity(format!(
                "create of {} which already has an id",
                record.describe()
            )));
        }
        self.check(record)?;
        let mut record = record.clone();
        let uid = self.insert_new(&mut record)?;
        self.log.push(WriteOp::Create(uid, record.kind));
        Ok(uid)
    }

    fn update(&mut self, record: &Record) -> Result<(), LoshError> {
        let uid = record.id.ok_or_else(|| {
            LoshError::Integrity(format!("update of {} without an id", record.describe()))
        })?;
        self.check(record)?;
        if let Some(alt) = &record.alt_id
            && let Some(&owner) = self.alt_index.get(&(record.kind, alt.clone()))
            && owner != uid
        {
            return Err(LoshError::Integrity(format!(
                "{} already exists as {owner}",
                record.describe()
            )));
        }
        let stored = self
            .records
            .get_mut(&uid)
            .ok_or_else(|| LoshError::NotFound(uid.to_string()))?;
        if stored.kind != record.kind {
            return Err(LoshError::Integrity(format!(
                "update of {uid} as {} but it is a {}",
                record.kind, stored.kind
            )));
        }
        let old_alt = stored.alt_id.clone();
        stored.merge(record);
        let new_alt = stored.alt_id.clone();
        if old_alt != new_alt {
            if let Some(old) = old_alt {
                self.alt_index.remove(&(record.kind, old));
            }
            if let Some(new) = new_alt {
                self.alt_index.insert((record.kind, new), uid);
            }
        }
        self.log.push(WriteOp::Update(uid, record.kind));
        Ok(())
    }
}

impl RecordSource for MemoryStore {
    fn get(&self, uid: Uid) -> Result<Option<Record>, LoshError> {
        Ok(self.records.get(&uid).cloned())
    }
}
