//! # redb-backed Record Storage
//!
//! A disk-backed [`NodeStore`] using the redb embedded database.
//!
//! Every create and update is one ACID write transaction. Integrity checks
//! read the records table inside the same transaction, so a refused write
//! leaves nothing behind.
//!
//! ## Tables
//!
//! - `records`: `Uid(u64)` -> postcard-encoded record
//! - `alt_index`: `(kind name, alternate key)` -> `Uid(u64)`
//! - `metadata`: `"next_uid"` -> `u64`

use super::{NodeStore, Record, RecordLink, RecordSource, check_links};
use crate::primitives::FIRST_UID;
use crate::schema::Schema;
use crate::types::{Identity, Kind, LoshError, Uid, Value};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Table for records: Uid(u64) -> serialized record bytes
const RECORDS: TableDefinition<u64, &[u8]> = TableDefinition::new("records");

/// Table for alternate keys: (kind, alt_id) -> Uid(u64)
const ALT_INDEX: TableDefinition<(&str, &str), u64> = TableDefinition::new("alt_index");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_UID_KEY: &str = "next_uid";

fn io_err(e: impl std::fmt::Display) -> LoshError {
    LoshError::IoError(e.to_string())
}

// =============================================================================
// ON-DISK ENCODING
// =============================================================================

// `Value` is untagged for JSON, which postcard cannot decode, so records are
// stored through tagged mirrors.

#[derive(Serialize, Deserialize)]
enum StoredValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Serialize, Deserialize)]
enum StoredLink {
    One(u64),
    Many(Vec<u64>),
}

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    kind: Kind,
    alt_id: Option<String>,
    attrs: Vec<(String, StoredValue)>,
    links: Vec<(String, StoredLink)>,
}

fn encode(record: &Record) -> Result<Vec<u8>, LoshError> {
    let stored = StoredRecord {
        kind: record.kind,
        alt_id: record.alt_id.clone(),
        attrs: record
            .attrs
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::Bool(b) => StoredValue::Bool(*b),
                    Value::Int(i) => StoredValue::Int(*i),
                    Value::Float(x) => StoredValue::Float(*x),
                    Value::Text(s) => StoredValue::Text(s.clone()),
                };
                (k.clone(), v)
            })
            .collect(),
        links: record
            .links
            .iter()
            .map(|(k, link)| {
                let link = match link {
                    RecordLink::One(uid) => StoredLink::One(uid.0),
                    RecordLink::Many(uids) => StoredLink::Many(uids.iter().map(|u| u.0).collect()),
                };
                (k.clone(), link)
            })
            .collect(),
    };
    postcard::to_allocvec(&stored).map_err(|e| LoshError::SerializationError(e.to_string()))
}

fn decode(uid: u64, bytes: &[u8]) -> Result<Record, LoshError> {
    let stored: StoredRecord =
        postcard::from_bytes(bytes).map_err(|e| LoshError::SerializationError(e.to_string()))?;
    Ok(Record {
        kind: stored.kind,
        id: Some(Uid(uid)),
        alt_id: stored.alt_id,
        attrs: stored
            .attrs
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    StoredValue::Bool(b) => Value::Bool(b),
                    StoredValue::Int(i) => Value::Int(i),
                    StoredValue::Float(x) => Value::Float(x),
                    StoredValue::Text(s) => Value::Text(s),
                };
                (k, v)
            })
            .collect(),
        links: stored
            .links
            .into_iter()
            .map(|(k, link)| {
                let link = match link {
                    StoredLink::One(uid) => RecordLink::One(Uid(uid)),
                    StoredLink::Many(uids) => RecordLink::Many(uids.into_iter().map(Uid).collect()),
                };
                (k, link)
            })
            .collect(),
    })
}

// =============================================================================
// STORE
// =============================================================================

/// A disk-backed record store using redb.
pub struct RedbStore {
    db: Database,
    schema: Arc<Schema>,
    next_uid: u64,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("next_uid", &self.next_uid)
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>, schema: Arc<Schema>) -> Result<Self, LoshError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            let _ = write_txn.open_table(RECORDS).map_err(io_err)?;
            let _ = write_txn.open_table(ALT_INDEX).map_err(io_err)?;
            let _ = write_txn.open_table(METADATA).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }

        let next_uid = {
            let read_txn = db.begin_read().map_err(io_err)?;
            let table = read_txn.open_table(METADATA).map_err(io_err)?;
            table
                .get(NEXT_UID_KEY)
                .map_err(io_err)?
                .map(|v| v.value())
                .unwrap_or(FIRST_UID)
        };

        tracing::debug!(path = %path.as_ref().display(), next_uid, "opened record store");
        Ok(Self {
            db,
            schema,
            next_uid,
        })
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<u64, LoshError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(RECORDS).map_err(io_err)?;
        table.len().map_err(io_err)
    }

    pub fn is_empty(&self) -> Result<bool, LoshError> {
        Ok(self.len()? == 0)
    }

    /// Record counts per kind. Scans every record.
    pub fn count_by_kind(&self) -> Result<BTreeMap<Kind, u64>, LoshError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(RECORDS).map_err(io_err)?;
        let mut counts = BTreeMap::new();
        for entry in table.iter().map_err(io_err)? {
            let (key, value) = entry.map_err(io_err)?;
            let record = decode(key.value(), value.value())?;
            *counts.entry(record.kind).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// The record of `kind` with the given alternate key.
    pub fn find(&self, kind: Kind, alt_id: &str) -> Result<Option<Record>, LoshError> {
        match self.find_id_by_alt_key(kind, alt_id)? {
            Some(uid) => self.get(uid),
            None => Ok(None),
        }
    }

    /// Run a write transaction that stores `record` under `uid`.
    ///
    /// `previous_alt` is the alternate key currently indexed for `uid`.
    fn write(
        &mut self,
        uid: u64,
        record: &Record,
        previous_alt: Option<&str>,
        next_uid: u64,
    ) -> Result<(), LoshError> {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut records = write_txn.open_table(RECORDS).map_err(io_err)?;
            let mut alt_index = write_txn.open_table(ALT_INDEX).map_err(io_err)?;
            let mut meta = write_txn.open_table(METADATA).map_err(io_err)?;

            check_links(&self.schema, record, |target| {
                match records.get(target.0).map_err(io_err)? {
                    Some(guard) => Ok(Some(decode(target.0, guard.value())?.kind)),
                    None => Ok(None),
                }
            })?;

            let kind = record.kind.as_str();
            if let Some(alt) = record.alt_id.as_deref()
                && previous_alt != Some(alt)
            {
                let taken = alt_index.get((kind, alt)).map_err(io_err)?.map(|g| g.value());
                if taken.is_some_and(|other| other != uid) {
                    return Err(LoshError::Integrity(format!(
                        "{} already exists",
                        record.describe()
                    )));
                }
                if let Some(old) = previous_alt {
                    alt_index.remove((kind, old)).map_err(io_err)?;
                }
                alt_index.insert((kind, alt), uid).map_err(io_err)?;
            }

            let bytes = encode(record)?;
            records.insert(uid, bytes.as_slice()).map_err(io_err)?;
            meta.insert(NEXT_UID_KEY, next_uid).map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;
        Ok(())
    }
}

impl NodeStore for RedbStore {
    fn find_id_by_alt_key(&self, kind: Kind, alt_id: &str) -> Result<Option<Uid>, LoshError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(ALT_INDEX).map_err(io_err)?;
        let found = table
            .get((kind.as_str(), alt_id))
            .map_err(io_err)?
            .map(|v| Uid(v.value()));
        Ok(found)
    }

    fn create(&mut self, record: &Record) -> Result<Uid, LoshError> {
        if record.id.is_some() {
            return Err(LoshError::Integrity(format!(
                "create of {} which already has an id",
                record.describe()
            )));
        }
        let uid = self.next_uid;
        let mut stored = record.clone();
        stored.id = Some(Uid(uid));
        self.write(uid, &stored, None, uid + 1)?;
        self.next_uid = uid + 1;
        tracing::trace!(uid = %Uid(uid), kind = %record.kind, "created record");
        Ok(Uid(uid))
    }

    fn update(&mut self, record: &Record) -> Result<(), LoshError> {
        let uid = record.id.ok_or_else(|| {
            LoshError::Integrity(format!("update of {} without an id", record.describe()))
        })?;
        let mut stored = self
            .get(uid)?
            .ok_or_else(|| LoshError::NotFound(uid.to_string()))?;
        if stored.kind != record.kind {
            return Err(LoshError::Integrity(format!(
                "update of {uid} as {} but it is a {}",
                record.kind, stored.kind
            )));
        }
        let previous_alt = stored.alt_id.clone();
        stored.merge(record);
        self.write(uid.0, &stored, previous_alt.as_deref(), self.next_uid)?;
        tracing::trace!(uid = %uid, kind = %record.kind, "updated record");
        Ok(())
    }
}

impl RecordSource for RedbStore {
    fn get(&self, uid: Uid) -> Result<Option<Record>, LoshError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(RECORDS).map_err(io_err)?;
        match table.get(uid.0).map_err(io_err)? {
            Some(guard) => Ok(Some(decode(uid.0, guard.value())?)),
            None => Ok(None),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::load_graph;
    use tempfile::tempdir;

    fn open(dir: &Path) -> RedbStore {
        RedbStore::open(dir.join("catalog.redb"), Arc::new(Schema::catalog())).expect("open store")
    }

    #[test]
    fn create_find_and_reopen() {
        let dir = tempdir().expect("temp dir");
        let host_uid;
        let repo_uid;
        {
            let mut store = open(dir.path());
            let mut host = Record::new(Kind::Host);
            host.alt_id = Some("github.com".into());
            host.attrs.insert("score".into(), Value::Float(0.5));
            host_uid = store.create(&host).expect("create host");

            let mut repo = Record::new(Kind::Repository);
            repo.alt_id = Some("github.com/o/r".into());
            repo.links.insert("host".into(), RecordLink::One(host_uid));
            repo_uid = store.create(&repo).expect("create repo");
        }

        let store = open(dir.path());
        assert_eq!(store.len().expect("len"), 2);
        assert_eq!(
            store.find_id_by_alt_key(Kind::Host, "github.com").expect("lookup"),
            Some(host_uid)
        );
        let host = store.get(host_uid).expect("get").expect("present");
        assert_eq!(host.attrs.get("score"), Some(&Value::Float(0.5)));

        let counts = store.count_by_kind().expect("counts");
        assert_eq!(counts.get(&Kind::Repository), Some(&1));

        let (graph, root) =
            load_graph(&store, Arc::clone(store.schema()), repo_uid).expect("load graph");
        assert_eq!(graph.len(), 2);
        let host_ref = graph.linked(root, "host").expect("field")[0];
        assert_eq!(graph.node(host_ref).alt_id(), Some("github.com"));

        // Identifiers keep counting after reopen.
        let mut store = store;
        let uid = store.create(&Record::new(Kind::Material)).expect("create");
        assert!(uid.0 > repo_uid.0);
    }

    #[test]
    fn integrity_violations_leave_no_trace() {
        let dir = tempdir().expect("temp dir");
        let mut store = open(dir.path());
        let mut repo = Record::new(Kind::Repository);
        repo.alt_id = Some("orphan".into());
        repo.links.insert("host".into(), RecordLink::One(Uid(77)));
        assert!(matches!(store.create(&repo), Err(LoshError::Integrity(_))));
        assert_eq!(store.len().expect("len"), 0);
        assert_eq!(store.find_id_by_alt_key(Kind::Repository, "orphan").expect("lookup"), None);
    }

    #[test]
    fn update_merges_and_reindexes() {
        let dir = tempdir().expect("temp dir");
        let mut store = open(dir.path());
        let mut tag = Record::new(Kind::Tag);
        tag.alt_id = Some("cnc".into());
        tag.attrs.insert("label".into(), Value::from("CNC"));
        let uid = store.create(&tag).expect("create");

        let mut patch = Record::new(Kind::Tag);
        patch.id = Some(uid);
        patch.alt_id = Some("cnc-machining".into());
        patch.links.insert("related".into(), RecordLink::Many(vec![uid]));
        store.update(&patch).expect("update");

        let stored = store.find(Kind::Tag, "cnc-machining").expect("find").expect("present");
        assert_eq!(stored.attrs.get("label"), Some(&Value::from("CNC")));
        assert_eq!(stored.links.get("related"), Some(&RecordLink::Many(vec![uid])));
        assert_eq!(store.find_id_by_alt_key(Kind::Tag, "cnc").expect("lookup"), None);
    }
}
