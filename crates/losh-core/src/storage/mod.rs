//! # Storage
//!
//! The contract between the engine and a backing store, plus two stores:
//! - [`MemoryStore`]: in-process, with a write log and failure injection
//! - [`RedbStore`]: disk-backed, using the redb embedded database
//!
//! A store assigns identifiers on create, answers alternate-key lookups, and
//! refuses writes whose references point at records it does not hold.

mod memory;
mod redb_store;

pub use memory::{MemoryStore, WriteOp};
pub use redb_store::RedbStore;

use crate::graph::{Graph, NodeRef};
use crate::schema::{Cardinality, Schema};
use crate::types::{Identity, Kind, LoshError, Uid, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

// =============================================================================
// RECORDS
// =============================================================================

/// A reference field as written to a store: target identifiers only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordLink {
    One(Uid),
    Many(Vec<Uid>),
}

impl RecordLink {
    #[must_use]
    pub fn targets(&self) -> &[Uid] {
        match self {
            RecordLink::One(uid) => std::slice::from_ref(uid),
            RecordLink::Many(uids) => uids,
        }
    }
}

/// The flat form of one entity exchanged with a store.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub kind: Kind,
    pub id: Option<Uid>,
    pub alt_id: Option<String>,
    pub attrs: BTreeMap<String, Value>,
    pub links: BTreeMap<String, RecordLink>,
}

impl Record {
    #[must_use]
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            id: None,
            alt_id: None,
            attrs: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    /// Flatten a graph node.
    ///
    /// Only references whose target already has an identifier are included.
    /// A list field keeps its resolved elements and is omitted when none are.
    #[must_use]
    pub fn from_node(graph: &Graph, r: NodeRef) -> Self {
        let node = graph.node(r);
        let mut links = BTreeMap::new();
        let fields = &graph.schema().kind(node.kind()).fields;
        for (spec, slot) in fields.iter().zip(node.slots()) {
            let resolved: Vec<Uid> = slot
                .targets()
                .iter()
                .filter_map(|t| graph.node(*t).id())
                .collect();
            let link = match spec.cardinality {
                Cardinality::One => resolved.first().copied().map(RecordLink::One),
                Cardinality::Many => (!resolved.is_empty()).then_some(RecordLink::Many(resolved)),
            };
            if let Some(link) = link {
                links.insert(spec.name.to_string(), link);
            }
        }
        Self {
            kind: node.kind(),
            id: node.id(),
            alt_id: node.alt_id().map(str::to_string),
            attrs: node.attrs().clone(),
            links,
        }
    }

    /// Apply a partial update: present attributes and links replace stored
    /// ones, absent ones are kept.
    pub fn merge(&mut self, patch: &Record) {
        if patch.alt_id.is_some() {
            self.alt_id.clone_from(&patch.alt_id);
        }
        for (name, value) in &patch.attrs {
            self.attrs.insert(name.clone(), value.clone());
        }
        for (name, link) in &patch.links {
            self.links.insert(name.clone(), link.clone());
        }
    }
}

impl Identity for Record {
    fn kind(&self) -> Kind {
        self.kind
    }

    fn id(&self) -> Option<Uid> {
        self.id
    }

    fn alt_id(&self) -> Option<&str> {
        self.alt_id.as_deref()
    }
}

// =============================================================================
// STORE TRAITS
// =============================================================================

/// The write-side contract used by the saver.
pub trait NodeStore {
    /// Identifier of the record of `kind` whose alternate key is `alt_id`.
    fn find_id_by_alt_key(&self, kind: Kind, alt_id: &str) -> Result<Option<Uid>, LoshError>;

    /// Create a record and return its new identifier.
    fn create(&mut self, record: &Record) -> Result<Uid, LoshError>;

    /// Patch an existing record. `record.id` must be set.
    fn update(&mut self, record: &Record) -> Result<(), LoshError>;
}

/// Read access to stored records by identifier.
pub trait RecordSource {
    fn get(&self, uid: Uid) -> Result<Option<Record>, LoshError>;
}

impl<S: NodeStore + ?Sized> NodeStore for &mut S {
    fn find_id_by_alt_key(&self, kind: Kind, alt_id: &str) -> Result<Option<Uid>, LoshError> {
        (**self).find_id_by_alt_key(kind, alt_id)
    }

    fn create(&mut self, record: &Record) -> Result<Uid, LoshError> {
        (**self).create(record)
    }

    fn update(&mut self, record: &Record) -> Result<(), LoshError> {
        (**self).update(record)
    }
}

// =============================================================================
// INTEGRITY
// =============================================================================

/// Check a record's references against the schema and the store.
///
/// `lookup` returns the kind of a stored record, or `None` if absent.
pub(crate) fn check_links(
    schema: &Schema,
    record: &Record,
    mut lookup: impl FnMut(Uid) -> Result<Option<Kind>, LoshError>,
) -> Result<(), LoshError> {
    if let Some(alt) = &record.alt_id
        && alt.len() > crate::primitives::MAX_ALT_ID_LENGTH
    {
        return Err(LoshError::Integrity(format!(
            "{} alternate key exceeds {} bytes",
            record.kind,
            crate::primitives::MAX_ALT_ID_LENGTH
        )));
    }
    for (name, link) in &record.links {
        let spec = schema
            .field(record.kind, name)
            .ok_or_else(|| LoshError::UnknownField {
                kind: record.kind,
                field: name.clone(),
            })?;
        let shape_ok = matches!(
            (spec.cardinality, link),
            (Cardinality::One, RecordLink::One(_)) | (Cardinality::Many, RecordLink::Many(_))
        );
        if !shape_ok {
            return Err(LoshError::CardinalityMismatch {
                kind: record.kind,
                field: name.clone(),
            });
        }
        for target in link.targets() {
            match lookup(*target)? {
                Some(kind) if spec.accepts(kind) => {}
                Some(kind) => {
                    return Err(LoshError::TargetKindMismatch {
                        kind: record.kind,
                        field: name.clone(),
                        target: kind,
                    });
                }
                None => {
                    return Err(LoshError::Integrity(format!(
                        "{}.{name} references missing record {target}",
                        record.describe()
                    )));
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// LOADING
// =============================================================================

/// Load the stored records reachable from `root` into a fresh graph.
pub fn load_graph<S: RecordSource + ?Sized>(
    source: &S,
    schema: Arc<Schema>,
    root: Uid,
) -> Result<(Graph, NodeRef), LoshError> {
    let mut graph = Graph::new(schema);
    let mut nodes: BTreeMap<Uid, NodeRef> = BTreeMap::new();
    let mut records: Vec<(NodeRef, Record)> = Vec::new();
    let mut queue = VecDeque::from([root]);

    while let Some(uid) = queue.pop_front() {
        if nodes.contains_key(&uid) {
            continue;
        }
        let record = source
            .get(uid)?
            .ok_or_else(|| LoshError::NotFound(uid.to_string()))?;
        let r = graph.insert_with_id(record.kind, uid);
        let node = graph.node_mut(r);
        node.set_alt_id(record.alt_id.clone());
        node.attrs_mut().clone_from(&record.attrs);
        nodes.insert(uid, r);
        for link in record.links.values() {
            queue.extend(link.targets().iter().filter(|t| !nodes.contains_key(t)));
        }
        records.push((r, record));
    }

    for (r, record) in &records {
        for (name, link) in &record.links {
            for target in link.targets() {
                let to = nodes
                    .get(target)
                    .copied()
                    .ok_or_else(|| LoshError::NotFound(target.to_string()))?;
                graph.link(*r, name, to)?;
            }
        }
    }

    tracing::debug!(root = %root, nodes = graph.len(), "loaded graph from store");
    let root_ref = nodes
        .get(&root)
        .copied()
        .ok_or_else(|| LoshError::NotFound(root.to_string()))?;
    Ok((graph, root_ref))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_node_omits_unresolved_references() {
        let mut g = Graph::new(Arc::new(Schema::catalog()));
        let user = g.insert_with_alt(Kind::User, "alice");
        let host = g.insert_with_id(Kind::Host, Uid(1));
        let g1 = g.insert_with_id(Kind::Group, Uid(2));
        let g2 = g.insert_with_alt(Kind::Group, "makers");
        let avatar = g.insert_with_alt(Kind::File, "avatar.png");
        g.set_attr(user, "email", "a@example.org");
        g.link(user, "host", host).expect("link");
        g.link(user, "memberOf", g1).expect("link");
        g.link(user, "memberOf", g2).expect("link");
        g.link(user, "avatar", avatar).expect("link");

        let record = Record::from_node(&g, user);
        assert_eq!(record.kind, Kind::User);
        assert_eq!(record.alt_id.as_deref(), Some("alice"));
        assert_eq!(record.links.get("host"), Some(&RecordLink::One(Uid(1))));
        assert_eq!(
            record.links.get("memberOf"),
            Some(&RecordLink::Many(vec![Uid(2)]))
        );
        assert!(!record.links.contains_key("avatar"));
        assert_eq!(record.attrs.len(), 1);
    }

    #[test]
    fn merge_patches_present_fields() {
        let mut stored = Record::new(Kind::Tag);
        stored.alt_id = Some("cnc".into());
        stored.attrs.insert("label".into(), Value::from("CNC"));
        stored.links.insert("aliases".into(), RecordLink::Many(vec![Uid(4)]));

        let mut patch = Record::new(Kind::Tag);
        patch.attrs.insert("color".into(), Value::from("red"));
        patch.links.insert("related".into(), RecordLink::Many(vec![Uid(5)]));
        stored.merge(&patch);

        assert_eq!(stored.alt_id.as_deref(), Some("cnc"));
        assert_eq!(stored.attrs.len(), 2);
        assert_eq!(stored.links.len(), 2);
    }

    #[test]
    fn check_links_rejects_bad_references() {
        let schema = Schema::catalog();
        let mut record = Record::new(Kind::Repository);
        record.links.insert("host".into(), RecordLink::One(Uid(1)));

        check_links(&schema, &record, |_| Ok(Some(Kind::Host))).expect("valid");
        assert!(matches!(
            check_links(&schema, &record, |_| Ok(None)),
            Err(LoshError::Integrity(_))
        ));
        assert!(matches!(
            check_links(&schema, &record, |_| Ok(Some(Kind::User))),
            Err(LoshError::TargetKindMismatch { .. })
        ));

        record.links.insert("host".into(), RecordLink::Many(vec![Uid(1)]));
        assert!(matches!(
            check_links(&schema, &record, |_| Ok(Some(Kind::Host))),
            Err(LoshError::CardinalityMismatch { .. })
        ));
    }
}
