//! # Entity Graph
//!
//! An arena of catalog entities linked by schema-described reference fields.
//!
//! Nodes live in a `Vec` and refer to each other through [`NodeRef`] handles,
//! so cycles and shared sub-entities need no reference counting. Each node
//! carries one [`Slot`] per reference field of its kind, in schema order.
//!
//! Attributes use `BTreeMap` for deterministic ordering.

use crate::schema::{Cardinality, FieldSpec, Schema};
use crate::types::{Identity, IdentityKey, Kind, LoshError, Uid, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// HANDLES & SLOTS
// =============================================================================

/// Handle to a node inside a [`Graph`]. Only meaningful for the graph that
/// issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeRef(pub usize);

/// The value of one reference field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    One(Option<NodeRef>),
    Many(Vec<NodeRef>),
}

impl Slot {
    fn empty(cardinality: Cardinality) -> Self {
        match cardinality {
            Cardinality::One => Slot::One(None),
            Cardinality::Many => Slot::Many(Vec::new()),
        }
    }

    /// The referenced nodes, in order.
    #[must_use]
    pub fn targets(&self) -> &[NodeRef] {
        match self {
            Slot::One(target) => target.as_slice(),
            Slot::Many(targets) => targets,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets().is_empty()
    }
}

// =============================================================================
// NODE
// =============================================================================

/// One catalog entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    kind: Kind,
    id: Option<Uid>,
    alt_id: Option<String>,
    attrs: BTreeMap<String, Value>,
    slots: Vec<Slot>,
}

impl Node {
    fn new(kind: Kind, schema: &Schema) -> Self {
        Self {
            kind,
            id: None,
            alt_id: None,
            attrs: BTreeMap::new(),
            slots: schema
                .kind(kind)
                .fields
                .iter()
                .map(|f| Slot::empty(f.cardinality))
                .collect(),
        }
    }

    pub fn set_id(&mut self, id: Option<Uid>) {
        self.id = id;
    }

    pub fn set_alt_id(&mut self, alt_id: Option<String>) {
        self.alt_id = alt_id;
    }

    #[must_use]
    pub fn attrs(&self) -> &BTreeMap<String, Value> {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.attrs
    }

    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    /// Reference slots in schema field order.
    #[must_use]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// A node that carries nothing but identity: no attributes, no
    /// references. Stubs stand for entities that already exist elsewhere.
    #[must_use]
    pub fn is_stub(&self) -> bool {
        self.attrs.is_empty() && self.slots.iter().all(Slot::is_empty)
    }
}

impl Identity for Node {
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
// GRAPH
// =============================================================================

/// An arena of nodes sharing one schema.
#[derive(Debug, Clone)]
pub struct Graph {
    schema: Arc<Schema>,
    nodes: Vec<Node>,
}

impl Graph {
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            nodes: Vec::new(),
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Handles of every node, in insertion order.
    pub fn refs(&self) -> impl Iterator<Item = NodeRef> + use<> {
        (0..self.nodes.len()).map(NodeRef)
    }

    /// Insert a node with no identity.
    pub fn insert(&mut self, kind: Kind) -> NodeRef {
        let node = Node::new(kind, &self.schema);
        self.nodes.push(node);
        NodeRef(self.nodes.len() - 1)
    }

    /// Insert a node carrying an alternate key.
    pub fn insert_with_alt(&mut self, kind: Kind, alt_id: impl Into<String>) -> NodeRef {
        let r = self.insert(kind);
        self.nodes[r.0].alt_id = Some(alt_id.into());
        r
    }

    /// Insert a node that already has a store identifier.
    pub fn insert_with_id(&mut self, kind: Kind, id: Uid) -> NodeRef {
        let r = self.insert(kind);
        self.nodes[r.0].id = Some(id);
        r
    }

    /// Borrow a node.
    ///
    /// Panics if the handle was issued by another graph.
    #[must_use]
    pub fn node(&self, r: NodeRef) -> &Node {
        &self.nodes[r.0]
    }

    pub fn node_mut(&mut self, r: NodeRef) -> &mut Node {
        &mut self.nodes[r.0]
    }

    #[must_use]
    pub fn get(&self, r: NodeRef) -> Option<&Node> {
        self.nodes.get(r.0)
    }

    pub fn set_attr(&mut self, r: NodeRef, name: impl Into<String>, value: impl Into<Value>) {
        self.nodes[r.0].attrs.insert(name.into(), value.into());
    }

    // =========================================================================
    // REFERENCES
    // =========================================================================

    fn resolve_field(&self, from: NodeRef, field: &str) -> Result<(usize, &FieldSpec), LoshError> {
        let kind = self.node(from).kind;
        let ks = self.schema.kind(kind);
        ks.field_index(field)
            .map(|i| (i, &ks.fields[i]))
            .ok_or_else(|| LoshError::UnknownField {
                kind,
                field: field.to_string(),
            })
    }

    /// Point a reference field at `to`.
    ///
    /// Single-valued fields are overwritten. List fields get `to` appended.
    pub fn link(&mut self, from: NodeRef, field: &str, to: NodeRef) -> Result<(), LoshError> {
        let (index, spec) = self.resolve_field(from, field)?;
        let target = self.node(to).kind;
        if !spec.accepts(target) {
            return Err(LoshError::TargetKindMismatch {
                kind: self.node(from).kind,
                field: field.to_string(),
                target,
            });
        }
        match &mut self.nodes[from.0].slots[index] {
            Slot::One(slot) => *slot = Some(to),
            Slot::Many(list) => list.push(to),
        }
        Ok(())
    }

    /// Clear a reference field.
    pub fn unlink(&mut self, from: NodeRef, field: &str) -> Result<(), LoshError> {
        let (index, spec) = self.resolve_field(from, field)?;
        let cardinality = spec.cardinality;
        self.nodes[from.0].slots[index] = Slot::empty(cardinality);
        Ok(())
    }

    /// Targets of a named reference field.
    pub fn linked(&self, from: NodeRef, field: &str) -> Result<&[NodeRef], LoshError> {
        let (index, _) = self.resolve_field(from, field)?;
        Ok(self.nodes[from.0].slots[index].targets())
    }

    /// Fill an empty slot. Returns false if the slot already held a value.
    pub(crate) fn fill_slot(&mut self, from: NodeRef, index: usize, slot: Slot) -> bool {
        let current = &mut self.nodes[from.0].slots[index];
        if current.is_empty() {
            *current = slot;
            true
        } else {
            false
        }
    }

    /// Every outgoing reference of a node with its field, in schema order.
    pub fn references(&self, r: NodeRef) -> impl Iterator<Item = (&FieldSpec, NodeRef)> + '_ {
        let node = self.node(r);
        self.schema
            .kind(node.kind)
            .fields
            .iter()
            .zip(node.slots.iter())
            .flat_map(|(spec, slot)| slot.targets().iter().map(move |t| (spec, *t)))
    }

    /// Targets of the node's mandatory fields, in schema order.
    pub fn mandatory_references(&self, r: NodeRef) -> impl Iterator<Item = NodeRef> + '_ {
        self.references(r)
            .filter(|(spec, _)| spec.mandatory)
            .map(|(_, t)| t)
    }

    /// Whether every referenced node has a store identifier.
    #[must_use]
    pub fn all_references_resolved(&self, r: NodeRef) -> bool {
        self.references(r).all(|(_, t)| self.node(t).id.is_some())
    }

    /// Find a node by identity key. Linear scan.
    #[must_use]
    pub fn find_by_identity(&self, key: &IdentityKey) -> Option<NodeRef> {
        self.nodes
            .iter()
            .position(|n| match key {
                IdentityKey::Uid(uid) => n.id == Some(*uid),
                IdentityKey::Alt(kind, alt) => n.kind == *kind && n.alt_id.as_deref() == Some(alt),
            })
            .map(NodeRef)
    }
}

// =============================================================================
// TESTS
// =============================================================================
