//! # Tree Conversion
//!
//! Converts between the cyclic [`Graph`] and a cycle-free [`TreeNode`]
//! suitable for JSON.
//!
//! Materializing walks the graph breadth-first. The first occurrence of each
//! entity is expanded in full; every later occurrence is written as an
//! identity-only stub. Reconstructing goes the other way and merges every
//! occurrence that shares an identity key back into one node.

use crate::graph::{Graph, NodeRef, Slot};
use crate::node_set::NodeSet;
use crate::primitives::MAX_TREE_DEPTH;
use crate::schema::{Cardinality, Schema};
use crate::types::{Identity, IdentityKey, Kind, LoshError, Uid, Value};
use serde::de::value::{MapAccessDeserializer, SeqAccessDeserializer};
use serde::de::{DeserializeOwned, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// TREE TYPES
// =============================================================================

/// A cycle-free copy of an entity and everything it references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub kind: Kind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, TreeLink>,
}

/// The value of a reference field in a tree: a nested object or a list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TreeLink {
    One(Box<TreeNode>),
    Many(Vec<TreeNode>),
}

// Dispatches on the JSON shape directly instead of buffering the subtree
// the way `untagged` does, so nesting stays on the stacker-managed stack.
impl<'de> Deserialize<'de> for TreeLink {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer
            .deserialize_any(ShapeVisitor("a tree node object or a list of tree nodes"))
            .map(|shape| match shape {
                Shape::One(node) => TreeLink::One(node),
                Shape::Many(nodes) => TreeLink::Many(nodes),
            })
    }
}

enum Shape {
    One(Box<TreeNode>),
    Many(Vec<TreeNode>),
}

struct ShapeVisitor(&'static str);

impl<'de> Visitor<'de> for ShapeVisitor {
    type Value = Shape;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Shape, A::Error> {
        TreeNode::deserialize(MapAccessDeserializer::new(map)).map(|n| Shape::One(Box::new(n)))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<Shape, A::Error> {
        Vec::<TreeNode>::deserialize(SeqAccessDeserializer::new(seq)).map(Shape::Many)
    }
}

impl TreeNode {
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

    #[must_use]
    pub fn with_id(mut self, id: Uid) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn with_alt(mut self, alt_id: impl Into<String>) -> Self {
        self.alt_id = Some(alt_id.into());
        self
    }

    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_one(mut self, field: impl Into<String>, child: TreeNode) -> Self {
        self.links.insert(field.into(), TreeLink::One(Box::new(child)));
        self
    }

    #[must_use]
    pub fn with_many(mut self, field: impl Into<String>, children: Vec<TreeNode>) -> Self {
        self.links.insert(field.into(), TreeLink::Many(children));
        self
    }

    /// Identity only: no attributes and no links.
    #[must_use]
    pub fn is_stub(&self) -> bool {
        self.attrs.is_empty() && self.links.is_empty()
    }

    /// Number of tree nodes, this one included.
    #[must_use]
    pub fn count(&self) -> usize {
        let mut total = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            total += 1;
            for link in node.links.values() {
                match link {
                    TreeLink::One(child) => stack.push(child),
                    TreeLink::Many(children) => stack.extend(children.iter()),
                }
            }
        }
        total
    }
}

impl Identity for TreeNode {
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
// MATERIALIZE
// =============================================================================

enum CopyLink {
    One(usize),
    Many(Vec<usize>),
}

struct Pending {
    node: TreeNode,
    links: Vec<(&'static str, CopyLink)>,
}

/// Copy the graph reachable from `root` into a tree.
///
/// Each entity is expanded once, at its shallowest breadth-first position.
/// Later occurrences carry only kind, id and alternate key.
pub fn materialize_tree(graph: &Graph, root: NodeRef) -> TreeNode {
    // Children are always allocated after their parent, so assembling in
    // reverse allocation order sees every child before its parent.
    let mut copies = vec![shell(graph, root)];
    let mut queue: VecDeque<(NodeRef, usize)> = VecDeque::from([(root, 0)]);
    let mut traversed = NodeSet::new();

    while let Some((original, index)) = queue.pop_front() {
        if !traversed.push_back(original) {
            continue;
        }
        let node = graph.node(original);
        copies[index].node.attrs = node.attrs().clone();
        let fields = &graph.schema().kind(node.kind()).fields;
        for (spec, slot) in fields.iter().zip(node.slots()) {
            let link = match slot {
                Slot::One(Some(target)) => {
                    let child = copies.len();
                    copies.push(shell(graph, *target));
                    queue.push_back((*target, child));
                    CopyLink::One(child)
                }
                Slot::Many(targets) if !targets.is_empty() => {
                    let mut children = Vec::with_capacity(targets.len());
                    for target in targets {
                        let child = copies.len();
                        copies.push(shell(graph, *target));
                        queue.push_back((*target, child));
                        children.push(child);
                    }
                    CopyLink::Many(children)
                }
                _ => continue,
            };
            copies[index].links.push((spec.name, link));
        }
    }

    let mut built: Vec<Option<TreeNode>> = Vec::with_capacity(copies.len());
    built.resize_with(copies.len(), || None);
    for (index, copy) in copies.into_iter().enumerate().rev() {
        let mut node = copy.node;
        for (name, link) in copy.links {
            let link = match link {
                CopyLink::One(child) => built[child].take().map(|c| TreeLink::One(Box::new(c))),
                CopyLink::Many(children) => Some(TreeLink::Many(
                    children.into_iter().filter_map(|c| built[c].take()).collect(),
                )),
            };
            if let Some(link) = link {
                node.links.insert(name.to_string(), link);
            }
        }
        built[index] = Some(node);
    }
    built
        .into_iter()
        .next()
        .flatten()
        .unwrap_or_else(|| TreeNode::new(graph.node(root).kind()))
}

fn shell(graph: &Graph, r: NodeRef) -> Pending {
    let node = graph.node(r);
    Pending {
        node: TreeNode {
            kind: node.kind(),
            id: node.id(),
            alt_id: node.alt_id().map(str::to_string),
            attrs: BTreeMap::new(),
            links: BTreeMap::new(),
        },
        links: Vec::new(),
    }
}

// =============================================================================
// RECONSTRUCT
// =============================================================================

/// Rebuild a graph from a tree, merging nodes that share an identity key.
///
/// The first occurrence to set an attribute or a reference field wins.
/// Nodes without any identity are never merged.
pub fn reconstruct_graph(
    schema: Arc<Schema>,
    tree: &TreeNode,
) -> Result<(Graph, NodeRef), LoshError> {
    let mut rebuild = Reconstructor::new(schema);
    let root = rebuild.visit(tree, 0)?;
    Ok((rebuild.graph, root))
}

/// Rebuild one graph from several trees. Entities shared between trees
/// become one node.
pub fn reconstruct_forest(
    schema: Arc<Schema>,
    trees: &[TreeNode],
) -> Result<(Graph, Vec<NodeRef>), LoshError> {
    let mut rebuild = Reconstructor::new(schema);
    let roots = trees
        .iter()
        .map(|tree| rebuild.visit(tree, 0))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((rebuild.graph, roots))
}

struct Reconstructor {
    graph: Graph,
    processed: BTreeMap<IdentityKey, NodeRef>,
}

impl Reconstructor {
    fn new(schema: Arc<Schema>) -> Self {
        Self {
            graph: Graph::new(schema),
            processed: BTreeMap::new(),
        }
    }

    /// The node standing for `tree`'s identity, created if unseen.
    fn canonical(&mut self, tree: &TreeNode) -> Result<NodeRef, LoshError> {
        let keys = tree.identity_keys();
        let found = keys.iter().find_map(|k| self.processed.get(k).copied());
        let node = match found {
            Some(node) => {
                let existing = self.graph.node(node).kind();
                if existing != tree.kind {
                    return Err(LoshError::IdentityConflict {
                        key: keys
                            .first()
                            .map(ToString::to_string)
                            .unwrap_or_default(),
                        first: existing,
                        second: tree.kind,
                    });
                }
                let n = self.graph.node_mut(node);
                if n.id().is_none() {
                    n.set_id(tree.id);
                }
                if n.alt_id().is_none() {
                    n.set_alt_id(tree.alt_id.clone());
                }
                node
            }
            None => {
                let node = self.graph.insert(tree.kind);
                let n = self.graph.node_mut(node);
                n.set_id(tree.id);
                n.set_alt_id(tree.alt_id.clone());
                node
            }
        };
        for key in keys {
            self.processed.entry(key).or_insert(node);
        }
        Ok(node)
    }

    fn visit(&mut self, tree: &TreeNode, depth: usize) -> Result<NodeRef, LoshError> {
        if depth > MAX_TREE_DEPTH {
            return Err(LoshError::TooDeep(MAX_TREE_DEPTH));
        }
        let node = self.canonical(tree)?;
        let attrs = self.graph.node_mut(node).attrs_mut();
        for (name, value) in &tree.attrs {
            attrs.entry(name.clone()).or_insert_with(|| value.clone());
        }

        let schema = Arc::clone(self.graph.schema());
        let ks = schema.kind(tree.kind);
        for (name, link) in &tree.links {
            let index = ks.field_index(name).ok_or_else(|| LoshError::UnknownField {
                kind: tree.kind,
                field: name.clone(),
            })?;
            let spec = &ks.fields[index];
            let children: &[TreeNode] = match (spec.cardinality, link) {
                (Cardinality::One, TreeLink::One(child)) => std::slice::from_ref(child.as_ref()),
                (Cardinality::Many, TreeLink::Many(children)) => children,
                _ => {
                    return Err(LoshError::CardinalityMismatch {
                        kind: tree.kind,
                        field: name.clone(),
                    });
                }
            };
            let mut targets = Vec::with_capacity(children.len());
            for child in children {
                if !spec.accepts(child.kind) {
                    return Err(LoshError::TargetKindMismatch {
                        kind: tree.kind,
                        field: name.clone(),
                        target: child.kind,
                    });
                }
                targets.push(self.visit(child, depth + 1)?);
            }
            let slot = match spec.cardinality {
                Cardinality::One => Slot::One(targets.first().copied()),
                Cardinality::Many => Slot::Many(targets),
            };
            self.graph.fill_slot(node, index, slot);
        }
        Ok(node)
    }
}

// =============================================================================
// JSON
// =============================================================================

/// Materialize the graph reachable from `root` and serialize it to JSON.
pub fn dump_json(graph: &Graph, root: NodeRef, pretty: bool) -> Result<Vec<u8>, LoshError> {
    let tree = materialize_tree(graph, root);
    let mut out = Vec::new();
    let written = if pretty {
        let mut ser = serde_json::Serializer::pretty(&mut out);
        tree.serialize(serde_stacker::Serializer::new(&mut ser))
    } else {
        let mut ser = serde_json::Serializer::new(&mut out);
        tree.serialize(serde_stacker::Serializer::new(&mut ser))
    };
    written.map_err(|e| LoshError::SerializationError(e.to_string()))?;
    Ok(out)
}

/// Parse a JSON tree and rebuild its graph.
pub fn load_json(schema: Arc<Schema>, bytes: &[u8]) -> Result<(Graph, NodeRef), LoshError> {
    let tree: TreeNode = from_json(bytes)?;
    reconstruct_graph(schema, &tree)
}

/// Parse a JSON document holding one tree or a list of trees.
pub fn parse_trees(bytes: &[u8]) -> Result<Vec<TreeNode>, LoshError> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    de.disable_recursion_limit();
    let parsed = serde_stacker::Deserializer::new(&mut de)
        .deserialize_any(ShapeVisitor("a tree node object or a list of tree nodes"));
    let shape = parsed
        .and_then(|shape| de.end().map(|()| shape))
        .map_err(|e| LoshError::SerializationError(e.to_string()))?;
    Ok(match shape {
        Shape::One(tree) => vec![*tree],
        Shape::Many(trees) => trees,
    })
}

/// Nesting depth is bounded by [`MAX_TREE_DEPTH`] during reconstruction,
/// not by the parser.
fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LoshError> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    de.disable_recursion_limit();
    let parsed = T::deserialize(serde_stacker::Deserializer::new(&mut de));
    parsed
        .and_then(|value| de.end().map(|()| value))
        .map_err(|e| LoshError::SerializationError(e.to_string()))
}

// =============================================================================
// TESTS
// =============================================================================
