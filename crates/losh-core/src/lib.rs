//! # losh-core
//!
//! The entity-graph engine of the open-hardware catalog.
//!
//! Catalog records (products, components, repositories, files, people,
//! licenses, ...) reference each other in cycles. This crate moves such
//! graphs between three forms:
//! - an in-memory arena [`Graph`] addressed by [`NodeRef`] handles
//! - a cycle-free [`TreeNode`] that serializes to JSON
//! - a backing [`NodeStore`] that refuses a record until its mandatory
//!   references exist
//!
//! ## Architectural Constraints
//!
//! - Pure Rust: no async, no network dependencies
//! - Deterministic: `BTreeMap` only, insertion-ordered sets
//! - Schema-driven: what a kind references is data ([`Schema`]), not
//!   runtime type inspection

// =============================================================================
// MODULES
// =============================================================================

pub mod graph;
pub mod node_set;
pub mod primitives;
pub mod save;
pub mod schema;
pub mod storage;
pub mod traverse;
pub mod tree;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{Identity, IdentityKey, Kind, LoshError, Uid, Value};

// =============================================================================
// RE-EXPORTS: Graph Engine
// =============================================================================

pub use graph::{Graph, Node, NodeRef, Slot};
pub use node_set::NodeSet;
pub use schema::{Cardinality, FieldSpec, KindSchema, Schema, SchemaBuilder};
pub use traverse::{breadth_first, depth_first};
pub use tree::{
    TreeLink, TreeNode, dump_json, load_json, materialize_tree, parse_trees, reconstruct_forest,
    reconstruct_graph,
};

// =============================================================================
// RE-EXPORTS: Persistence
// =============================================================================

pub use save::{CancelToken, SaveReport, SaveStage, Saver, order_for_save, reorder_mandatory};
pub use storage::{
    MemoryStore, NodeStore, Record, RecordLink, RecordSource, RedbStore, WriteOp, load_graph,
};
