//! # Saver
//!
//! Persists the graph reachable from a root into a [`NodeStore`] that only
//! accepts an entity once its mandatory references exist.
//!
//! ## Pipeline
//!
//! 1. **Collect**: depth-first traversal of everything reachable.
//! 2. **Resolve identity**: nodes with only an alternate key get their store
//!    identifier from the store, if it already holds them.
//! 3. **Reorder**: every mandatory dependency is moved ahead of its
//!    dependents, transitively.
//! 4. **First pass**: walk the order. A node whose references are all
//!    resolved is created or updated. A new node with unresolved optional
//!    references is created without them and deferred.
//! 5. **Second pass**: deferred nodes are patched with their now-resolved
//!    references.
//!
//! Immutable kinds are never written. Nodes that already have an identifier
//! and carry nothing else are references to existing records and are not
//! written either.

use crate::graph::{Graph, NodeRef};
use crate::node_set::NodeSet;
use crate::storage::{NodeStore, Record};
use crate::traverse::depth_first;
use crate::types::{Identity, LoshError};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

// =============================================================================
// CANCELLATION
// =============================================================================

/// Cooperative cancellation shared between a caller and a running save.
///
/// Clones share the same flag. A deadline, if set, cancels once passed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Err(Cancelled)` once cancelled.
    pub fn check(&self) -> Result<(), LoshError> {
        if self.is_cancelled() {
            Err(LoshError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// =============================================================================
// STAGES & REPORT
// =============================================================================

/// Pipeline stage, named in logs and carried by [`LoshError::Write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStage {
    Collecting,
    ResolvingIdentity,
    Reordering,
    FirstPass,
    SecondPass,
}

impl fmt::Display for SaveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SaveStage::Collecting => "collecting",
            SaveStage::ResolvingIdentity => "resolving-identity",
            SaveStage::Reordering => "reordering",
            SaveStage::FirstPass => "first-pass",
            SaveStage::SecondPass => "second-pass",
        })
    }
}

/// What a save did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    /// Records created.
    pub created: usize,
    /// Record updates, second-pass patches included.
    pub updated: usize,
    /// Nodes not written: immutable kinds and identity-only references.
    pub skipped: usize,
    /// Nodes patched in the second pass.
    pub deferred: usize,
}

impl SaveReport {
    fn absorb(&mut self, other: SaveReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.deferred += other.deferred;
    }

    /// Total store writes.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.created + self.updated
    }
}

// =============================================================================
// ORDERING
// =============================================================================

/// The order in which the graph reachable from `root` would be written.
pub fn order_for_save(graph: &Graph, root: NodeRef) -> Result<NodeSet, LoshError> {
    let mut order = depth_first(graph, root);
    reorder_mandatory(graph, &mut order)?;
    Ok(order)
}

/// Move every mandatory dependency ahead of its dependents, transitively.
///
/// Every mandatory target of a member must itself be a member. Fails with
/// [`LoshError::MandatoryCycle`] when no valid order exists.
pub fn reorder_mandatory(graph: &Graph, set: &mut NodeSet) -> Result<(), LoshError> {
    let snapshot: Vec<NodeRef> = set.iter_rev().collect();
    let mut placer = Placer {
        graph,
        set,
        settled: BTreeSet::new(),
        placing: BTreeSet::new(),
    };
    for node in snapshot {
        placer.place(node)?;
    }
    Ok(())
}

struct Placer<'a> {
    graph: &'a Graph,
    set: &'a mut NodeSet,
    /// Nodes whose dependencies are known to precede them.
    settled: BTreeSet<NodeRef>,
    /// Nodes on the current placement path.
    placing: BTreeSet<NodeRef>,
}

impl Placer<'_> {
    fn place(&mut self, node: NodeRef) -> Result<(), LoshError> {
        if self.settled.contains(&node) {
            return Ok(());
        }
        if !self.placing.insert(node) {
            return Err(self.cycle(node));
        }
        let deps: Vec<NodeRef> = self.graph.mandatory_references(node).collect();
        for dep in deps {
            if dep == node {
                return Err(self.cycle(node));
            }
            if self.set.move_before(dep, node) {
                // It moved ahead of its own dependencies, maybe.
                self.settled.remove(&dep);
            }
            self.place(dep)?;
        }
        self.placing.remove(&node);
        self.settled.insert(node);
        Ok(())
    }

    fn cycle(&self, node: NodeRef) -> LoshError {
        LoshError::MandatoryCycle {
            entity: self.graph.node(node).describe(),
        }
    }
}

// =============================================================================
// SAVER
// =============================================================================

/// Writes graphs into a store in dependency order.
pub struct Saver<'s, S: NodeStore + ?Sized> {
    store: &'s mut S,
    cancel: CancelToken,
}

impl<'s, S: NodeStore + ?Sized> Saver<'s, S> {
    pub fn new(store: &'s mut S) -> Self {
        Self {
            store,
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Persist everything reachable from `root`.
    ///
    /// On success every written node carries its store identifier. On failure
    /// nodes written before the failure keep theirs, so the call can be
    /// retried without duplicating records.
    pub fn save(&mut self, graph: &mut Graph, root: NodeRef) -> Result<SaveReport, LoshError> {
        let root_name = graph.node(root).describe();
        let span = tracing::debug_span!("save", root = %root_name);
        let _enter = span.enter();

        let result = self.run(graph, root);
        match &result {
            Ok(report) => tracing::info!(
                created = report.created,
                updated = report.updated,
                skipped = report.skipped,
                deferred = report.deferred,
                "saved {root_name}"
            ),
            Err(e) => tracing::warn!(error = %e, retryable = e.is_retryable(), "save of {root_name} failed"),
        }
        result
    }

    /// Persist several roots sharing one graph, in order.
    pub fn save_all(&mut self, graph: &mut Graph, roots: &[NodeRef]) -> Result<SaveReport, LoshError> {
        let mut total = SaveReport::default();
        for root in roots {
            total.absorb(self.save(graph, *root)?);
        }
        Ok(total)
    }

    fn run(&mut self, graph: &mut Graph, root: NodeRef) -> Result<SaveReport, LoshError> {
        self.cancel.check()?;
        let mut report = SaveReport::default();

        let mut order = depth_first(graph, root);
        tracing::debug!(stage = %SaveStage::Collecting, nodes = order.len());

        self.resolve_identities(graph, &order)?;
        tracing::debug!(stage = %SaveStage::ResolvingIdentity);

        reorder_mandatory(graph, &mut order)?;
        tracing::debug!(stage = %SaveStage::Reordering);

        let deferred = self.first_pass(graph, &order, &mut report)?;
        tracing::debug!(
            stage = %SaveStage::FirstPass,
            created = report.created,
            deferred = deferred.len()
        );

        for node in &deferred {
            if !graph.all_references_resolved(node) {
                tracing::debug!(entity = %graph.node(node).describe(), "references still unresolved");
            }
            self.write(graph, node, SaveStage::SecondPass, &mut report)?;
        }
        report.deferred = deferred.len();
        tracing::debug!(stage = %SaveStage::SecondPass, patched = deferred.len());
        Ok(report)
    }

    fn resolve_identities(&mut self, graph: &mut Graph, order: &NodeSet) -> Result<(), LoshError> {
        for node in order {
            let n = graph.node(node);
            if n.id().is_some() {
                continue;
            }
            let Some(alt) = n.alt_id() else {
                continue;
            };
            self.cancel.check()?;
            let found = self
                .store
                .find_id_by_alt_key(n.kind(), alt)
                .map_err(|e| LoshError::Lookup {
                    entity: n.describe(),
                    source: Box::new(e),
                })?;
            if let Some(uid) = found {
                tracing::trace!(entity = %n.describe(), uid = %uid, "identity resolved");
                graph.node_mut(node).set_id(Some(uid));
            }
        }
        Ok(())
    }

    fn first_pass(
        &mut self,
        graph: &mut Graph,
        order: &NodeSet,
        report: &mut SaveReport,
    ) -> Result<NodeSet, LoshError> {
        let mut deferred = NodeSet::new();
        for node in order {
            let n = graph.node(node);
            if graph.schema().kind(n.kind()).immutable || (n.id().is_some() && n.is_stub()) {
                report.skipped += 1;
                continue;
            }
            if graph.all_references_resolved(node) {
                self.write(graph, node, SaveStage::FirstPass, report)?;
            } else {
                let is_new = n.id().is_none();
                deferred.push_back(node);
                if is_new {
                    self.write(graph, node, SaveStage::FirstPass, report)?;
                }
            }
        }
        Ok(deferred)
    }

    /// Create or update one node with whatever references are resolved.
    fn write(
        &mut self,
        graph: &mut Graph,
        node: NodeRef,
        stage: SaveStage,
        report: &mut SaveReport,
    ) -> Result<(), LoshError> {
        for (spec, target) in graph.references(node) {
            if spec.mandatory && graph.node(target).id().is_none() {
                return Err(LoshError::MissingDependency {
                    entity: graph.node(node).describe(),
                    field: spec.name,
                });
            }
        }
        self.cancel.check()?;

        let record = Record::from_node(graph, node);
        let wrap = |e: LoshError| LoshError::Write {
            entity: record.describe(),
            stage,
            source: Box::new(e),
        };
        match record.id {
            Some(_) => {
                self.store.update(&record).map_err(wrap)?;
                report.updated += 1;
            }
            None => {
                let uid = self.store.create(&record).map_err(wrap)?;
                graph.node_mut(node).set_id(Some(uid));
                report.created += 1;
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{KindSchema, Schema};
    use crate::storage::MemoryStore;
    use crate::types::{Kind, Uid};

    fn catalog() -> Arc<Schema> {
        Arc::new(Schema::catalog())
    }

    fn assert_dependencies_first(graph: &Graph, order: &NodeSet) {
        for node in order {
            let at = order.position(node).expect("member");
            for dep in graph.mandatory_references(node) {
                let dep_at = order.position(dep).expect("member");
                assert!(dep_at < at, "{} must precede {}", graph.node(dep).describe(), graph.node(node).describe());
            }
        }
    }

    #[test]
    fn reorder_handles_transitive_chains() {
        // Depth-first order puts the product before its release component
        // (reached through the back-reference) and the component before
        // its repository's host.
        let mut g = Graph::new(catalog());
        let component = g.insert_with_alt(Kind::Component, "c");
        let product = g.insert_with_alt(Kind::Product, "p");
        let repo = g.insert_with_alt(Kind::Repository, "r");
        let host = g.insert_with_alt(Kind::Host, "h");
        let user = g.insert_with_alt(Kind::User, "u");
        let license = g.insert_with_alt(Kind::License, "l");
        g.link(component, "product", product).expect("link");
        g.link(component, "dataSource", repo).expect("link");
        g.link(component, "repository", repo).expect("link");
        g.link(component, "licensor", user).expect("link");
        g.link(repo, "host", host).expect("link");
        g.link(user, "host", host).expect("link");
        for (field, target) in [
            ("dataSource", repo),
            ("license", license),
            ("licensor", user),
            ("release", component),
            ("releases", component),
        ] {
            g.link(product, field, target).expect("link");
        }

        let order = order_for_save(&g, component).expect("order");
        assert_eq!(order.len(), 6);
        assert_dependencies_first(&g, &order);
    }

    #[test]
    fn mandatory_instance_cycle_fails() {
        let schema = Schema::builder()
            .kind(Kind::Tag, KindSchema::new().alt_key("name").one("alias", &[Kind::Tag]).mandatory())
            .finish();
        let mut g = Graph::new(Arc::new(schema));
        let a = g.insert_with_alt(Kind::Tag, "a");
        let b = g.insert_with_alt(Kind::Tag, "b");
        g.link(a, "alias", b).expect("link");
        g.link(b, "alias", a).expect("link");
        assert!(matches!(order_for_save(&g, a), Err(LoshError::MandatoryCycle { .. })));

        let mut g2 = Graph::new(Arc::clone(g.schema()));
        let s = g2.insert_with_alt(Kind::Tag, "self");
        g2.link(s, "alias", s).expect("link");
        assert!(matches!(order_for_save(&g2, s), Err(LoshError::MandatoryCycle { .. })));
    }

    #[test]
    fn cancelled_token_stops_before_any_write() {
        let schema = catalog();
        let mut store = MemoryStore::new(Arc::clone(&schema));
        let mut g = Graph::new(schema);
        let host = g.insert_with_alt(Kind::Host, "h");
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = Saver::new(&mut store).with_cancel(cancel).save(&mut g, host);
        assert!(matches!(result, Err(LoshError::Cancelled)));
        assert!(store.writes().is_empty());
    }

    /// Cancels its token once the first record has been created.
    struct CancelAfterFirstCreate {
        inner: MemoryStore,
        token: CancelToken,
    }

    impl NodeStore for CancelAfterFirstCreate {
        fn find_id_by_alt_key(&self, kind: Kind, alt_id: &str) -> Result<Option<Uid>, LoshError> {
            self.inner.find_id_by_alt_key(kind, alt_id)
        }

        fn create(&mut self, record: &Record) -> Result<Uid, LoshError> {
            let uid = self.inner.create(record)?;
            self.token.cancel();
            Ok(uid)
        }

        fn update(&mut self, record: &Record) -> Result<(), LoshError> {
            self.inner.update(record)
        }
    }

    #[test]
    fn cancellation_between_writes_stops_the_save() {
        let schema = catalog();
        let token = CancelToken::new();
        let mut store = CancelAfterFirstCreate {
            inner: MemoryStore::new(Arc::clone(&schema)),
            token: token.clone(),
        };
        let mut g = Graph::new(schema);
        let repo = g.insert_with_alt(Kind::Repository, "r");
        let host = g.insert_with_alt(Kind::Host, "h");
        let owner = g.insert_with_alt(Kind::User, "u");
        g.link(repo, "host", host).expect("link");
        g.link(repo, "owner", owner).expect("link");
        g.link(owner, "host", host).expect("link");

        let result = Saver::new(&mut store).with_cancel(token).save(&mut g, repo);
        assert!(matches!(result, Err(LoshError::Cancelled)));
        assert_eq!(store.inner.writes().len(), 1);
        assert_eq!(store.inner.writes()[0].uid(), g.node(host).id().expect("host written"));
        assert!(g.node(owner).id().is_none());
        assert!(g.node(repo).id().is_none());
    }

    #[test]
    fn expired_deadline_cancels() {
        let token = CancelToken::new().with_deadline(Instant::now());
        assert!(token.is_cancelled());
        let token = CancelToken::new().with_timeout(Duration::from_secs(3600));
        assert!(token.check().is_ok());
        let shared = token.clone();
        token.cancel();
        assert!(shared.is_cancelled());
    }

    #[test]
    fn missing_mandatory_identity_is_reported() {
        // License is immutable: an unseeded license can never get an id.
        let schema = catalog();
        let mut store = MemoryStore::new(Arc::clone(&schema));
        let mut g = Graph::new(schema);
        let product = g.insert_with_alt(Kind::Product, "p");
        let license = g.insert_with_alt(Kind::License, "unknown-license");
        g.link(product, "license", license).expect("link");
        let err = Saver::new(&mut store).save(&mut g, product).expect_err("fails");
        assert!(matches!(err, LoshError::MissingDependency { field: "license", .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn save_is_idempotent_for_resolved_graphs() {
        let schema = catalog();
        let mut store = MemoryStore::new(Arc::clone(&schema));
        let mut g = Graph::new(schema);
        let repo = g.insert_with_alt(Kind::Repository, "r");
        let host = g.insert_with_alt(Kind::Host, "h");
        g.link(repo, "host", host).expect("link");

        let first = Saver::new(&mut store).save(&mut g, repo).expect("save");
        assert_eq!(first.created, 2);
        let second = Saver::new(&mut store).save(&mut g, repo).expect("save again");
        assert_eq!(second.created, 0);
        assert_eq!(store.len(), 2);
        assert_eq!(g.node(host).id(), Some(Uid(1)));
    }
}
