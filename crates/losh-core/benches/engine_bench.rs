//! # Engine Benchmarks
//!
//! Performance benchmarks for traversal, tree conversion and saving.
//!
//! Run with: `cargo bench -p losh-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use losh_core::{
    Graph, Kind, MemoryStore, NodeRef, Saver, Schema, depth_first, materialize_tree,
    order_for_save, reconstruct_graph,
};
use std::hint::black_box;
use std::sync::Arc;

/// A category chain with child and parent links in both directions.
fn create_category_chain(size: usize) -> (Graph, NodeRef) {
    let mut graph = Graph::new(Arc::new(Schema::catalog()));
    let root = graph.insert_with_alt(Kind::Category, "cat-0");
    let mut prev = root;
    for i in 1..size {
        let node = graph.insert_with_alt(Kind::Category, format!("cat-{i}"));
        graph.set_attr(node, "rank", i as i64);
        graph.link(prev, "children", node).expect("link");
        graph.link(node, "parent", prev).expect("link");
        prev = node;
    }
    (graph, root)
}

/// One repository shared by `size` files, all new.
fn create_repository_fanout(size: usize) -> (Graph, NodeRef) {
    let mut graph = Graph::new(Arc::new(Schema::catalog()));
    let host = graph.insert_with_alt(Kind::Host, "github.com");
    let repo = graph.insert_with_alt(Kind::Repository, "github.com/o/r");
    graph.link(repo, "host", host).expect("link");
    let component = graph.insert_with_alt(Kind::Component, "github.com/o/r/c");
    let owner = graph.insert_with_alt(Kind::User, "o");
    graph.link(owner, "host", host).expect("link");
    graph.link(component, "dataSource", repo).expect("link");
    graph.link(component, "repository", repo).expect("link");
    graph.link(component, "licensor", owner).expect("link");
    for i in 0..size {
        let file = graph.insert_with_alt(Kind::File, format!("github.com/o/r/f{i}"));
        graph.link(file, "dataSource", repo).expect("link");
        graph.link(component, "auxiliary", file).expect("link");
    }
    (graph, component)
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_depth_first(c: &mut Criterion) {
    let mut group = c.benchmark_group("depth_first");

    for size in [100, 1000, 10000].iter() {
        let (graph, root) = create_category_chain(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(depth_first(&graph, root)));
        });
    }

    group.finish();
}

fn bench_tree_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_round_trip");

    for size in [100, 1000].iter() {
        let (graph, root) = create_category_chain(*size);
        let schema = Arc::clone(graph.schema());
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let tree = materialize_tree(&graph, root);
                black_box(reconstruct_graph(Arc::clone(&schema), &tree).expect("rebuild"))
            });
        });
    }

    group.finish();
}

fn bench_order_for_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("order_for_save");

    for size in [100, 1000].iter() {
        let (graph, root) = create_repository_fanout(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(order_for_save(&graph, root).expect("order")));
        });
    }

    group.finish();
}

fn bench_save_memory_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("save_memory_store");

    for size in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let (mut graph, root) = create_repository_fanout(size);
                let mut store = MemoryStore::new(Arc::clone(graph.schema()));
                black_box(Saver::new(&mut store).save(&mut graph, root).expect("save"))
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_depth_first,
    bench_tree_round_trip,
    bench_order_for_save,
    bench_save_memory_store
);
criterion_main!(benches);
