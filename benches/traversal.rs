//! Benchmarks for native traversal and batch-size probing.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use graph_analyst::batch::sizing::choose_batch_size;
use graph_analyst::batch::BatchOperation;
use graph_analyst::config::BatchSettings;
use graph_analyst::graph::{
    GraphNode, GraphRelationship, Record, TraversalLimits, TraversalQuery, KIND_KEY,
    RELATIONSHIP_KIND_KEY,
};

/// A ring of authors, each writing the paper next to it.
fn authorship_ring(size: usize) -> (Vec<GraphNode>, Vec<GraphRelationship>) {
    let mut nodes = Vec::with_capacity(size * 2);
    let mut relationships = Vec::with_capacity(size * 2);
    for i in 0..size {
        nodes.push(GraphNode::new(format!("author-{i}")).with_property(KIND_KEY, "PERSON"));
        nodes.push(GraphNode::new(format!("paper-{i}")).with_property(KIND_KEY, "PAPER"));
        relationships.push(
            GraphRelationship::new(format!("author-{i}"), format!("paper-{i}"))
                .with_property(RELATIONSHIP_KIND_KEY, "wrote"),
        );
        relationships.push(
            GraphRelationship::new(format!("author-{i}"), format!("paper-{}", (i + 1) % size))
                .with_property(RELATIONSHIP_KIND_KEY, "wrote"),
        );
    }
    (nodes, relationships)
}

fn bench_by_kind(c: &mut Criterion) {
    let (nodes, relationships) = authorship_ring(1_000);
    let limits = TraversalLimits::default();
    let query = TraversalQuery::parse("nodes where entity_type is PERSON");

    c.bench_function("by_kind_2k_nodes", |bench| {
        bench.iter(|| black_box(query.run(&nodes, &relationships, &limits)))
    });
}

fn bench_paths(c: &mut Criterion) {
    let (nodes, relationships) = authorship_ring(50);
    let limits = TraversalLimits::default();
    let query = TraversalQuery::parse("paths between PERSON and PAPER limit 100");

    c.bench_function("paths_100_nodes", |bench| {
        bench.iter(|| black_box(query.run(&nodes, &relationships, &limits)))
    });
}

fn bench_sizing(c: &mut Criterion) {
    let settings = BatchSettings::default();
    let items: Vec<Record> = (0..500)
        .map(|i| {
            json!({
                "id": format!("item-{i}"),
                "entity_type": "PAPER",
                "description": "a short abstract about graph retrieval and query planning",
            })
            .as_object()
            .cloned()
            .unwrap_or_default()
        })
        .collect();

    c.bench_function("choose_batch_size_500_items", |bench| {
        bench.iter(|| {
            black_box(choose_batch_size(
                &items,
                BatchOperation::Classify,
                "label each paper by topic",
                &settings,
            ))
        })
    });
}

criterion_group!(benches, bench_by_kind, bench_paths, bench_sizing);
criterion_main!(benches);
