//! Persistence tests: stored batch variables and the on-disk SPARQL store
//! survive a restart (drop + reopen).

use serde_json::json;

use graph_analyst::batch::{BatchOperation, MicroBatchExecutor};
use graph_analyst::config::AnalystConfig;
use graph_analyst::graph::{GraphBackend, GraphDocument, GraphNode, SparqlGraph, KIND_KEY};
use graph_analyst::llm::ScriptedService;
use graph_analyst::observe::NullSink;
use graph_analyst::provenance::DerivationKind;
use graph_analyst::state::{ContextStore, StateStore};

#[test]
fn stored_variables_survive_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = AnalystConfig {
        state_dir: Some(dir.path().join("state")),
        ..Default::default()
    };

    // First session: classify and store.
    {
        let service = ScriptedService::with_replies([r#"{"classifications": [{"id": "a", "category": "x"}]}"#]);
        let context = ContextStore::new();
        let state = StateStore::from_dir(config.state_dir.as_deref()).unwrap();
        assert!(state.is_durable());
        let items: Vec<_> = [json!({"id": "a"}), json!({"id": "b"})]
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect();
        MicroBatchExecutor::new(&service, &config.batch, &NullSink, &context, &state)
            .run(&items, BatchOperation::Classify, "label", None, Some("labels"))
            .unwrap();
    }

    // Second session: the ephemeral store is gone, the durable one is not.
    {
        let context = ContextStore::new();
        assert!(context.get("labels").is_none());

        let state = StateStore::from_dir(config.state_dir.as_deref()).unwrap();
        let stored = state.get("labels").unwrap().unwrap();
        assert_eq!(stored.items.len(), 2);
        assert_eq!(stored.items[0]["category"], "x");
        assert_eq!(stored.items[1]["category"], "unknown");
        assert_eq!(stored.provenance.kind, DerivationKind::Classified);
        assert_eq!(state.names().unwrap(), vec!["labels"]);
    }
}

#[test]
fn rewriting_a_variable_overwrites_it() {
    let dir = tempfile::TempDir::new().unwrap();
    let settings = AnalystConfig::default().batch;
    let service = ScriptedService::new();
    let items: Vec<_> = (0..3)
        .map(|i| json!({"id": i, "entity_type": "PERSON"}).as_object().cloned().unwrap())
        .collect();

    for n in [3, 1] {
        let state = StateStore::open(dir.path()).unwrap();
        let context = ContextStore::new();
        MicroBatchExecutor::new(&service, &settings, &NullSink, &context, &state)
            .run(&items[..n], BatchOperation::Aggregate, "", None, Some("groups"))
            .unwrap();
    }

    let state = StateStore::open(dir.path()).unwrap();
    let stored = state.get("groups").unwrap().unwrap();
    assert_eq!(stored.items[0]["count"], 1);
    assert_eq!(service.call_count(), 0);
}

#[test]
fn sparql_store_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("oxigraph");

    {
        let graph = SparqlGraph::open(&path, "papers").unwrap();
        let doc = GraphDocument::from_json(
            r#"{"nodes": [{"id": "Jane Doe", "entity_type": "PERSON"}],
                "edges": [{"source": "Jane Doe", "target": "Graph Paper", "relationship_name": "wrote"}]}"#,
        )
        .unwrap();
        assert_eq!(graph.load_document(&doc).unwrap(), (1, 1));
    }

    let graph = SparqlGraph::open(&path, "papers").unwrap();
    graph
        .add_node(&GraphNode::new("John Roe").with_property(KIND_KEY, "PERSON"))
        .unwrap();

    let ids: Vec<String> = graph.nodes().unwrap().into_iter().map(|n| n.id).collect();
    assert_eq!(ids, vec!["Jane Doe", "Graph Paper", "John Roe"]);
    assert_eq!(graph.relationships().unwrap().len(), 1);

    let schema = graph.describe_schema().unwrap();
    assert_eq!(schema.total_nodes, 3);
    assert_eq!(schema.total_relationships, 1);

    // Other namespaces in the same store stay empty.
    drop(graph);
    let other = SparqlGraph::open(&path, "other").unwrap();
    assert!(other.nodes().unwrap().is_empty());
}

#[test]
fn config_round_trips_through_disk() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("graph-analyst.toml");
    let mut config = AnalystConfig::default();
    config.batch.token_ceiling = 1200;
    config.sparql.store_path = Some(dir.path().join("oxigraph"));
    config.save(&path).unwrap();

    let loaded = AnalystConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}
