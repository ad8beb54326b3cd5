//! End-to-end tests for the query pipeline and the micro-batch executor.
//!
//! A scripted reasoning service stands in for the model: each test queues the
//! plan and answer replies it expects and inspects the prompts it received.

use std::sync::Arc;

use serde_json::{json, Value};

use graph_analyst::batch::{BatchOperation, MicroBatchExecutor};
use graph_analyst::config::AnalystConfig;
use graph_analyst::execute::{RunStatus, StepStatus};
use graph_analyst::graph::{GraphBackend, GraphDocument, MemoryGraph, Record, SparqlGraph};
use graph_analyst::llm::ScriptedService;
use graph_analyst::observe::{AnalystEvent, VecSink};
use graph_analyst::plan::OutputType;
use graph_analyst::process::StepOutput;
use graph_analyst::retriever::AnalyticalRetriever;
use graph_analyst::state::{ContextStore, StateStore};

const DOCUMENT: &str = r#"{
    "nodes": [
        {"id": "Jane Doe", "entity_type": "PERSON", "description": "author of graph papers"},
        {"id": "John Roe", "entity_type": "\"PERSON\""},
        {"id": "Graph Paper", "entity_type": "PAPER"},
        {"id": "Acme Lab", "entity_type": "ORG"}
    ],
    "edges": [
        {"source": "Jane Doe", "target": "Graph Paper", "relationship_name": "wrote"},
        {"source": "John Roe", "target": "Graph Paper", "relationship_name": "wrote"},
        {"source": "Jane Doe", "target": "John Roe", "relationship_name": "coauthored"},
        {"source": "Jane Doe", "target": "Acme Lab", "relationship_name": "affiliated_with"}
    ]
}"#;

fn document() -> GraphDocument {
    GraphDocument::from_json(DOCUMENT).unwrap()
}

fn memory_graph() -> Arc<MemoryGraph> {
    Arc::new(MemoryGraph::from_document(&document()))
}

fn step(n: u32, query_type: &str, query: &str, output: &str, deps: &[u32]) -> Value {
    json!({
        "step_number": n,
        "description": format!("step {n}"),
        "query_type": query_type,
        "query": query,
        "expected_output_type": output,
        "depends_on": deps,
    })
}

fn retriever(
    backend: Arc<dyn GraphBackend>,
    replies: &[String],
) -> (AnalyticalRetriever, Arc<ScriptedService>, Arc<VecSink>) {
    let service = Arc::new(ScriptedService::with_replies(replies.iter().cloned()));
    let sink = Arc::new(VecSink::new());
    let retriever = AnalyticalRetriever::new(backend, service.clone(), AnalystConfig::default())
        .with_sink(sink.clone());
    (retriever, service, sink)
}

#[test]
fn multi_step_plan_isolates_failures() {
    let plan = json!([
        step(1, "petgraph", "find nodes with entity_type=PERSON", "entity_list", &[]),
        step(2, "sparql", "SELECT ?s WHERE { ?s ?p ?o }", "entity_list", &[]),
        step(3, "petgraph", "find edges between PERSON and PAPER nodes", "relationship_analysis", &[1, 2]),
        step(4, "petgraph", "find paths between PERSON and ORG nodes limit 5", "text_extraction", &[]),
    ]);
    let (retriever, service, sink) = retriever(
        memory_graph(),
        &[plan.to_string(), "Jane Doe and John Roe wrote Graph Paper.".into()],
    );

    let context = retriever.get_context("Who wrote what, and how are people linked to orgs?");

    // Results are keyed and ordered by step number.
    let keys: Vec<u32> = context.steps.keys().copied().collect();
    assert_eq!(keys, vec![1, 2, 3, 4]);

    // Quote-wrapped kinds still match.
    let Some(StepOutput::EntityList { count, .. }) = context.steps[&1].result() else {
        panic!("step 1 should be an entity list");
    };
    assert_eq!(*count, 2);

    // A pattern query on the in-memory backend fails that step only.
    assert_eq!(context.steps[&2].status(), StepStatus::Failed);
    assert!(context.steps[&2].result().is_none());
    assert!(context.steps[&2].error().unwrap().contains("pattern-query"));

    let Some(StepOutput::RelationshipAnalysis {
        relationship_types,
        total_relationships,
        ..
    }) = context.steps[&3].result()
    else {
        panic!("step 3 should be a relationship analysis");
    };
    assert_eq!(*total_relationships, 3);
    assert_eq!(relationship_types["wrote"].len(), 2);
    assert_eq!(relationship_types["coauthored"].len(), 1);

    let Some(StepOutput::Passthrough { rows }) = context.steps[&4].result() else {
        panic!("step 4 should pass rows through");
    };
    assert!(!rows.is_empty() && rows.len() <= 5);
    assert!(rows.iter().all(|r| r.contains_key("path")));

    let summary = &context.execution_summary;
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!((summary.total_steps, summary.successful_steps, summary.failed_steps), (4, 3, 1));
    assert!((summary.success_rate - 0.75).abs() < f64::EPSILON);

    // The failed dependency is reported but step 3 still ran.
    assert!(sink.events().contains(&AnalystEvent::DependencyMissing {
        step: 3,
        dependency: 2
    }));

    let answer = retriever.get_completion("Who wrote what?", Some(&context));
    assert_eq!(answer, vec!["Jane Doe and John Roe wrote Graph Paper.".to_string()]);

    let digest_prompt = &service.calls()[1].prompt;
    assert!(digest_prompt.contains("Step 2: step 2 (FAILED:"));
    assert!(digest_prompt.contains("Step 3: step 3 (uses results of steps 1, 2)"));
    assert!(digest_prompt.contains("paths between nodes"));
}

#[test]
fn malformed_plan_falls_back_to_basic_search() {
    let (retriever, service, sink) =
        retriever(memory_graph(), &["I think you should look at people.".into()]);

    let context = retriever.get_context("Tell me about the graph");
    assert_eq!(context.steps.len(), 1);
    let only = &context.steps[&1];
    assert_eq!(only.description, "Basic search for: Tell me about the graph");
    let Some(StepOutput::Passthrough { rows }) = only.result() else {
        panic!("fallback step should pass rows through");
    };
    assert_eq!(rows.len(), 4);
    assert_eq!(service.call_count(), 1);
    assert!(sink.events().iter().any(|e| matches!(e, AnalystEvent::PlanFallback { .. })));
}

#[test]
fn person_scenario_on_two_node_graph() {
    let graph = Arc::new(MemoryGraph::from_document(
        &GraphDocument::from_json(
            r#"{"nodes": [{"id": "a", "entity_type": "PERSON"}, {"id": "b", "entity_type": "PERSON"}]}"#,
        )
        .unwrap(),
    ));
    let plan = json!([step(1, "petgraph", "FIND nodes with entity_type=PERSON", "entity_list", &[])]);
    let (retriever, _, _) = retriever(graph, &[plan.to_string()]);

    let context = retriever.get_context("list people");
    let Some(StepOutput::EntityList { entities, count }) = context.steps[&1].result() else {
        panic!("expected entity list");
    };
    assert_eq!(*count, 2);
    let ids: Vec<&Value> = entities.iter().map(|e| &e["node"]).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[test]
fn coauthorship_over_all_nodes_and_edges() {
    let plan = json!([
        step(1, "petgraph", "all nodes", "coauthorship_network", &[]),
        step(2, "petgraph", "find edges", "coauthorship_network", &[]),
    ]);
    let (retriever, _, _) = retriever(memory_graph(), &[plan.to_string()]);
    let context = retriever.get_context("who coauthors with whom?");

    let Some(StepOutput::CoauthorshipNetwork { authors, .. }) = context.steps[&1].result() else {
        panic!("expected coauthorship network");
    };
    // "Graph Paper" and "Acme Lab" look like names; the heuristic keeps them.
    assert!(authors.contains(&"Jane Doe".to_string()));
    assert!(authors.contains(&"John Roe".to_string()));

    let Some(StepOutput::CoauthorshipNetwork {
        coauthorship_count,
        author_count,
        ..
    }) = context.steps[&2].result()
    else {
        panic!("expected coauthorship network");
    };
    assert_eq!(*coauthorship_count, 4);
    assert_eq!(*author_count, 0);
}

#[test]
fn sparql_backend_runs_pattern_and_native_steps() {
    let graph = SparqlGraph::in_memory("papers").unwrap();
    graph.load_document(&document()).unwrap();

    let people = "PREFIX p: <https://graph-analyst.dev/prop/> \
        SELECT ?node WHERE { GRAPH {graph} { ?x <https://graph-analyst.dev/id> ?node ; \
        p:entity_type \"PERSON\" } } ORDER BY ?node";
    let plan = json!([
        step(1, "sparql", people, "entity_list", &[]),
        step(2, "hybrid", "ASK { GRAPH {graph} { ?s ?p ?o } }", "text_extraction", &[]),
        step(3, "native-traversal", "find edges", "relationship_analysis", &[]),
        step(4, "sparql", "CONSTRUCT { ?s ?p ?o } WHERE { ?s ?p ?o }", "text_extraction", &[]),
    ]);
    let (retriever, service, _) = retriever(Arc::new(graph), &[plan.to_string()]);

    let context = retriever.get_context("who is a person?");

    // Only Jane's kind is stored unquoted; the pattern query matches it exactly.
    let Some(StepOutput::EntityList { entities, .. }) = context.steps[&1].result() else {
        panic!("expected entity list");
    };
    assert_eq!(entities[0]["node"], "Jane Doe");

    let Some(StepOutput::Passthrough { rows }) = context.steps[&2].result() else {
        panic!("expected ASK rows");
    };
    assert_eq!(rows[0]["result"], true);

    let Some(StepOutput::RelationshipAnalysis {
        total_relationships, ..
    }) = context.steps[&3].result()
    else {
        panic!("expected relationship analysis");
    };
    assert_eq!(*total_relationships, 4);

    assert_eq!(context.steps[&4].status(), StepStatus::Failed);
    assert!((context.execution_summary.success_rate - 0.75).abs() < f64::EPSILON);

    let prompt = &service.calls()[0].prompt;
    assert!(prompt.contains("BACKEND: SPARQL"));
    assert!(prompt.contains("\"PERSON\""));
}

#[test]
fn plan_json_shape_round_trips_through_the_planner() {
    let plan = json!([step(1, "petgraph", "all nodes limit 2", "timeline", &[])]);
    let (retriever, _, _) = retriever(memory_graph(), &[plan.to_string()]);
    let outcome = retriever.plan("anything");
    assert!(!outcome.is_fallback());
    assert_eq!(
        outcome.steps[0].expected_output_type,
        OutputType::Unrecognized("timeline".into())
    );
}

fn items(value: Value) -> Vec<Record> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
}

#[test]
fn micro_batch_transform_survives_a_bad_batch() {
    let service = ScriptedService::with_replies([
        r#"{"processed_items": [{"id": "'JANE DOE'", "field": "graphs", "reason": "wrote papers"}]}"#,
        "Sorry, I cannot help with that.",
        r#"```json
        {"included": [{"name": "Acme Lab"}]}
        ```"#,
    ]);
    let config = AnalystConfig::default();
    let sink = VecSink::new();
    let context = ContextStore::new();
    let state = StateStore::memory();
    let executor = MicroBatchExecutor::new(&service, &config.batch, &sink, &context, &state);

    let input = items(json!([
        {"node": "Jane Doe", "entity_type": "PERSON"},
        {"data": {"id": "John Roe"}},
        {"node": "Graph Paper"},
        {"node": "Other"},
        {"node": "Acme Lab", "entity_type": "ORG"}
    ]));
    let result = executor
        .run(&input, BatchOperation::parse("process").unwrap(), "tag research field", Some(2), Some("tagged"))
        .unwrap();

    assert_eq!(service.call_count(), 3);
    assert_eq!(result.batches.len(), 3);
    assert_eq!(result.failed_batches(), 1);
    assert!(result.items.len() <= input.len());

    let names: Vec<&Value> = result.items.iter().map(|i| &i["node"]).collect();
    assert_eq!(names, vec!["Jane Doe", "Acme Lab"]);
    assert_eq!(result.items[0]["field"], "graphs");
    assert!(!result.items[0].contains_key("reason"));

    assert_eq!(context.get("tagged").unwrap().len(), 2);
    let stored = state.get("tagged").unwrap().unwrap();
    assert_eq!(stored.provenance.description, "Processed data from transform command");
}

#[test]
fn micro_batch_classify_empty_input() {
    let service = ScriptedService::new();
    let config = AnalystConfig::default();
    let sink = VecSink::new();
    let context = ContextStore::new();
    let state = StateStore::memory();
    let executor = MicroBatchExecutor::new(&service, &config.batch, &sink, &context, &state);

    let result = executor
        .run(&[], BatchOperation::Classify, "label", None, Some("labels"))
        .unwrap();
    assert!(result.items.is_empty());
    assert_eq!(result.total_input, 0);
    assert_eq!(service.call_count(), 0);
    assert!(state.get("labels").unwrap().is_none());
}

#[test]
fn micro_batch_probes_size_for_large_inputs() {
    let input: Vec<Record> = (0..60)
        .map(|i| {
            items(json!([{"id": format!("n{i}"), "entity_type": "PERSON", "description": "short"}]))
                .remove(0)
        })
        .collect();
    let service = ScriptedService::new();
    let config = AnalystConfig::default();
    let sink = VecSink::new();
    let context = ContextStore::new();
    let state = StateStore::memory();
    let executor = MicroBatchExecutor::new(&service, &config.batch, &sink, &context, &state);

    let result = executor
        .run(&input, BatchOperation::Count, "count kinds", None, None)
        .unwrap();

    // Short items fit the largest candidate: 50 + 10.
    assert_eq!(result.batch_size, 50);
    assert_eq!(result.batches.len(), 2);
    assert_eq!(result.items[0]["count"], 50);
    assert_eq!(result.items[1]["count"], 10);
    assert!(sink.events().contains(&AnalystEvent::BatchSizeChosen {
        batch_size: 50,
        total_items: 60,
        probed: true
    }));
}
