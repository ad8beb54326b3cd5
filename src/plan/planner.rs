//! Query planner: asks the reasoning service to decompose a question.
//!
//! One call per question, no retry. Anything unusable in the reply (a reasoning
//! failure, a non-array, a step missing a field, clashing step numbers) is
//! replaced by a single fallback step that returns everything up to a cap.

use crate::config::PlannerSettings;
use crate::graph::{GraphBackend, SchemaSummary};
use crate::llm::{strip_code_fence, ReasoningService};
use crate::observe::{AnalystEvent, EventSink};

use super::{check_steps, OutputType, QueryStep, QueryType};

/// The steps to run, and why the fallback was used if it was.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub steps: Vec<QueryStep>,
    pub fallback_reason: Option<String>,
}

impl PlanOutcome {
    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

/// Builds planning prompts and turns replies into steps.
pub struct QueryPlanner<'a> {
    reasoning: &'a dyn ReasoningService,
    settings: &'a PlannerSettings,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(reasoning: &'a dyn ReasoningService, settings: &'a PlannerSettings) -> Self {
        Self {
            reasoning,
            settings,
        }
    }

    /// Plan `query` against `backend`, falling back on any failure.
    pub fn plan(
        &self,
        query: &str,
        backend: &dyn GraphBackend,
        schema: &SchemaSummary,
        sink: &dyn EventSink,
    ) -> PlanOutcome {
        let prompt = self.build_prompt(query, backend, schema);
        let parsed = self
            .reasoning
            .complete(&prompt, Some(&self.settings.system_prompt), &[])
            .map_err(|e| format!("reasoning service failed: {e}"))
            .and_then(|reply| parse_plan(&reply));

        match parsed {
            Ok(steps) => {
                sink.emit(&AnalystEvent::PlanReady { steps: steps.len() });
                PlanOutcome {
                    steps,
                    fallback_reason: None,
                }
            }
            Err(reason) => {
                sink.emit(&AnalystEvent::PlanFallback {
                    reason: reason.clone(),
                });
                PlanOutcome {
                    steps: vec![self.fallback_step(query, backend)],
                    fallback_reason: Some(reason),
                }
            }
        }
    }

    /// The single step used when no usable plan came back.
    pub fn fallback_step(&self, query: &str, backend: &dyn GraphBackend) -> QueryStep {
        QueryStep {
            step_number: 1,
            description: format!("Basic search for: {query}"),
            query_type: QueryType::parse(backend.kind().native_query_label()),
            query: backend.fallback_query(self.settings.fallback_limit),
            expected_output_type: OutputType::TextExtraction,
            depends_on: Vec::new(),
        }
    }

    /// The planning instruction: query, backend kind, schema and syntax examples.
    pub fn build_prompt(
        &self,
        query: &str,
        backend: &dyn GraphBackend,
        schema: &SchemaSummary,
    ) -> String {
        let kind = backend.kind();
        let schema_json = serde_json::to_string_pretty(schema).unwrap_or_default();
        let example_query =
            serde_json::to_string(&backend.fallback_query(10)).unwrap_or_else(|_| "\"\"".into());

        format!(
            r#"You are an expert at breaking analytical questions down into systematic graph database operations.

USER QUERY: "{query}"

BACKEND: {kind}
The graph contains {nodes} nodes and {rels} relationships.

AVAILABLE GRAPH SCHEMA:
{schema_json}

Node kinds are stored in the `entity_type` property and relationship kinds in the
`relationship_name` property. Only use kinds that appear in the schema.

{upper} SYNTAX EXAMPLES:
{examples}

Break the query down into a series of steps that together retrieve all the data
needed to answer it. For each step provide:
1. A clear description of what the step does
2. A valid query for this backend
3. The output it produces, one of: entity_list, relationship_analysis,
   coauthorship_network, aggregation, pattern_discovery, text_extraction
4. Which earlier steps (if any) it builds on

Return only a JSON array of steps in exactly this format:
[
    {{
        "step_number": 1,
        "description": "Clear description of what this step does",
        "query_type": "{label}",
        "query": {example_query},
        "expected_output_type": "entity_list",
        "depends_on": []
    }}
]"#,
            nodes = schema.total_nodes,
            rels = schema.total_relationships,
            upper = kind.to_string().to_uppercase(),
            examples = backend.syntax_examples(),
            label = kind.native_query_label(),
        )
    }
}

/// Parse a plan reply: optional code fence, then a strict JSON array of
/// complete steps with positive, unique step numbers.
pub fn parse_plan(reply: &str) -> Result<Vec<QueryStep>, String> {
    let steps: Vec<QueryStep> = serde_json::from_str(strip_code_fence(reply))
        .map_err(|e| format!("plan is not a valid step list: {e}"))?;
    check_steps(&steps).map_err(|defect| defect.to_string())?;
    Ok(steps)
}
