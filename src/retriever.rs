//! Public entry points of the query pipeline.
//!
//! `AnalyticalRetriever` wires the stages together:
//! schema → plan → execute → process for [`get_context`](AnalyticalRetriever::get_context),
//! and format → answer for [`get_completion`](AnalyticalRetriever::get_completion).
//! Stage failures are folded into the returned values; neither entry point
//! returns an error.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::answer;
use crate::config::AnalystConfig;
use crate::execute::{ExecutionContext, StepExecutor};
use crate::format::format_context;
use crate::graph::schema::describe_schema;
use crate::graph::{GraphBackend, SchemaSummary};
use crate::llm::ReasoningService;
use crate::observe::{EventSink, TracingSink};
use crate::plan::{PlanOutcome, QueryPlanner};

/// The query pipeline over one backend and one reasoning service.
pub struct AnalyticalRetriever {
    backend: Arc<dyn GraphBackend>,
    reasoning: Arc<dyn ReasoningService>,
    sink: Arc<dyn EventSink>,
    config: AnalystConfig,
}

impl AnalyticalRetriever {
    pub fn new(
        backend: Arc<dyn GraphBackend>,
        reasoning: Arc<dyn ReasoningService>,
        config: AnalystConfig,
    ) -> Self {
        Self {
            backend,
            reasoning,
            sink: Arc::new(TracingSink),
            config,
        }
    }

    /// Replace the default `tracing` event sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &AnalystConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn GraphBackend {
        self.backend.as_ref()
    }

    /// Schema of the active backend (empty when introspection fails).
    pub fn schema(&self) -> SchemaSummary {
        describe_schema(self.backend.as_ref(), self.sink.as_ref())
    }

    /// Plan `query` without executing it.
    pub fn plan(&self, query: &str) -> PlanOutcome {
        let schema = self.schema();
        self.plan_with_schema(query, &schema)
    }

    fn plan_with_schema(&self, query: &str, schema: &SchemaSummary) -> PlanOutcome {
        QueryPlanner::new(self.reasoning.as_ref(), &self.config.planner).plan(
            query,
            self.backend.as_ref(),
            schema,
            self.sink.as_ref(),
        )
    }

    /// Retrieve everything needed to answer `query`.
    ///
    /// A failure that escapes the stages (a panic in a backend, a poisoned
    /// lock) is caught here once and reported as a failed context.
    pub fn get_context(&self, query: &str) -> ExecutionContext {
        match catch_unwind(AssertUnwindSafe(|| self.run_pipeline(query))) {
            Ok(context) => context,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(stage = "retrieve", %message, "query pipeline failed");
                ExecutionContext::failed(query, message)
            }
        }
    }

    fn run_pipeline(&self, query: &str) -> ExecutionContext {
        let schema = self.schema();
        let plan = self.plan_with_schema(query, &schema);
        let steps = StepExecutor::new(
            self.backend.as_ref(),
            &self.config.traversal,
            self.sink.as_ref(),
        )
        .execute(&plan.steps);
        ExecutionContext::new(query, steps)
    }

    /// Answer `query`, retrieving a context first unless one is given.
    ///
    /// Always returns exactly one answer string.
    pub fn get_completion(&self, query: &str, context: Option<&ExecutionContext>) -> Vec<String> {
        let owned;
        let context = match context {
            Some(context) => context,
            None => {
                owned = self.get_context(query);
                &owned
            }
        };

        if let Some(error) = &context.error {
            return vec![format!("Error processing query: {error}")];
        }

        let digest = format_context(context, &self.config.formatter);
        vec![answer::synthesize(
            self.reasoning.as_ref(),
            &self.config.answer,
            query,
            &digest,
            self.sink.as_ref(),
        )]
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "query pipeline panicked".to_string()
    }
}
