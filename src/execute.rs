//! Step executor and the execution context it builds.
//!
//! Steps run one at a time in plan order. Each step is attempted exactly once;
//! a failure is recorded on that step and the run moves on. Dependencies are
//! advisory: a missing one is reported and the step runs anyway.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::{BackendKind, GraphBackend, GraphResult, Record, TraversalLimits};
use crate::observe::{AnalystEvent, EventSink};
use crate::plan::{QueryStep, QueryType};
use crate::process::{self, StepOutput};

/// Which backend path a step's query takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Verbatim pattern query through the backend driver.
    Pattern,
    /// Traversal intent over the node and relationship collections.
    Traversal,
}

impl Route {
    /// Explicit query types route to their path; `hybrid` and unrecognized
    /// types go to the active backend's native path.
    pub fn for_step(query_type: &QueryType, backend: BackendKind) -> Self {
        match query_type {
            QueryType::PatternQuery => Route::Pattern,
            QueryType::NativeTraversal => Route::Traversal,
            QueryType::Hybrid | QueryType::Unrecognized(_) => match backend {
                BackendKind::InMemory => Route::Traversal,
                BackendKind::Sparql => Route::Pattern,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Route::Pattern => "pattern",
            Route::Traversal => "traversal",
        }
    }
}

/// Terminal status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
}

/// A step's outcome: a processed result or an error, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Success { result: StepOutput, raw_count: usize },
    Failed { error: String },
}

/// The recorded result of one plan step.
///
/// Serializes with every field present: `result` is null on failure, `error`
/// is null on success, and `raw_count` is 0 for a failed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "StepRecord", try_from = "StepRecord")]
pub struct StepResult {
    pub step_number: u32,
    pub description: String,
    pub depends_on: Vec<u32>,
    pub outcome: StepOutcome,
}

/// Wire shape of [`StepResult`].
#[derive(Serialize, Deserialize)]
struct StepRecord {
    step_number: u32,
    description: String,
    #[serde(default)]
    depends_on: Vec<u32>,
    status: StepStatus,
    result: Option<StepOutput>,
    error: Option<String>,
    #[serde(default)]
    raw_count: usize,
}

impl From<StepResult> for StepRecord {
    fn from(step: StepResult) -> Self {
        let (status, result, error, raw_count) = match step.outcome {
            StepOutcome::Success { result, raw_count } => {
                (StepStatus::Success, Some(result), None, raw_count)
            }
            StepOutcome::Failed { error } => (StepStatus::Failed, None, Some(error), 0),
        };
        Self {
            step_number: step.step_number,
            description: step.description,
            depends_on: step.depends_on,
            status,
            result,
            error,
            raw_count,
        }
    }
}

impl TryFrom<StepRecord> for StepResult {
    type Error = String;

    fn try_from(record: StepRecord) -> Result<Self, Self::Error> {
        let outcome = match (record.status, record.result, record.error) {
            (StepStatus::Success, Some(result), None) => StepOutcome::Success {
                result,
                raw_count: record.raw_count,
            },
            (StepStatus::Failed, None, Some(error)) => StepOutcome::Failed { error },
            (status, _, _) => {
                return Err(format!(
                    "step {}: status {status:?} needs exactly one of result or error",
                    record.step_number
                ));
            }
        };
        Ok(Self {
            step_number: record.step_number,
            description: record.description,
            depends_on: record.depends_on,
            outcome,
        })
    }
}

impl StepResult {
    pub fn status(&self) -> StepStatus {
        match self.outcome {
            StepOutcome::Success { .. } => StepStatus::Success,
            StepOutcome::Failed { .. } => StepStatus::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == StepStatus::Success
    }

    pub fn result(&self) -> Option<&StepOutput> {
        match &self.outcome {
            StepOutcome::Success { result, .. } => Some(result),
            StepOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            StepOutcome::Success { .. } => None,
            StepOutcome::Failed { error } => Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every planned step was attempted.
    Completed,
    /// The pipeline failed before or outside step execution.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total_steps: usize,
    pub successful_steps: usize,
    pub failed_steps: usize,
    /// `successful_steps / total_steps`, or 0 with no steps.
    pub success_rate: f64,
    pub status: RunStatus,
}

impl ExecutionSummary {
    pub fn from_steps<'a>(steps: impl IntoIterator<Item = &'a StepResult>) -> Self {
        let (mut total, mut successful) = (0usize, 0usize);
        for step in steps {
            total += 1;
            if step.is_success() {
                successful += 1;
            }
        }
        Self {
            total_steps: total,
            successful_steps: successful,
            failed_steps: total - successful,
            success_rate: if total > 0 {
                successful as f64 / total as f64
            } else {
                0.0
            },
            status: RunStatus::Completed,
        }
    }

    fn failed() -> Self {
        Self {
            total_steps: 0,
            successful_steps: 0,
            failed_steps: 0,
            success_rate: 0.0,
            status: RunStatus::Failed,
        }
    }
}

/// Everything retrieved for one question, keyed by step number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub original_query: String,
    pub steps: BTreeMap<u32, StepResult>,
    pub execution_summary: ExecutionSummary,
    /// Set only when the whole pipeline failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionContext {
    pub fn new(original_query: impl Into<String>, steps: BTreeMap<u32, StepResult>) -> Self {
        Self {
            original_query: original_query.into(),
            execution_summary: ExecutionSummary::from_steps(steps.values()),
            steps,
            error: None,
        }
    }

    /// A context for a pipeline that failed outright: no steps, an error.
    pub fn failed(original_query: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            original_query: original_query.into(),
            steps: BTreeMap::new(),
            execution_summary: ExecutionSummary::failed(),
            error: Some(error.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Runs plan steps against a backend.
pub struct StepExecutor<'a> {
    backend: &'a dyn GraphBackend,
    limits: &'a TraversalLimits,
    sink: &'a dyn EventSink,
}

impl<'a> StepExecutor<'a> {
    pub fn new(
        backend: &'a dyn GraphBackend,
        limits: &'a TraversalLimits,
        sink: &'a dyn EventSink,
    ) -> Self {
        Self {
            backend,
            limits,
            sink,
        }
    }

    /// Run one step's query and return its raw rows.
    pub fn run_query(&self, step: &QueryStep) -> GraphResult<Vec<Record>> {
        match Route::for_step(&step.query_type, self.backend.kind()) {
            Route::Pattern => self.backend.execute_pattern(&step.query),
            Route::Traversal => self.backend.traverse(&step.query, self.limits),
        }
    }

    /// Run every step in list order and collect results by step number.
    pub fn execute(&self, steps: &[QueryStep]) -> BTreeMap<u32, StepResult> {
        let mut results: BTreeMap<u32, StepResult> = BTreeMap::new();

        for step in steps {
            for dependency in &step.depends_on {
                let available = results.get(dependency).is_some_and(StepResult::is_success);
                if !available {
                    self.sink.emit(&AnalystEvent::DependencyMissing {
                        step: step.step_number,
                        dependency: *dependency,
                    });
                }
            }

            let route = Route::for_step(&step.query_type, self.backend.kind());
            self.sink.emit(&AnalystEvent::StepStarted {
                step: step.step_number,
                query_type: step.query_type.as_str().to_string(),
                route: route.as_str().to_string(),
            });

            let outcome = match self.run_query(step) {
                Ok(rows) => {
                    self.sink.emit(&AnalystEvent::StepSucceeded {
                        step: step.step_number,
                        rows: rows.len(),
                    });
                    StepOutcome::Success {
                        raw_count: rows.len(),
                        result: process::process(&step.expected_output_type, rows),
                    }
                }
                Err(e) => {
                    let error = e.to_string();
                    self.sink.emit(&AnalystEvent::StepFailed {
                        step: step.step_number,
                        error: error.clone(),
                    });
                    StepOutcome::Failed { error }
                }
            };

            results.insert(
                step.step_number,
                StepResult {
                    step_number: step.step_number,
                    description: step.description.clone(),
                    depends_on: step.depends_on.clone(),
                    outcome,
                },
            );
        }

        results
    }
}
