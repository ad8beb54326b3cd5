//! Structured pipeline events.
//!
//! `AnalystEvent` replaces ad hoc diagnostic printing in the engine with typed
//! events keyed by stage, step and batch. Sinks decide where they go: the
//! `tracing` subscriber, newline-delimited JSON, or memory (testing).

use std::io::Write;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

// ── Event types ─────────────────────────────────────────────────────────

/// An event emitted by the query pipeline or the micro-batch executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnalystEvent {
    /// Schema introspection finished.
    SchemaDescribed {
        node_kinds: usize,
        relationship_kinds: usize,
        total_nodes: usize,
        total_relationships: usize,
    },
    /// Schema introspection failed; an empty schema is used instead.
    SchemaUnavailable { error: String },
    /// The reasoning service produced a usable plan.
    PlanReady { steps: usize },
    /// The plan was unusable; a single fallback step replaces it.
    PlanFallback { reason: String },
    /// A step is about to run.
    StepStarted {
        step: u32,
        query_type: String,
        route: String,
    },
    /// A declared dependency has no result yet. The step runs anyway.
    DependencyMissing { step: u32, dependency: u32 },
    StepSucceeded { step: u32, rows: usize },
    StepFailed { step: u32, error: String },
    /// Answer synthesis failed; the answer is an inline error string.
    AnswerFailed { error: String },
    /// Batch size picked for a micro-batch run.
    BatchSizeChosen {
        batch_size: usize,
        total_items: usize,
        probed: bool,
    },
    BatchStarted { batch: usize, size: usize },
    /// A batch contributed nothing because its call or reply failed.
    BatchFailed { batch: usize, error: String },
    BatchRunCompleted {
        operation: String,
        batches: usize,
        failed_batches: usize,
        items: usize,
    },
    /// A merged batch result was written under a variable name.
    VariableStored { name: String, items: usize },
}

impl AnalystEvent {
    /// Whether this event reports a degraded outcome.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            AnalystEvent::SchemaUnavailable { .. }
                | AnalystEvent::PlanFallback { .. }
                | AnalystEvent::DependencyMissing { .. }
                | AnalystEvent::StepFailed { .. }
                | AnalystEvent::AnswerFailed { .. }
                | AnalystEvent::BatchFailed { .. }
        )
    }
}

// ── EventSink trait ─────────────────────────────────────────────────────

/// A destination for pipeline events.
pub trait EventSink: Send + Sync {
    /// Emit a single event.
    fn emit(&self, event: &AnalystEvent);

    /// Emit a batch of events.
    fn emit_batch(&self, events: &[AnalystEvent]) {
        for e in events {
            self.emit(e);
        }
    }
}

// ── TracingSink ─────────────────────────────────────────────────────────

/// Forwards events to `tracing`: degraded outcomes at `warn`, milestones at
/// `info`, per-step and per-batch progress at `debug`.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &AnalystEvent) {
        match event {
            AnalystEvent::SchemaDescribed {
                node_kinds,
                relationship_kinds,
                total_nodes,
                total_relationships,
            } => {
                tracing::info!(
                    stage = "schema",
                    node_kinds,
                    relationship_kinds,
                    total_nodes,
                    total_relationships,
                    "schema described"
                );
            }
            AnalystEvent::SchemaUnavailable { error } => {
                tracing::warn!(stage = "schema", %error, "schema unavailable, using empty schema");
            }
            AnalystEvent::PlanReady { steps } => {
                tracing::info!(stage = "plan", steps, "plan ready");
            }
            AnalystEvent::PlanFallback { reason } => {
                tracing::warn!(stage = "plan", %reason, "plan unusable, using fallback step");
            }
            AnalystEvent::StepStarted {
                step,
                query_type,
                route,
            } => {
                tracing::debug!(stage = "execute", step, %query_type, %route, "step started");
            }
            AnalystEvent::DependencyMissing { step, dependency } => {
                tracing::warn!(stage = "execute", step, dependency, "dependency has no result, proceeding");
            }
            AnalystEvent::StepSucceeded { step, rows } => {
                tracing::debug!(stage = "execute", step, rows, "step succeeded");
            }
            AnalystEvent::StepFailed { step, error } => {
                tracing::warn!(stage = "execute", step, %error, "step failed");
            }
            AnalystEvent::AnswerFailed { error } => {
                tracing::error!(stage = "answer", %error, "answer synthesis failed");
            }
            AnalystEvent::BatchSizeChosen {
                batch_size,
                total_items,
                probed,
            } => {
                tracing::info!(stage = "batch", batch_size, total_items, probed, "batch size chosen");
            }
            AnalystEvent::BatchStarted { batch, size } => {
                tracing::debug!(stage = "batch", batch, size, "batch started");
            }
            AnalystEvent::BatchFailed { batch, error } => {
                tracing::warn!(stage = "batch", batch, %error, "batch contributed no items");
            }
            AnalystEvent::BatchRunCompleted {
                operation,
                batches,
                failed_batches,
                items,
            } => {
                tracing::info!(stage = "batch", %operation, batches, failed_batches, items, "batch run completed");
            }
            AnalystEvent::VariableStored { name, items } => {
                tracing::info!(stage = "state", %name, items, "variable stored");
            }
        }
    }
}

// ── JsonSink ────────────────────────────────────────────────────────────

/// Emits events as newline-delimited JSON, on stderr by default so that
/// command output on stdout stays parseable.
pub struct JsonSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonSink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(writer)),
        }
    }

    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl Default for JsonSink {
    fn default() -> Self {
        Self::stderr()
    }
}

impl EventSink for JsonSink {
    fn emit(&self, event: &AnalystEvent) {
        let Ok(json) = serde_json::to_string(event) else {
            return;
        };
        let mut out = self.out.lock().expect("event writer lock poisoned");
        if let Err(e) = writeln!(out, "{json}") {
            tracing::warn!(error = %e, "failed to write event");
        }
    }
}

// ── VecSink ─────────────────────────────────────────────────────────────

/// Collects events into a `Vec<AnalystEvent>` for testing.
pub struct VecSink {
    events: Mutex<Vec<AnalystEvent>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events.
    pub fn events(&self) -> Vec<AnalystEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of collected events.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of collected events that report a degraded outcome.
    pub fn warning_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.is_warning())
            .count()
    }
}

impl Default for VecSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecSink {
    fn emit(&self, event: &AnalystEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ── NullSink ────────────────────────────────────────────────────────────

/// Discards every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &AnalystEvent) {}
}
