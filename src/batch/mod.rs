//! Micro-batch executor: runs a reasoning-service operation over a large item
//! collection in token-bounded slices and merges the results.
//!
//! - `sizing`: pick a batch size by probing real prompts against a ceiling
//! - `prompt`: item listings and per-operation instruction templates
//! - `merge`: reply parsing, identity reconciliation, local grouping
//!
//! Batches run one after another. A failed batch contributes no items and is
//! reported in [`MergedBatchResult::batches`]; it never stops the run.

pub mod merge;
pub mod prompt;
pub mod sizing;

use serde::{Deserialize, Serialize};

use crate::config::BatchSettings;
use crate::error::{AnalystResult, BatchError};
use crate::graph::Record;
use crate::llm::ReasoningService;
use crate::observe::{AnalystEvent, EventSink};
use crate::provenance::{DerivationKind, Provenance};
use crate::state::{ContextStore, StateStore, StateVariable};

/// What to do with each batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperation {
    /// Rewrite or filter items through the reasoning service.
    Transform,
    /// Tag every item with a category from the reasoning service.
    Classify,
    /// Count items per value of the group field (local).
    Count,
    /// Group items by the group field (local).
    Aggregate,
}

impl BatchOperation {
    /// Parse an operation name; `process` is accepted for `transform`.
    pub fn parse(name: &str) -> Result<Self, BatchError> {
        match name.trim().to_lowercase().as_str() {
            "transform" | "process" => Ok(Self::Transform),
            "classify" => Ok(Self::Classify),
            "count" => Ok(Self::Count),
            "aggregate" => Ok(Self::Aggregate),
            _ => Err(BatchError::UnknownOperation {
                name: name.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transform => "transform",
            Self::Classify => "classify",
            Self::Count => "count",
            Self::Aggregate => "aggregate",
        }
    }

    pub fn derivation(self) -> DerivationKind {
        match self {
            Self::Transform => DerivationKind::Transformed,
            Self::Classify => DerivationKind::Classified,
            Self::Count => DerivationKind::Counted,
            Self::Aggregate => DerivationKind::Aggregated,
        }
    }

    /// Whether each batch costs a reasoning-service call.
    pub fn calls_reasoning(self) -> bool {
        matches!(self, Self::Transform | Self::Classify)
    }
}

impl std::fmt::Display for BatchOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub index: usize,
    pub size: usize,
    pub contributed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// All batches' items concatenated in batch order, with per-batch reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedBatchResult {
    pub operation: BatchOperation,
    pub items: Vec<Record>,
    pub total_input: usize,
    pub batch_size: usize,
    pub batches: Vec<BatchReport>,
    /// Variable the items were stored under, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_as: Option<String>,
}

impl MergedBatchResult {
    fn empty(operation: BatchOperation) -> Self {
        Self {
            operation,
            items: Vec::new(),
            total_input: 0,
            batch_size: 0,
            batches: Vec::new(),
            stored_as: None,
        }
    }

    pub fn failed_batches(&self) -> usize {
        self.batches.iter().filter(|b| b.error.is_some()).count()
    }
}

/// Runs batch operations and writes named results to the variable stores.
pub struct MicroBatchExecutor<'a> {
    reasoning: &'a dyn ReasoningService,
    settings: &'a BatchSettings,
    sink: &'a dyn EventSink,
    context: &'a ContextStore,
    state: &'a StateStore,
}

impl<'a> MicroBatchExecutor<'a> {
    pub fn new(
        reasoning: &'a dyn ReasoningService,
        settings: &'a BatchSettings,
        sink: &'a dyn EventSink,
        context: &'a ContextStore,
        state: &'a StateStore,
    ) -> Self {
        Self {
            reasoning,
            settings,
            sink,
            context,
            state,
        }
    }

    /// Run `operation` over `items`.
    ///
    /// Only a failed write to the state store is an error; reasoning and reply
    /// failures are recorded per batch.
    pub fn run(
        &self,
        items: &[Record],
        operation: BatchOperation,
        instruction: &str,
        batch_size: Option<usize>,
        target_variable: Option<&str>,
    ) -> AnalystResult<MergedBatchResult> {
        if items.is_empty() {
            self.sink.emit(&AnalystEvent::BatchRunCompleted {
                operation: operation.to_string(),
                batches: 0,
                failed_batches: 0,
                items: 0,
            });
            return Ok(MergedBatchResult::empty(operation));
        }

        let choice = match batch_size {
            Some(size) => sizing::SizeChoice {
                size: size.max(1),
                probed: false,
            },
            None => sizing::choose_batch_size(items, operation, instruction, self.settings),
        };
        self.sink.emit(&AnalystEvent::BatchSizeChosen {
            batch_size: choice.size,
            total_items: items.len(),
            probed: choice.probed,
        });

        let chunk = choice.size.min(items.len());
        let mut merged = Vec::new();
        let mut reports = Vec::new();
        for (index, batch) in items.chunks(chunk).enumerate() {
            self.sink.emit(&AnalystEvent::BatchStarted {
                batch: index,
                size: batch.len(),
            });
            match self.run_batch(index, batch, operation, instruction) {
                Ok(out) => {
                    reports.push(BatchReport {
                        index,
                        size: batch.len(),
                        contributed: out.len(),
                        error: None,
                    });
                    merged.extend(out);
                }
                Err(e) => {
                    let error = e.to_string();
                    self.sink.emit(&AnalystEvent::BatchFailed {
                        batch: index,
                        error: error.clone(),
                    });
                    reports.push(BatchReport {
                        index,
                        size: batch.len(),
                        contributed: 0,
                        error: Some(error),
                    });
                }
            }
        }

        let mut result = MergedBatchResult {
            operation,
            items: merged,
            total_input: items.len(),
            batch_size: choice.size,
            batches: reports,
            stored_as: None,
        };
        self.sink.emit(&AnalystEvent::BatchRunCompleted {
            operation: operation.to_string(),
            batches: result.batches.len(),
            failed_batches: result.failed_batches(),
            items: result.items.len(),
        });

        if let Some(name) = target_variable {
            if !result.items.is_empty() {
                self.store(name, &result)?;
                result.stored_as = Some(name.to_string());
            }
        }
        Ok(result)
    }

    fn run_batch(
        &self,
        index: usize,
        batch: &[Record],
        operation: BatchOperation,
        instruction: &str,
    ) -> Result<Vec<Record>, BatchError> {
        match operation {
            BatchOperation::Transform => {
                let reported = self.ask(index, batch, operation, instruction, merge::transformed_items)?;
                Ok(merge::reconcile(batch, &reported))
            }
            BatchOperation::Classify => {
                let reported = self.ask(index, batch, operation, instruction, merge::classified_items)?;
                Ok(merge::overlay_categories(
                    batch,
                    &reported,
                    &self.settings.category_field,
                ))
            }
            BatchOperation::Count => Ok(merge::count_by(batch, &self.settings.group_field)),
            BatchOperation::Aggregate => Ok(merge::aggregate_by(batch, &self.settings.group_field)),
        }
    }

    /// One reasoning call for a batch, parsed into reported items.
    fn ask(
        &self,
        index: usize,
        batch: &[Record],
        operation: BatchOperation,
        instruction: &str,
        extract: fn(serde_json::Value) -> Result<Vec<Record>, String>,
    ) -> Result<Vec<Record>, BatchError> {
        let prompt = prompt::batch_prompt(operation, instruction, batch, self.settings);
        let reply = self
            .reasoning
            .complete(&prompt, None, &[])
            .map_err(|e| BatchError::Reasoning {
                batch: index,
                message: e.to_string(),
            })?;
        merge::parse_reply(&reply)
            .and_then(extract)
            .map_err(|message| BatchError::ReplyParse {
                batch: index,
                message,
            })
    }

    fn store(&self, name: &str, result: &MergedBatchResult) -> AnalystResult<()> {
        let operation = result.operation;
        self.context.set(name, result.items.clone());
        self.state.put(&StateVariable {
            name: name.to_string(),
            items: result.items.clone(),
            provenance: Provenance::for_operation(
                operation.derivation(),
                operation.as_str(),
                result.items.len(),
            ),
        })?;
        self.sink.emit(&AnalystEvent::VariableStored {
            name: name.to_string(),
            items: result.items.len(),
        });
        Ok(())
    }
}
