//! Batch prompts.
//!
//! The same builder serves the size probe and the real call, so the probe
//! measures exactly what will be sent.

use serde_json::Value;

use crate::config::BatchSettings;
use crate::graph::Record;
use crate::identity::{raw_stable_id, strip_quotes, NESTED_KEY};

use super::BatchOperation;

/// Look up `key` at the top level, then nested under `data`.
pub(crate) fn field<'a>(record: &'a Record, key: &str) -> Option<&'a Value> {
    record.get(key).or_else(|| {
        record
            .get(NESTED_KEY)
            .and_then(Value::as_object)
            .and_then(|nested| nested.get(key))
    })
}

/// The identifier shown to the reasoning service, quotes stripped, case kept.
/// Resolves through the same keys, in the same order, as reconciliation.
pub fn display_id(record: &Record) -> Option<String> {
    raw_stable_id(record)
}

fn text_of(record: &Record, key: &str) -> Option<String> {
    field(record, key).map(|value| match value {
        Value::String(s) => strip_quotes(s).to_string(),
        other => other.to_string(),
    })
}

/// One line per item: identifier, kind, description and any category
/// already assigned.
pub fn render_listing(items: &[Record], settings: &BatchSettings) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        let id = display_id(item).unwrap_or_else(|| format!("item-{}", i + 1));
        out.push_str(&format!("{}. ID: {id}", i + 1));
        if let Some(kind) = text_of(item, &settings.group_field) {
            out.push_str(&format!(" | Type: {kind}"));
        }
        if let Some(description) = text_of(item, "description") {
            out.push_str(&format!(" | Description: {description}"));
        }
        if let Some(category) = text_of(item, &settings.category_field) {
            out.push_str(&format!(" | Category: {category}"));
        }
        out.push('\n');
    }
    out
}

/// The full prompt for one batch of `operation`.
pub fn batch_prompt(
    operation: BatchOperation,
    instruction: &str,
    items: &[Record],
    settings: &BatchSettings,
) -> String {
    let listing = render_listing(items, settings);
    let n = items.len();
    match operation {
        BatchOperation::Transform => format!(
            "You are processing a batch of {n} items.\n\n\
             INSTRUCTION: {instruction}\n\n\
             ITEMS:\n{listing}\n\
             Apply the instruction to each item. Return only a JSON object of the form:\n\
             {{\"processed_items\": [{{\"id\": \"<ID exactly as listed>\", \"<field>\": <value>, \"rationale\": \"<short reason>\"}}]}}\n\
             Leave out items the instruction excludes."
        ),
        BatchOperation::Classify => format!(
            "You are classifying a batch of {n} items.\n\n\
             INSTRUCTION: {instruction}\n\n\
             ITEMS:\n{listing}\n\
             Assign exactly one category to every item. Return only a JSON object of the form:\n\
             {{\"classifications\": [{{\"id\": \"<ID exactly as listed>\", \"{field}\": \"<category>\"}}]}}",
            field = settings.category_field
        ),
        BatchOperation::Count | BatchOperation::Aggregate => format!(
            "Grouping a batch of {n} items by `{group}`.\n\n\
             INSTRUCTION: {instruction}\n\n\
             ITEMS:\n{listing}",
            group = settings.group_field
        ),
    }
}
