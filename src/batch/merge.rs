//! Reply parsing and reconciliation of reported items with source records.
//!
//! Every identity comparison here normalizes both sides (see
//! [`crate::identity`]); the reasoning service echoes identifiers with
//! whatever quoting and case it likes.

use std::collections::HashMap;

use serde_json::Value;

use crate::graph::Record;
use crate::identity::{id_from_keys, stable_id, strip_quotes};
use crate::llm::strip_code_fence;

use super::prompt::field;

/// Keys a reported item may carry its identifier under, in lookup order.
pub const REPORTED_ID_KEYS: &[&str] = &["id", "node", "name"];

/// Keys of a reported item that are never copied onto the original record.
pub const PROTECTED_KEYS: &[&str] = &["id", "node", "entity_id", "name", "reason", "rationale"];

/// Reply wrappers accepted for `transform`.
pub const TRANSFORM_WRAPPERS: &[&str] = &["processed_items", "included"];

/// Reply wrappers accepted for `classify`.
pub const CLASSIFY_WRAPPERS: &[&str] = &[
    "classifications",
    "classified_items",
    "processed_items",
    "items",
];

/// Group value used for records that lack the grouping field.
pub const MISSING_GROUP: &str = "unknown";

/// Strictly parse a reply as JSON, after removing a code fence.
pub fn parse_reply(reply: &str) -> Result<Value, String> {
    serde_json::from_str(strip_code_fence(reply)).map_err(|e| e.to_string())
}

/// The reported item list: a bare array, or the first wrapper key holding one.
/// Non-object entries are skipped.
pub fn reported_items(reply: Value, wrappers: &[&str]) -> Result<Vec<Record>, String> {
    let list = match reply {
        Value::Array(list) => list,
        Value::Object(mut map) => wrappers
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(list)) => Some(list),
                _ => None,
            })
            .ok_or_else(|| format!("reply has none of the keys {}", wrappers.join(", ")))?,
        other => return Err(format!("expected an object or array, got {other}")),
    };
    Ok(list
        .into_iter()
        .filter_map(|entry| match entry {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect())
}

/// Reported items for `transform`: a bare array or a [`TRANSFORM_WRAPPERS`] list.
pub fn transformed_items(reply: Value) -> Result<Vec<Record>, String> {
    reported_items(reply, TRANSFORM_WRAPPERS)
}

/// Reported items for `classify`. An object without any [`CLASSIFY_WRAPPERS`]
/// list reports nothing, so every item of the batch falls back to `unknown`.
pub fn classified_items(reply: Value) -> Result<Vec<Record>, String> {
    if let Value::Object(map) = &reply {
        let has_list = CLASSIFY_WRAPPERS
            .iter()
            .any(|key| map.get(*key).is_some_and(Value::is_array));
        if !has_list {
            tracing::debug!(stage = "batch", "classification reply had no item list");
            return Ok(Vec::new());
        }
    }
    reported_items(reply, CLASSIFY_WRAPPERS)
}

/// Index reported items by normalized identifier. The first report wins.
fn index_reported(reported: &[Record]) -> HashMap<String, &Record> {
    let mut index = HashMap::with_capacity(reported.len());
    for item in reported {
        if let Some(id) = id_from_keys(item, REPORTED_ID_KEYS) {
            index.entry(id).or_insert(item);
        }
    }
    index
}

/// Originals that were reported, in original order, with the reported
/// fields overlaid. Unreported originals are dropped.
pub fn reconcile(batch: &[Record], reported: &[Record]) -> Vec<Record> {
    let index = index_reported(reported);
    let matched: Vec<Record> = batch
        .iter()
        .filter_map(|original| {
            let report = index.get(&stable_id(original)?)?;
            let mut merged = original.clone();
            for (key, value) in report.iter() {
                if !PROTECTED_KEYS.contains(&key.as_str()) {
                    merged.insert(key.clone(), value.clone());
                }
            }
            Some(merged)
        })
        .collect();
    if matched.len() < index.len() {
        tracing::debug!(
            stage = "batch",
            reported = index.len(),
            matched = matched.len(),
            "some reported identifiers matched no item"
        );
    }
    matched
}

/// Every original with `category_field` set from the reply, or `unknown`.
pub fn overlay_categories(batch: &[Record], reported: &[Record], category_field: &str) -> Vec<Record> {
    let index = index_reported(reported);
    batch
        .iter()
        .map(|original| {
            let category = stable_id(original)
                .and_then(|id| index.get(&id).copied())
                .and_then(|report| report.get(category_field).or_else(|| report.get("category")))
                .filter(|value| !value.is_null())
                .cloned()
                .unwrap_or_else(|| Value::String(MISSING_GROUP.into()));
            let mut merged = original.clone();
            merged.insert(category_field.to_string(), category);
            merged
        })
        .collect()
}

fn group_key(record: &Record, group_field: &str) -> String {
    match field(record, group_field) {
        Some(Value::String(s)) if !strip_quotes(s).is_empty() => strip_quotes(s).to_string(),
        Some(Value::Null) | None => MISSING_GROUP.to_string(),
        Some(Value::String(_)) => MISSING_GROUP.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Group records by `group_field`, keeping first-seen order of keys.
fn group<'a>(batch: &'a [Record], group_field: &str) -> Vec<(String, Vec<&'a Record>)> {
    let mut groups: Vec<(String, Vec<&Record>)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for record in batch {
        let key = group_key(record, group_field);
        match positions.get(&key) {
            Some(&pos) => groups[pos].1.push(record),
            None => {
                positions.insert(key.clone(), groups.len());
                groups.push((key, vec![record]));
            }
        }
    }
    groups
}

/// One `{field_value, count}` record per distinct value.
pub fn count_by(batch: &[Record], group_field: &str) -> Vec<Record> {
    group(batch, group_field)
        .into_iter()
        .map(|(key, members)| {
            Record::from_iter([
                ("field_value".to_string(), Value::String(key)),
                ("count".to_string(), Value::from(members.len())),
            ])
        })
        .collect()
}

/// One `{group_key, count, items}` record per distinct value.
pub fn aggregate_by(batch: &[Record], group_field: &str) -> Vec<Record> {
    group(batch, group_field)
        .into_iter()
        .map(|(key, members)| {
            let count = members.len();
            let items = members.into_iter().cloned().map(Value::Object).collect();
            Record::from_iter([
                ("group_key".to_string(), Value::String(key)),
                ("count".to_string(), Value::from(count)),
                ("items".to_string(), Value::Array(items)),
            ])
        })
        .collect()
}
