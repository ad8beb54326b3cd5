//! Identity normalization for entity identifiers.
//!
//! The reasoning service echoes identifiers as free text, so `"\"Jane Doe\""`,
//! `'jane doe'` and `Jane Doe` must all compare equal to the identifier stored
//! in the graph. Every identity comparison in the crate goes through
//! [`normalize`] on both sides.

use serde_json::Value;

use crate::graph::Record;

/// Keys that may hold an item's stable id, in lookup order.
pub const STABLE_ID_KEYS: &[&str] = &["id", "node", "entity_id", "name"];

/// Key under which some record shapes nest their payload.
pub const NESTED_KEY: &str = "data";

/// Canonicalize an identifier: trim whitespace, strip surrounding quotes,
/// case-fold.
///
/// Idempotent: `normalize(&normalize(x)) == normalize(x)`.
pub fn normalize(raw: &str) -> String {
    strip_quotes(raw).to_lowercase()
}

/// Trim whitespace and any run of surrounding single or double quotes,
/// preserving case.
pub fn strip_quotes(raw: &str) -> &str {
    raw.trim().trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace())
}

/// Render a JSON value as an identifier string, if it can be one.
pub fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Extract the stable id of a record with quotes stripped and case kept.
///
/// Tries the top-level [`STABLE_ID_KEYS`] first, then the same keys nested one
/// level down under [`NESTED_KEY`]. Empty identifiers are ignored. This is the
/// identifier shown to the reasoning service, so it must resolve to the same
/// entity as [`stable_id`].
pub fn raw_stable_id(record: &Record) -> Option<String> {
    raw_id_from_keys(record, STABLE_ID_KEYS).or_else(|| {
        record
            .get(NESTED_KEY)
            .and_then(Value::as_object)
            .and_then(|nested| raw_id_from_keys(nested, STABLE_ID_KEYS))
    })
}

/// Extract the normalized stable id of a record: [`raw_stable_id`], normalized.
pub fn stable_id(record: &Record) -> Option<String> {
    raw_stable_id(record).map(|raw| normalize(&raw))
}

fn raw_id_from_keys(record: &Record, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| record.get(*key))
        .filter_map(value_as_id)
        .map(|raw| strip_quotes(&raw).to_string())
        .find(|id| !id.is_empty())
}

/// Extract the normalized id from the first present key in `keys`.
pub fn id_from_keys(record: &Record, keys: &[&str]) -> Option<String> {
    raw_id_from_keys(record, keys).map(|raw| normalize(&raw))
}

/// Whether two raw identifiers denote the same entity.
pub fn same_identity(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}
