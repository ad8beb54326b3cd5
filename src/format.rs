//! Context formatter: renders an [`ExecutionContext`] into the text digest the
//! answer synthesizer reads.
//!
//! Output is deterministic (steps in step-number order) and bounded: each step
//! shows counts plus a capped sample of names, paths or items, never full data.

use serde_json::Value;

use crate::config::FormatterSettings;
use crate::execute::{ExecutionContext, StepResult};
use crate::graph::{Record, NODE_KEY, SOURCE_KEY, TARGET_KEY};
use crate::process::{row_signature, StepOutput};

/// Render the whole context.
pub fn format_context(context: &ExecutionContext, settings: &FormatterSettings) -> String {
    let mut out = format!("Query: {}\n\n", context.original_query);
    if let Some(error) = &context.error {
        out.push_str(&format!("Retrieval failed: {error}\n"));
        return out;
    }
    for step in context.steps.values() {
        out.push_str(&format_step(step, settings));
        out.push('\n');
    }
    out
}

fn format_step(step: &StepResult, settings: &FormatterSettings) -> String {
    let mut out = format!("Step {}: {}", step.step_number, step.description);
    if !step.depends_on.is_empty() {
        let deps: Vec<String> = step.depends_on.iter().map(u32::to_string).collect();
        out.push_str(&format!(" (uses results of steps {})", deps.join(", ")));
    }

    match (step.result(), step.error()) {
        (Some(result), _) => {
            out.push('\n');
            out.push_str(&summarize(result, settings));
        }
        (None, error) => {
            out.push_str(&format!(" (FAILED: {})\n", error.unwrap_or("unknown error")));
        }
    }
    out
}

/// A short typed summary of one processed result.
pub fn summarize(output: &StepOutput, settings: &FormatterSettings) -> String {
    match output {
        StepOutput::EntityList { entities, count } => {
            let names: Vec<String> = entities.iter().filter_map(display_name).collect();
            let mut out = format!("Count: {count}\n");
            if names.is_empty() {
                out.push_str(&format!("Found {count} entities (names not available)\n"));
            } else {
                out.push_str(&format!(
                    "Entities ({}): {}\n",
                    names.len(),
                    capped_list(&names, settings.max_names)
                ));
            }
            out
        }
        StepOutput::RelationshipAnalysis {
            relationship_types,
            total_relationships,
            ..
        } => {
            let kinds: Vec<String> = relationship_types
                .iter()
                .map(|(kind, rows)| format!("{kind} ({})", rows.len()))
                .collect();
            let mut out = format!("Relationships: {total_relationships}\n");
            if !kinds.is_empty() {
                out.push_str(&format!("Types: {}\n", capped_list(&kinds, settings.max_items)));
            }
            out
        }
        StepOutput::CoauthorshipNetwork {
            authors,
            author_count,
            coauthorship_count,
            author_links,
            ..
        } => format!(
            "Authors found: {}\nTotal authors: {author_count}\nCo-authorship relationships: {coauthorship_count}\nLinks between found authors: {author_links}\n",
            capped_list(authors, settings.max_names)
        ),
        StepOutput::Aggregation {
            counts,
            total_items,
            ..
        } => {
            let mut out = format!("Items: {total_items}\n");
            if !counts.is_empty() {
                let sums: Vec<String> = counts.iter().map(|(k, v)| format!("{k}={v}")).collect();
                out.push_str(&format!("Counts: {}\n", capped_list(&sums, settings.max_items)));
            }
            out
        }
        StepOutput::PatternDiscovery {
            pattern_frequencies,
            total_patterns,
            ..
        } => {
            let mut out = format!(
                "Rows: {total_patterns}, distinct patterns: {}\n",
                pattern_frequencies.len()
            );
            let mut ranked: Vec<(&String, &usize)> = pattern_frequencies.iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
            for (signature, frequency) in ranked.into_iter().take(settings.max_items) {
                out.push_str(&format!(
                    "  - {frequency}x {}\n",
                    truncate(signature, settings.max_blob_chars)
                ));
            }
            out
        }
        StepOutput::Passthrough { rows } => summarize_rows(rows, settings),
    }
}

fn summarize_rows(rows: &[Record], settings: &FormatterSettings) -> String {
    if rows.first().is_some_and(|row| row.contains_key("path")) {
        let mut out = format!("Found {} paths between nodes:\n", rows.len());
        for (i, row) in rows.iter().take(settings.max_paths).enumerate() {
            let source = row.get(SOURCE_KEY).map(plain).unwrap_or_else(|| "unknown".into());
            let target = row.get(TARGET_KEY).map(plain).unwrap_or_else(|| "unknown".into());
            let length = row.get("path_length").and_then(Value::as_u64).unwrap_or(0);
            out.push_str(&format!("  Path {}: {source} -> {target} (length: {length})\n", i + 1));
            let via: Vec<String> = row
                .get("intermediate_nodes")
                .and_then(Value::as_array)
                .map(|nodes| nodes.iter().map(plain).collect())
                .unwrap_or_default();
            if !via.is_empty() {
                out.push_str(&format!("    Via: {}\n", via.join(", ")));
            }
        }
        return out;
    }

    let mut out = format!("Results: {} items found\n", rows.len());
    for row in rows.iter().take(settings.max_items) {
        let line = match display_name(row) {
            Some(name) => name,
            None => truncate(&row_signature(row), settings.max_blob_chars),
        };
        out.push_str(&format!("  - {line}\n"));
    }
    out
}

fn display_name(row: &Record) -> Option<String> {
    [NODE_KEY, "name"]
        .iter()
        .filter_map(|key| row.get(*key))
        .map(plain)
        .find(|name| !name.is_empty())
}

/// A value as bare text: strings without JSON quotes, everything else as JSON.
fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn capped_list(items: &[String], cap: usize) -> String {
    let mut out = items.iter().take(cap).cloned().collect::<Vec<_>>().join(", ");
    if items.len() > cap {
        out.push_str(&format!(" (and {} more)", items.len() - cap));
    }
    out
}

/// Cut to `max` characters, marking the cut.
fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
