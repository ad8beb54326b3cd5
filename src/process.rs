//! Result processors: pure transforms from raw step rows to typed results,
//! keyed by the step's expected output type.
//!
//! Processors never fail. Output types without a processor (including
//! `text_extraction` and anything unrecognized) pass the rows through.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::{Record, NODE_KEY, RELATIONSHIP_KIND_KEY, SOURCE_KEY, TARGET_KEY};
use crate::identity;
use crate::plan::OutputType;

/// Description keywords that mark an entity as an author.
const AUTHOR_KEYWORDS: &[&str] = &[
    "author",
    "researcher",
    "affiliated with",
    "professor",
    "dr.",
    "phd",
];

/// A processed step result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "processing_type", rename_all = "snake_case")]
pub enum StepOutput {
    EntityList {
        entities: Vec<Record>,
        count: usize,
    },
    RelationshipAnalysis {
        relationships: Vec<Record>,
        /// Relationship kind → rows of that kind.
        relationship_types: BTreeMap<String, Vec<Record>>,
        total_relationships: usize,
    },
    CoauthorshipNetwork {
        /// Deduplicated author names, first spelling seen wins.
        authors: Vec<String>,
        coauthorships: Vec<Record>,
        author_count: usize,
        coauthorship_count: usize,
        /// Relationships whose endpoints are both known authors.
        author_links: usize,
    },
    Aggregation {
        aggregated_data: Vec<Record>,
        /// Sum of every numeric field whose name contains "count".
        counts: BTreeMap<String, f64>,
        total_items: usize,
    },
    PatternDiscovery {
        patterns: Vec<Record>,
        /// Row signature → number of identical rows.
        pattern_frequencies: BTreeMap<String, usize>,
        total_patterns: usize,
    },
    Passthrough {
        rows: Vec<Record>,
    },
}

impl StepOutput {
    pub fn processing_type(&self) -> &'static str {
        match self {
            StepOutput::EntityList { .. } => "entity_list",
            StepOutput::RelationshipAnalysis { .. } => "relationship_analysis",
            StepOutput::CoauthorshipNetwork { .. } => "coauthorship_network",
            StepOutput::Aggregation { .. } => "aggregation",
            StepOutput::PatternDiscovery { .. } => "pattern_discovery",
            StepOutput::Passthrough { .. } => "passthrough",
        }
    }
}

/// Process raw rows according to the expected output type.
pub fn process(output_type: &OutputType, rows: Vec<Record>) -> StepOutput {
    match output_type {
        OutputType::EntityList => entity_list(rows),
        OutputType::RelationshipAnalysis => relationship_analysis(rows),
        OutputType::CoauthorshipNetwork => coauthorship_network(rows),
        OutputType::Aggregation => aggregation(rows),
        OutputType::PatternDiscovery => pattern_discovery(rows),
        OutputType::TextExtraction | OutputType::Unrecognized(_) => StepOutput::Passthrough { rows },
    }
}

fn entity_list(rows: Vec<Record>) -> StepOutput {
    StepOutput::EntityList {
        count: rows.len(),
        entities: rows,
    }
}

fn relationship_kind(row: &Record) -> String {
    [RELATIONSHIP_KIND_KEY, "relationship"]
        .iter()
        .filter_map(|key| row.get(*key).and_then(Value::as_str))
        .map(identity::strip_quotes)
        .find(|kind| !kind.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

fn relationship_analysis(rows: Vec<Record>) -> StepOutput {
    let mut relationship_types: BTreeMap<String, Vec<Record>> = BTreeMap::new();
    for row in &rows {
        relationship_types
            .entry(relationship_kind(row))
            .or_default()
            .push(row.clone());
    }
    StepOutput::RelationshipAnalysis {
        total_relationships: rows.len(),
        relationships: rows,
        relationship_types,
    }
}

/// Heuristic author test: an author keyword in the description, or a name
/// shaped like a person's ("Firstname Lastname").
pub fn is_author(name: &str, description: &str) -> bool {
    let description = description.to_lowercase();
    if AUTHOR_KEYWORDS.iter().any(|k| description.contains(k)) {
        return true;
    }
    name.contains(' ')
        && name.chars().next().is_some_and(char::is_uppercase)
        && name.split_whitespace().count() >= 2
}

fn is_relationship_row(row: &Record) -> bool {
    row.contains_key(SOURCE_KEY) && row.contains_key(TARGET_KEY)
}

fn coauthorship_network(rows: Vec<Record>) -> StepOutput {
    let mut authors = Vec::new();
    let mut author_ids = HashSet::new();
    let mut coauthorships = Vec::new();

    for row in rows {
        // A row naming a node is an entity even when it also carries endpoints.
        if !row.contains_key(NODE_KEY) && is_relationship_row(&row) {
            coauthorships.push(row);
            continue;
        }
        let Some(name) = [NODE_KEY, "name"]
            .iter()
            .filter_map(|key| row.get(*key).and_then(identity::value_as_id))
            .map(|raw| identity::strip_quotes(&raw).to_string())
            .find(|name| !name.is_empty())
        else {
            continue;
        };
        let description = row.get("description").and_then(Value::as_str).unwrap_or("");
        if is_author(&name, description) && author_ids.insert(identity::normalize(&name)) {
            authors.push(name);
        }
    }

    let endpoint_is_author = |row: &Record, key: &str| {
        row.get(key)
            .and_then(identity::value_as_id)
            .is_some_and(|id| author_ids.contains(&identity::normalize(&id)))
    };
    let author_links = coauthorships
        .iter()
        .filter(|row| endpoint_is_author(row, SOURCE_KEY) && endpoint_is_author(row, TARGET_KEY))
        .count();

    StepOutput::CoauthorshipNetwork {
        author_count: authors.len(),
        coauthorship_count: coauthorships.len(),
        authors,
        coauthorships,
        author_links,
    }
}

fn aggregation(rows: Vec<Record>) -> StepOutput {
    let mut counts: BTreeMap<String, f64> = BTreeMap::new();
    for row in &rows {
        for (key, value) in row {
            if !key.to_lowercase().contains("count") {
                continue;
            }
            if let Some(n) = value.as_f64() {
                *counts.entry(key.clone()).or_insert(0.0) += n;
            }
        }
    }
    StepOutput::Aggregation {
        total_items: rows.len(),
        aggregated_data: rows,
        counts,
    }
}

/// A row's full signature: its key/value pairs in key order.
pub fn row_signature(row: &Record) -> String {
    let mut pairs: Vec<(&String, &Value)> = row.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(";")
}

fn pattern_discovery(rows: Vec<Record>) -> StepOutput {
    let mut pattern_frequencies: BTreeMap<String, usize> = BTreeMap::new();
    for row in &rows {
        *pattern_frequencies.entry(row_signature(row)).or_default() += 1;
    }
    StepOutput::PatternDiscovery {
        total_patterns: rows.len(),
        patterns: rows,
        pattern_frequencies,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rows(value: Value) -> Vec<Record> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn entity_list_counts_rows() {
        let out = process(
            &OutputType::EntityList,
            rows(json!([{"node": "a"}, {"node": "b"}])),
        );
        match out {
            StepOutput::EntityList { entities, count } => {
                assert_eq!(count, 2);
                assert_eq!(entities[1]["node"], json!("b"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn relationship_analysis_groups_by_kind() {
        let out = process(
            &OutputType::RelationshipAnalysis,
            rows(json!([
                {"source": "a", "target": "b", "relationship_name": "cites"},
                {"source": "b", "target": "c", "relationship_name": "\"cites\""},
                {"source": "c", "target": "d"}
            ])),
        );
        let StepOutput::RelationshipAnalysis {
            relationship_types,
            total_relationships,
            ..
        } = out
        else {
            panic!("wrong variant");
        };
        assert_eq!(total_relationships, 3);
        assert_eq!(relationship_types["cites"].len(), 2);
        assert_eq!(relationship_types["unknown"].len(), 1);
    }

    #[test]
    fn coauthorship_scenario() {
        let out = process(
            &OutputType::CoauthorshipNetwork,
            rows(json!([
                {"node": "Jane Doe", "entity_type": "Entity", "description": "author of the survey"},
                {"source": "Jane Doe", "target": "John Roe"}
            ])),
        );
        let StepOutput::CoauthorshipNetwork {
            authors,
            coauthorships,
            author_count,
            coauthorship_count,
            author_links,
        } = out
        else {
            panic!("wrong variant");
        };
        assert_eq!(authors, vec!["Jane Doe".to_string()]);
        assert_eq!(coauthorships.len(), 1);
        assert_eq!(author_count, 1);
        assert_eq!(coauthorship_count, 1);
        // John Roe never appeared as an entity row.
        assert_eq!(author_links, 0);
    }

    #[test]
    fn coauthorship_reads_node_rows_before_endpoints() {
        let out = process(
            &OutputType::CoauthorshipNetwork,
            rows(json!([
                {"node": "Jane Doe", "source": "crawl", "target": "index", "description": "author"},
                {"source": "Jane Doe", "target": "John Roe"}
            ])),
        );
        let StepOutput::CoauthorshipNetwork {
            authors,
            coauthorship_count,
            ..
        } = out
        else {
            panic!("wrong variant");
        };
        assert_eq!(authors, vec!["Jane Doe".to_string()]);
        assert_eq!(coauthorship_count, 1);
    }

    #[test]
    fn coauthorship_dedups_authors_by_identity() {
        let out = process(
            &OutputType::CoauthorshipNetwork,
            rows(json!([
                {"node": "\"Jane Doe\""},
                {"node": "jane doe", "description": "Researcher"},
                {"node": "John Roe"},
                {"node": "protein", "description": "a cytokine"},
                {"source": "JANE DOE", "target": "\"John Roe\""}
            ])),
        );
        let StepOutput::CoauthorshipNetwork {
            authors,
            author_links,
            ..
        } = out
        else {
            panic!("wrong variant");
        };
        assert_eq!(authors, vec!["Jane Doe".to_string(), "John Roe".to_string()]);
        assert_eq!(author_links, 1);
    }

    #[test]
    fn author_heuristic() {
        assert!(is_author("x", "Affiliated with MIT"));
        assert!(is_author("x", "Dr. Smith's lab"));
        assert!(is_author("Ada Lovelace", ""));
        assert!(!is_author("ada lovelace", ""));
        assert!(!is_author("IL-6", "a cytokine"));
    }

    #[test]
    fn aggregation_sums_count_fields() {
        let out = process(
            &OutputType::Aggregation,
            rows(json!([
                {"paper_count": 2, "Count": 1.5, "name": "a", "counted": "no"},
                {"paper_count": 3, "other": 7}
            ])),
        );
        let StepOutput::Aggregation {
            counts,
            total_items,
            ..
        } = out
        else {
            panic!("wrong variant");
        };
        assert_eq!(total_items, 2);
        assert_eq!(counts["paper_count"], 5.0);
        assert_eq!(counts["Count"], 1.5);
        assert!(!counts.contains_key("counted"));
        assert!(!counts.contains_key("other"));
    }

    #[test]
    fn pattern_discovery_counts_exact_duplicates() {
        let out = process(
            &OutputType::PatternDiscovery,
            rows(json!([
                {"a": 1, "b": "x"},
                {"b": "x", "a": 1},
                {"a": 2}
            ])),
        );
        let StepOutput::PatternDiscovery {
            pattern_frequencies,
            total_patterns,
            ..
        } = out
        else {
            panic!("wrong variant");
        };
        assert_eq!(total_patterns, 3);
        assert_eq!(pattern_frequencies.len(), 2);
        assert_eq!(pattern_frequencies["a=1;b=\"x\""], 2);
    }

    #[test]
    fn unknown_and_text_types_pass_through() {
        let raw = rows(json!([{"anything": true}]));
        for ty in [OutputType::TextExtraction, OutputType::Unrecognized("timeline".into())] {
            assert_eq!(
                process(&ty, raw.clone()),
                StepOutput::Passthrough { rows: raw.clone() }
            );
        }
    }

    #[test]
    fn output_serializes_processing_type_tag() {
        let json = serde_json::to_value(process(&OutputType::EntityList, vec![])).unwrap();
        assert_eq!(json["processing_type"], "entity_list");
        assert_eq!(json["count"], 0);
    }
}
