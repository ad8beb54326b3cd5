//! Native traversal queries for the in-memory backend.
//!
//! Not a query language: a query string is classified into one of a small set
//! of intents by ordered pattern checks, and each intent is a pure function
//! over the node and relationship collections. Unrecognized text degrades to
//! "all nodes"; interpretation never fails.

use std::collections::{HashMap, HashSet};

use petgraph::algo::all_simple_paths;
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{GraphNode, GraphRelationship, Record, SOURCE_KEY, TARGET_KEY};

/// Bounds applied while interpreting traversal queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalLimits {
    /// Longest path, in edges, that path enumeration will report.
    pub max_path_edges: usize,
    /// Candidate endpoints considered on each side of a path search.
    pub max_endpoints: usize,
}

impl Default for TraversalLimits {
    fn default() -> Self {
        Self {
            max_path_edges: 3,
            max_endpoints: 50,
        }
    }
}

/// What a traversal query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalIntent {
    /// Nodes whose kind is mentioned in the query (all nodes if none is).
    ByKind,
    /// Every relationship.
    AllEdges,
    /// Simple paths between nodes of the mentioned kinds.
    Paths,
    /// Direct relationships whose endpoints both have a mentioned kind.
    EdgesBetween,
    /// Everything else: all nodes.
    AllNodes,
}

impl TraversalIntent {
    /// Classify query text. Checks run in a fixed order; the first match wins.
    pub fn classify(text: &str) -> Self {
        let lower = text.to_lowercase();
        let between = lower.contains("edges between") || lower.contains("connections between");
        if lower.contains("entity_type") {
            TraversalIntent::ByKind
        } else if lower.contains("edges") && !between {
            TraversalIntent::AllEdges
        } else if lower.contains("path") {
            TraversalIntent::Paths
        } else if between {
            TraversalIntent::EdgesBetween
        } else {
            TraversalIntent::AllNodes
        }
    }
}

/// A parsed traversal query: intent, the text kinds are matched against, and
/// an optional trailing `limit N`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalQuery {
    pub intent: TraversalIntent,
    pub limit: Option<usize>,
    text: String,
}

impl TraversalQuery {
    pub fn parse(query: &str) -> Self {
        let (text, limit) = split_limit(query);
        Self {
            intent: TraversalIntent::classify(text),
            limit,
            text: text.to_string(),
        }
    }

    /// Kinds present on `nodes` that the query text mentions, in first-seen order.
    pub fn mentioned_kinds(&self, nodes: &[GraphNode]) -> Vec<String> {
        let tokens = kind_tokens(&self.text);
        let upper = self.text.to_uppercase();
        let mut seen = HashSet::new();
        nodes
            .iter()
            .filter_map(GraphNode::kind)
            .filter(|kind| seen.insert(kind.to_string()))
            .filter(|kind| mentions_kind(&tokens, &upper, kind))
            .map(str::to_string)
            .collect()
    }

    /// Run the query over the given collections.
    pub fn run(
        &self,
        nodes: &[GraphNode],
        relationships: &[GraphRelationship],
        limits: &TraversalLimits,
    ) -> Vec<Record> {
        let cap = self.limit.unwrap_or(usize::MAX);
        let mut rows = match self.intent {
            TraversalIntent::ByKind => {
                let kinds = self.mentioned_kinds(nodes);
                nodes_of_kinds(nodes, &kinds)
            }
            TraversalIntent::AllEdges => relationships.iter().map(GraphRelationship::to_record).collect(),
            TraversalIntent::Paths => {
                let kinds = self.kinds_or_all(nodes);
                paths_between(nodes, relationships, &kinds, limits, cap)
            }
            TraversalIntent::EdgesBetween => {
                let kinds = self.kinds_or_all(nodes);
                edges_between(nodes, relationships, &kinds)
            }
            TraversalIntent::AllNodes => nodes.iter().map(GraphNode::to_record).collect(),
        };
        rows.truncate(cap);
        rows
    }

    fn kinds_or_all(&self, nodes: &[GraphNode]) -> Vec<String> {
        let mentioned = self.mentioned_kinds(nodes);
        if !mentioned.is_empty() {
            return mentioned;
        }
        let mut seen = HashSet::new();
        nodes
            .iter()
            .filter_map(GraphNode::kind)
            .filter(|kind| seen.insert(kind.to_string()))
            .map(str::to_string)
            .collect()
    }
}

/// Split a trailing `limit N` off the query text.
fn split_limit(query: &str) -> (&str, Option<usize>) {
    let trimmed = query.trim();
    let mut words = trimmed.rsplitn(3, char::is_whitespace);
    let (Some(count), Some(keyword)) = (words.next(), words.next()) else {
        return (trimmed, None);
    };
    match (keyword.eq_ignore_ascii_case("limit"), count.parse::<usize>()) {
        (true, Ok(n)) => (words.next().unwrap_or("").trim_end(), Some(n)),
        _ => (trimmed, None),
    }
}

fn kind_tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
        .filter(|t| !t.is_empty())
        .map(str::to_uppercase)
        .collect()
}

/// A kind is mentioned when it appears as a whole token (optionally plural).
/// Multi-word kinds match as a substring.
fn mentions_kind(tokens: &HashSet<String>, upper_text: &str, kind: &str) -> bool {
    let kind = kind.to_uppercase();
    if kind.contains(char::is_whitespace) {
        return upper_text.contains(&kind);
    }
    tokens.contains(&kind) || tokens.contains(&format!("{kind}S"))
}

fn nodes_of_kinds(nodes: &[GraphNode], kinds: &[String]) -> Vec<Record> {
    nodes
        .iter()
        .filter(|n| kinds.is_empty() || n.kind().is_some_and(|k| kinds.iter().any(|m| m == k)))
        .map(GraphNode::to_record)
        .collect()
}

fn paths_between(
    nodes: &[GraphNode],
    relationships: &[GraphRelationship],
    kinds: &[String],
    limits: &TraversalLimits,
    cap: usize,
) -> Vec<Record> {
    if limits.max_path_edges == 0 {
        return Vec::new();
    }

    let mut graph: UnGraph<&str, ()> = UnGraph::new_undirected();
    let mut index: HashMap<&str, NodeIndex> = HashMap::with_capacity(nodes.len());
    for node in nodes {
        index.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
    }
    for rel in relationships {
        if let (Some(&a), Some(&b)) = (index.get(rel.source.as_str()), index.get(rel.target.as_str())) {
            graph.add_edge(a, b, ());
        }
    }

    let candidates: Vec<NodeIndex> = nodes
        .iter()
        .filter(|n| n.kind().is_some_and(|k| kinds.iter().any(|m| m == k)))
        .take(limits.max_endpoints)
        .filter_map(|n| index.get(n.id.as_str()).copied())
        .collect();

    let max_intermediate = limits.max_path_edges - 1;
    let mut rows = Vec::new();
    for &source in &candidates {
        for &target in &candidates {
            if source == target {
                continue;
            }
            let found = all_simple_paths::<Vec<NodeIndex>, _>(
                &graph,
                source,
                target,
                0,
                Some(max_intermediate),
            );
            for path in found {
                rows.push(path_record(&graph, &path));
                if rows.len() >= cap {
                    return rows;
                }
            }
        }
    }
    rows
}

fn path_record(graph: &UnGraph<&str, ()>, path: &[NodeIndex]) -> Record {
    let ids: Vec<Value> = path
        .iter()
        .map(|&idx| Value::String(graph[idx].to_string()))
        .collect();
    let intermediate = if ids.len() > 2 {
        ids[1..ids.len() - 1].to_vec()
    } else {
        Vec::new()
    };

    let mut record = Record::new();
    record.insert(SOURCE_KEY.into(), ids[0].clone());
    record.insert(TARGET_KEY.into(), ids[ids.len() - 1].clone());
    record.insert("path_length".into(), Value::from(ids.len() - 1));
    record.insert("intermediate_nodes".into(), Value::Array(intermediate));
    record.insert("path".into(), Value::Array(ids));
    record
}

fn edges_between(
    nodes: &[GraphNode],
    relationships: &[GraphRelationship],
    kinds: &[String],
) -> Vec<Record> {
    let kind_of: HashMap<&str, &str> = nodes
        .iter()
        .filter_map(|n| n.kind().map(|k| (n.id.as_str(), k)))
        .collect();
    let wanted = |id: &str| {
        kind_of
            .get(id)
            .filter(|k| kinds.iter().any(|m| m == **k))
            .copied()
    };

    relationships
        .iter()
        .filter_map(|rel| {
            let source_type = wanted(&rel.source)?;
            let target_type = wanted(&rel.target)?;
            let mut record = Record::new();
            record.insert(SOURCE_KEY.into(), Value::String(rel.source.clone()));
            record.insert(TARGET_KEY.into(), Value::String(rel.target.clone()));
            record.insert("source_type".into(), Value::String(source_type.into()));
            record.insert("target_type".into(), Value::String(target_type.into()));
            record.insert(
                "relationship".into(),
                Value::String(rel.kind().unwrap_or("unknown").into()),
            );
            record.extend(rel.properties.clone());
            Some(record)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::graph::{KIND_KEY, RELATIONSHIP_KIND_KEY};

    fn person(id: &str) -> GraphNode {
        GraphNode::new(id).with_property(KIND_KEY, "PERSON")
    }

    fn sample() -> (Vec<GraphNode>, Vec<GraphRelationship>) {
        let nodes = vec![
            person("Jane Doe"),
            person("John Roe"),
            GraphNode::new("Paper A").with_property(KIND_KEY, "\"DOCUMENT\""),
            GraphNode::new("Acme").with_property(KIND_KEY, "ORGANIZATION"),
        ];
        let rels = vec![
            GraphRelationship::new("Jane Doe", "Paper A").with_property(RELATIONSHIP_KIND_KEY, "wrote"),
            GraphRelationship::new("John Roe", "Paper A").with_property(RELATIONSHIP_KIND_KEY, "wrote"),
            GraphRelationship::new("Jane Doe", "Acme"),
        ];
        (nodes, rels)
    }

    fn run(query: &str) -> Vec<Record> {
        let (nodes, rels) = sample();
        TraversalQuery::parse(query).run(&nodes, &rels, &TraversalLimits::default())
    }

    #[test]
    fn classification_order() {
        use TraversalIntent::*;
        assert_eq!(TraversalIntent::classify("find nodes with entity_type=PERSON"), ByKind);
        assert_eq!(TraversalIntent::classify("find edges"), AllEdges);
        assert_eq!(TraversalIntent::classify("find paths between PERSON nodes"), Paths);
        assert_eq!(TraversalIntent::classify("find edges between PERSON nodes"), EdgesBetween);
        assert_eq!(TraversalIntent::classify("connections between PERSON and ORGANIZATION"), EdgesBetween);
        assert_eq!(TraversalIntent::classify("tell me everything"), AllNodes);
        assert_eq!(TraversalIntent::classify(""), AllNodes);
    }

    #[test]
    fn by_kind_filters_case_insensitively() {
        let rows = run("find nodes with entity_type=person");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r["entity_type"] == json!("PERSON")));
    }

    #[test]
    fn by_kind_matches_quoted_kind_tags() {
        let rows = run("find nodes with entity_type=DOCUMENT");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["node"], json!("Paper A"));
    }

    #[test]
    fn by_kind_without_known_kind_returns_all_nodes() {
        assert_eq!(run("find nodes with entity_type=PROTEIN").len(), 4);
    }

    #[test]
    fn all_edges_flattens_relationships() {
        let rows = run("find edges");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["source"], json!("Jane Doe"));
        assert_eq!(rows[0]["relationship_name"], json!("wrote"));
    }

    #[test]
    fn paths_are_undirected_and_bounded() {
        let rows = run("find paths between PERSON nodes");
        // Jane -> Paper A <- John, in both directions.
        assert_eq!(rows.len(), 2);
        let first = &rows[0];
        assert_eq!(first["path_length"], json!(2));
        assert_eq!(first["intermediate_nodes"], json!(["Paper A"]));
        assert_eq!(first["path"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn paths_respect_max_edges() {
        let (nodes, rels) = sample();
        let limits = TraversalLimits {
            max_path_edges: 1,
            ..Default::default()
        };
        let rows = TraversalQuery::parse("paths between PERSON nodes").run(&nodes, &rels, &limits);
        assert!(rows.is_empty());
    }

    #[test]
    fn edges_between_requires_both_kinds() {
        let rows = run("find edges between PERSON and ORGANIZATION");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["source_type"], json!("PERSON"));
        assert_eq!(rows[0]["target_type"], json!("ORGANIZATION"));
        assert_eq!(rows[0]["relationship"], json!("unknown"));
    }

    #[test]
    fn trailing_limit_caps_rows() {
        assert_eq!(run("all nodes limit 3").len(), 3);
        assert_eq!(run("find edges LIMIT 1").len(), 1);
        let parsed = TraversalQuery::parse("limit the search");
        assert_eq!(parsed.limit, None);
    }

    #[test]
    fn kind_inside_longer_word_is_not_a_mention() {
        let nodes = vec![GraphNode::new("e").with_property(KIND_KEY, "Entity")];
        let q = TraversalQuery::parse("find nodes with entity_type=PERSON");
        assert!(q.mentioned_kinds(&nodes).is_empty());
    }

    #[test]
    fn never_fails_on_empty_graph() {
        for query in ["find edges", "paths", "entity_type", "edges between", "???"] {
            let rows = TraversalQuery::parse(query).run(&[], &[], &TraversalLimits::default());
            assert!(rows.is_empty());
        }
    }
}
