//! Schema introspection.
//!
//! Both backends report the same [`SchemaSummary`] shape, so the planner never
//! needs to know which one produced it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{GraphBackend, GraphNode, GraphRelationship};
use crate::observe::{AnalystEvent, EventSink};

/// Kind label used for nodes and relationships without a kind tag.
pub const UNKNOWN_KIND: &str = "unknown";

/// One node kind: how many nodes carry it and the union of their property names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeKindSummary {
    pub kind: String,
    pub count: usize,
    pub properties: Vec<String>,
}

/// One relationship kind and how often it occurs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipKindSummary {
    pub kind: String,
    pub count: usize,
}

/// What the planner is told about the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSummary {
    pub node_kinds: Vec<NodeKindSummary>,
    pub relationship_kinds: Vec<RelationshipKindSummary>,
    pub total_nodes: usize,
    pub total_relationships: usize,
}

impl SchemaSummary {
    /// Group nodes by kind tag (collecting the property-name union per group)
    /// and relationships by kind tag. Kinds are sorted by name.
    pub fn from_collections(nodes: &[GraphNode], relationships: &[GraphRelationship]) -> Self {
        let mut node_groups: BTreeMap<&str, (usize, BTreeSet<&str>)> = BTreeMap::new();
        for node in nodes {
            let entry = node_groups.entry(node.kind().unwrap_or(UNKNOWN_KIND)).or_default();
            entry.0 += 1;
            entry.1.extend(node.properties.keys().map(String::as_str));
        }

        let mut rel_groups: BTreeMap<&str, usize> = BTreeMap::new();
        for rel in relationships {
            *rel_groups.entry(rel.kind().unwrap_or(UNKNOWN_KIND)).or_default() += 1;
        }

        Self {
            node_kinds: node_groups
                .into_iter()
                .map(|(kind, (count, props))| NodeKindSummary {
                    kind: kind.to_string(),
                    count,
                    properties: props.into_iter().map(str::to_string).collect(),
                })
                .collect(),
            relationship_kinds: rel_groups
                .into_iter()
                .map(|(kind, count)| RelationshipKindSummary {
                    kind: kind.to_string(),
                    count,
                })
                .collect(),
            total_nodes: nodes.len(),
            total_relationships: relationships.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_nodes == 0 && self.total_relationships == 0
    }
}

/// Describe the backend's schema. Never fails: a backend error yields an
/// empty schema and a [`AnalystEvent::SchemaUnavailable`] warning.
pub fn describe_schema(backend: &dyn GraphBackend, sink: &dyn EventSink) -> SchemaSummary {
    match backend.describe_schema() {
        Ok(schema) => {
            sink.emit(&AnalystEvent::SchemaDescribed {
                node_kinds: schema.node_kinds.len(),
                relationship_kinds: schema.relationship_kinds.len(),
                total_nodes: schema.total_nodes,
                total_relationships: schema.total_relationships,
            });
            schema
        }
        Err(e) => {
            sink.emit(&AnalystEvent::SchemaUnavailable {
                error: e.to_string(),
            });
            SchemaSummary::default()
        }
    }
}
