//! Graph store capability: two interchangeable backends behind one trait.
//!
//! - **In-memory layer** ([`MemoryGraph`]): a `petgraph` property graph; native
//!   queries run through the tagged-intent interpreter in [`intent`].
//! - **Managed layer** ([`SparqlGraph`]): an `oxigraph` store scoped to a
//!   namespace graph; native queries are SPARQL, passed through verbatim.
//!
//! Both expose node/relationship iteration with properties, so schema
//! introspection and traversal intents work against either.

pub mod intent;
pub mod memory;
pub mod schema;
pub mod sparql;

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GraphError;

pub use intent::{TraversalLimits, TraversalQuery};
pub use memory::MemoryGraph;
pub use schema::SchemaSummary;
pub use sparql::SparqlGraph;

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// A query result row or an item: property name → value.
pub type Record = serde_json::Map<String, Value>;

/// Property holding a node's kind tag.
pub const KIND_KEY: &str = "entity_type";

/// Property holding a relationship's kind tag.
pub const RELATIONSHIP_KIND_KEY: &str = "relationship_name";

/// Record key carrying a node's id in query results.
pub const NODE_KEY: &str = "node";

/// Record keys carrying relationship endpoints in query results.
pub const SOURCE_KEY: &str = "source";
pub const TARGET_KEY: &str = "target";

/// A node: unique id plus properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub properties: Record,
}

impl GraphNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: Record::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The node's kind tag with surrounding quotes stripped, if it has one.
    pub fn kind(&self) -> Option<&str> {
        self.properties
            .get(KIND_KEY)
            .and_then(Value::as_str)
            .map(crate::identity::strip_quotes)
            .filter(|k| !k.is_empty())
    }

    /// Flatten into a result record: `{"node": id, ...properties}`.
    pub fn to_record(&self) -> Record {
        let mut record = self.properties.clone();
        record.insert(NODE_KEY.into(), Value::String(self.id.clone()));
        record
    }
}

/// A directed relationship between two node ids, plus properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub source: String,
    pub target: String,
    pub properties: Record,
}

impl GraphRelationship {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            properties: Record::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The relationship's kind tag, if it has one.
    pub fn kind(&self) -> Option<&str> {
        self.properties
            .get(RELATIONSHIP_KIND_KEY)
            .and_then(Value::as_str)
            .map(crate::identity::strip_quotes)
            .filter(|k| !k.is_empty())
    }

    /// Flatten into a result record: `{"source": .., "target": .., ...properties}`.
    pub fn to_record(&self) -> Record {
        let mut record = self.properties.clone();
        record.insert(SOURCE_KEY.into(), Value::String(self.source.clone()));
        record.insert(TARGET_KEY.into(), Value::String(self.target.clone()));
        record
    }
}

/// Which backend implementation is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-memory property graph (petgraph).
    InMemory,
    /// Managed graph database reached through SPARQL (oxigraph).
    Sparql,
}

impl BackendKind {
    /// The `query_type` label the planner is told to use for native queries.
    pub fn native_query_label(self) -> &'static str {
        match self {
            BackendKind::InMemory => "petgraph",
            BackendKind::Sparql => "sparql",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::InMemory => write!(f, "in-memory"),
            BackendKind::Sparql => write!(f, "SPARQL"),
        }
    }
}

/// The capability set the engine needs from a graph store.
pub trait GraphBackend: Send + Sync {
    /// Which implementation this is.
    fn kind(&self) -> BackendKind;

    /// All nodes with their properties.
    fn nodes(&self) -> GraphResult<Vec<GraphNode>>;

    /// All relationships with their properties.
    fn relationships(&self) -> GraphResult<Vec<GraphRelationship>>;

    /// Run a declarative pattern query in the backend's own language.
    fn execute_pattern(&self, query: &str) -> GraphResult<Vec<Record>> {
        let _ = query;
        Err(GraphError::UnsupportedQuery {
            backend: self.kind().to_string(),
            query_type: "pattern-query".into(),
        })
    }

    /// Interpret a native traversal query over the node and relationship
    /// collections.
    fn traverse(&self, query: &str, limits: &TraversalLimits) -> GraphResult<Vec<Record>> {
        Ok(TraversalQuery::parse(query).run(&self.nodes()?, &self.relationships()?, limits))
    }

    /// Summarize node kinds, relationship kinds and totals.
    fn describe_schema(&self) -> GraphResult<SchemaSummary> {
        Ok(SchemaSummary::from_collections(
            &self.nodes()?,
            &self.relationships()?,
        ))
    }

    /// A query that returns everything up to `limit` rows, in the language
    /// [`Self::native_query_label`] names.
    fn fallback_query(&self, limit: usize) -> String;

    /// Syntax examples shown to the planner.
    fn syntax_examples(&self) -> String;
}

/// A graph serialized as JSON: `{"nodes": [...], "edges": [...]}`.
///
/// Every node object needs an `id`; every edge object needs `source` and
/// `target`. All other fields become properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub nodes: Vec<DocumentNode>,
    #[serde(default)]
    pub edges: Vec<DocumentEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentNode {
    pub id: String,
    #[serde(flatten)]
    pub properties: Record,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEdge {
    pub source: String,
    pub target: String,
    #[serde(flatten)]
    pub properties: Record,
}

impl GraphDocument {
    /// Parse a document from JSON text.
    pub fn from_json(text: &str) -> GraphResult<Self> {
        serde_json::from_str(text).map_err(|e| GraphError::Load {
            message: e.to_string(),
        })
    }

    /// Read and parse a document from a file.
    pub fn read(path: &Path) -> GraphResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| GraphError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&text)
    }

    pub fn graph_nodes(&self) -> impl Iterator<Item = GraphNode> + '_ {
        self.nodes.iter().map(|n| GraphNode {
            id: n.id.clone(),
            properties: n.properties.clone(),
        })
    }

    pub fn graph_relationships(&self) -> impl Iterator<Item = GraphRelationship> + '_ {
        self.edges.iter().map(|e| GraphRelationship {
            source: e.source.clone(),
            target: e.target.clone(),
            properties: e.properties.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn node_record_carries_id_under_node_key() {
        let node = GraphNode::new("Jane Doe").with_property(KIND_KEY, "PERSON");
        let record = node.to_record();
        assert_eq!(record["node"], json!("Jane Doe"));
        assert_eq!(record["entity_type"], json!("PERSON"));
    }

    #[test]
    fn kind_strips_quotes() {
        let node = GraphNode::new("x").with_property(KIND_KEY, "\"PERSON\"");
        assert_eq!(node.kind(), Some("PERSON"));
        assert_eq!(GraphNode::new("y").kind(), None);
    }

    #[test]
    fn relationship_record_carries_endpoints() {
        let rel = GraphRelationship::new("a", "b").with_property(RELATIONSHIP_KIND_KEY, "cites");
        let record = rel.to_record();
        assert_eq!(record["source"], json!("a"));
        assert_eq!(record["target"], json!("b"));
        assert_eq!(rel.kind(), Some("cites"));
    }

    #[test]
    fn document_parses_flattened_properties() {
        let doc = GraphDocument::from_json(
            r#"{"nodes": [{"id": "a", "entity_type": "PERSON", "age": 3}],
                "edges": [{"source": "a", "target": "b", "weight": 1.5}]}"#,
        )
        .unwrap();
        let nodes: Vec<_> = doc.graph_nodes().collect();
        assert_eq!(nodes[0].kind(), Some("PERSON"));
        assert_eq!(nodes[0].properties["age"], json!(3));
        let rels: Vec<_> = doc.graph_relationships().collect();
        assert_eq!(rels[0].properties["weight"], json!(1.5));
    }

    #[test]
    fn document_rejects_node_without_id() {
        let err = GraphDocument::from_json(r#"{"nodes": [{"name": "x"}]}"#).unwrap_err();
        assert!(matches!(err, GraphError::Load { .. }));
    }
}
