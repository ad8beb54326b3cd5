//! In-memory property graph.
//!
//! Uses `petgraph` for the graph structure and `DashMap` for id → node lookups.
//! Native queries are traversal intents interpreted by [`super::intent`].

use std::sync::RwLock;

use dashmap::DashMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use super::intent::{TraversalLimits, TraversalQuery};
use super::{BackendKind, GraphBackend, GraphNode, GraphRelationship, GraphResult, Record};

/// In-memory property graph backed by petgraph.
///
/// Node ids are unique; adding a node twice merges its properties.
/// Relationships are directed and may repeat between the same endpoints.
pub struct MemoryGraph {
    graph: RwLock<DiGraph<GraphNode, Record>>,
    /// Node id → NodeIndex for O(1) lookups.
    node_index: DashMap<String, NodeIndex>,
}

impl MemoryGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(DiGraph::new()),
            node_index: DashMap::new(),
        }
    }

    /// Build a graph from a parsed document.
    pub fn from_document(doc: &super::GraphDocument) -> Self {
        let graph = Self::new();
        for node in doc.graph_nodes() {
            graph.add_node(node);
        }
        for rel in doc.graph_relationships() {
            graph.add_relationship(rel);
        }
        graph
    }

    fn ensure_node(&self, id: &str) -> NodeIndex {
        if let Some(idx) = self.node_index.get(id) {
            return *idx.value();
        }
        let mut graph = self.graph.write().expect("graph lock poisoned");
        // Double-check after acquiring write lock
        if let Some(idx) = self.node_index.get(id) {
            return *idx.value();
        }
        let idx = graph.add_node(GraphNode::new(id));
        self.node_index.insert(id.to_string(), idx);
        idx
    }

    /// Insert a node, merging properties into an existing node with the same id.
    pub fn add_node(&self, node: GraphNode) {
        let idx = self.ensure_node(&node.id);
        let mut graph = self.graph.write().expect("graph lock poisoned");
        if let Some(existing) = graph.node_weight_mut(idx) {
            existing.properties.extend(node.properties);
        }
    }

    /// Insert a relationship, creating bare endpoint nodes if needed.
    pub fn add_relationship(&self, rel: GraphRelationship) {
        let source = self.ensure_node(&rel.source);
        let target = self.ensure_node(&rel.target);
        let mut graph = self.graph.write().expect("graph lock poisoned");
        graph.add_edge(source, target, rel.properties);
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<GraphNode> {
        let idx = *self.node_index.get(id)?.value();
        let graph = self.graph.read().expect("graph lock poisoned");
        graph.node_weight(idx).cloned()
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.node_index.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.node_index.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.graph.read().expect("graph lock poisoned").edge_count()
    }

    fn collect_relationships(graph: &DiGraph<GraphNode, Record>) -> Vec<GraphRelationship> {
        graph
            .edge_references()
            .filter_map(|e| {
                let source = graph.node_weight(e.source())?;
                let target = graph.node_weight(e.target())?;
                Some(GraphRelationship {
                    source: source.id.clone(),
                    target: target.id.clone(),
                    properties: e.weight().clone(),
                })
            })
            .collect()
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBackend for MemoryGraph {
    fn kind(&self) -> BackendKind {
        BackendKind::InMemory
    }

    fn nodes(&self) -> GraphResult<Vec<GraphNode>> {
        let graph = self.graph.read().expect("graph lock poisoned");
        Ok(graph.node_weights().cloned().collect())
    }

    fn relationships(&self) -> GraphResult<Vec<GraphRelationship>> {
        let graph = self.graph.read().expect("graph lock poisoned");
        Ok(Self::collect_relationships(&graph))
    }

    fn traverse(&self, query: &str, limits: &TraversalLimits) -> GraphResult<Vec<Record>> {
        // One read lock for both collections.
        let graph = self.graph.read().expect("graph lock poisoned");
        let nodes: Vec<GraphNode> = graph.node_weights().cloned().collect();
        let relationships = Self::collect_relationships(&graph);
        Ok(TraversalQuery::parse(query).run(&nodes, &relationships, limits))
    }

    fn fallback_query(&self, limit: usize) -> String {
        format!("all nodes limit {limit}")
    }

    fn syntax_examples(&self) -> String {
        [
            "Native traversal queries are short English intents:",
            "- \"find nodes with entity_type=PERSON\" (mention one or more kinds; none means all nodes)",
            "- \"find edges\" (every relationship)",
            "- \"find paths between PERSON and ORGANIZATION\" (undirected, at most 3 edges)",
            "- \"find edges between PERSON and ORGANIZATION\" (direct relationships between kinds)",
            "- \"all nodes\" (anything else returns all nodes)",
            "Append \"limit N\" to cap the number of returned rows.",
        ]
        .join("\n")
    }
}

impl std::fmt::Debug for MemoryGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGraph")
            .field("nodes", &self.node_count())
            .field("relationships", &self.relationship_count())
            .finish()
    }
}
