//! Managed graph backend: an oxigraph store queried with SPARQL.
//!
//! Each backend instance is scoped to one namespace, stored as a named graph.
//! Nodes and relationships are resources typed `Node` / `Relationship`; every
//! property is a literal under the `prop/` vocabulary. An ordinal per resource
//! keeps iteration in insertion order.

use std::sync::atomic::{AtomicU64, Ordering};

use oxigraph::model::vocab::{rdf, xsd};
use oxigraph::model::{GraphName, Literal, NamedNode, Quad, Term};
use oxigraph::sparql::QueryResults;
use oxigraph::store::Store;
use serde_json::Value;

use crate::error::GraphError;

use super::schema::{NodeKindSummary, RelationshipKindSummary, SchemaSummary, UNKNOWN_KIND};
use super::{
    BackendKind, GraphBackend, GraphDocument, GraphNode, GraphRelationship, GraphResult, Record,
    KIND_KEY, NODE_KEY, RELATIONSHIP_KIND_KEY, SOURCE_KEY, TARGET_KEY,
};

/// IRI namespace for graph-analyst resources.
pub const VOCAB_NS: &str = "https://graph-analyst.dev/";

/// Placeholder substituted with the namespace graph IRI in pattern queries.
pub const GRAPH_PLACEHOLDER: &str = "{graph}";

fn sparql_error(what: &str, e: impl std::fmt::Display) -> GraphError {
    GraphError::Sparql {
        message: format!("{what}: {e}"),
    }
}

fn vocab(term: &str) -> String {
    format!("{VOCAB_NS}{term}")
}

fn named(iri: String) -> GraphResult<NamedNode> {
    NamedNode::new(iri).map_err(|e| sparql_error("invalid IRI", e))
}

/// SPARQL-backed graph scoped to a namespace.
pub struct SparqlGraph {
    store: Store,
    namespace: String,
    graph: NamedNode,
    /// Next ordinal handed to a new node or relationship.
    next_ordinal: AtomicU64,
}

impl SparqlGraph {
    /// Create an in-memory store (no persistence).
    pub fn in_memory(namespace: &str) -> GraphResult<Self> {
        let store = Store::new().map_err(|e| sparql_error("failed to create oxigraph store", e))?;
        Self::with_store(store, namespace)
    }

    /// Open or create a persistent store at the given path.
    pub fn open(path: &std::path::Path, namespace: &str) -> GraphResult<Self> {
        std::fs::create_dir_all(path).map_err(|e| GraphError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let store = Store::open(path).map_err(|e| {
            sparql_error(&format!("failed to open oxigraph store at {}", path.display()), e)
        })?;
        Self::with_store(store, namespace)
    }

    fn with_store(store: Store, namespace: &str) -> GraphResult<Self> {
        let graph = named(vocab(&format!("graph/{}", encode_id(namespace))))?;
        let backend = Self {
            store,
            namespace: namespace.to_string(),
            graph,
            next_ordinal: AtomicU64::new(0),
        };
        let existing = backend.count(&format!(
            "SELECT (COUNT(?o) AS ?count) WHERE {{ GRAPH {g} {{ ?r <{ord}> ?o }} }}",
            g = backend.graph_ref(),
            ord = vocab("ordinal"),
        ))?;
        backend.next_ordinal.store(existing as u64, Ordering::Relaxed);
        Ok(backend)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The namespace graph IRI in angle brackets, ready to splice into SPARQL.
    pub fn graph_ref(&self) -> String {
        format!("<{}>", self.graph.as_str())
    }

    fn node_iri(id: &str) -> GraphResult<NamedNode> {
        named(vocab(&format!("node/{}", encode_id(id))))
    }

    fn insert(&self, subject: &NamedNode, predicate: NamedNode, object: impl Into<Term>) -> GraphResult<()> {
        let quad = Quad::new(
            subject.clone(),
            predicate,
            object,
            GraphName::NamedNode(self.graph.clone()),
        );
        self.store
            .insert(&quad)
            .map_err(|e| sparql_error("insert failed", e))?;
        Ok(())
    }

    fn ordinal(&self) -> u64 {
        self.next_ordinal.fetch_add(1, Ordering::Relaxed)
    }

    fn set_properties(&self, subject: &NamedNode, properties: &Record) -> GraphResult<()> {
        for (key, value) in properties {
            let predicate = named(vocab(&format!("prop/{}", encode_id(key))))?;
            let clear = format!(
                "DELETE WHERE {{ GRAPH {g} {{ <{s}> <{p}> ?v }} }}",
                g = self.graph_ref(),
                s = subject.as_str(),
                p = predicate.as_str(),
            );
            self.store
                .update(clear.as_str())
                .map_err(|e| sparql_error("property update failed", e))?;
            self.insert(subject, predicate, value_to_literal(value))?;
        }
        Ok(())
    }

    /// Insert a node, merging properties into an existing node with the same id.
    pub fn add_node(&self, node: &GraphNode) -> GraphResult<()> {
        let subject = Self::node_iri(&node.id)?;
        let node_type = named(vocab("Node"))?;
        let typed = Quad::new(
            subject.clone(),
            rdf::TYPE,
            node_type.clone(),
            GraphName::NamedNode(self.graph.clone()),
        );
        let exists = self
            .store
            .contains(&typed)
            .map_err(|e| sparql_error("lookup failed", e))?;
        if !exists {
            self.insert(&subject, rdf::TYPE.into(), node_type)?;
            self.insert(&subject, named(vocab("id"))?, Literal::new_simple_literal(&node.id))?;
            self.insert(&subject, named(vocab("ordinal"))?, Literal::from(self.ordinal() as i64))?;
        }
        self.set_properties(&subject, &node.properties)
    }

    /// Insert a relationship, creating bare endpoint nodes if needed.
    pub fn add_relationship(&self, rel: &GraphRelationship) -> GraphResult<()> {
        self.add_node(&GraphNode::new(&rel.source))?;
        self.add_node(&GraphNode::new(&rel.target))?;

        let ordinal = self.ordinal();
        let subject = named(format!("{}/edge/{ordinal}", self.graph.as_str()))?;
        self.insert(&subject, rdf::TYPE.into(), named(vocab("Relationship"))?)?;
        self.insert(&subject, named(vocab("source"))?, Self::node_iri(&rel.source)?)?;
        self.insert(&subject, named(vocab("target"))?, Self::node_iri(&rel.target)?)?;
        self.insert(&subject, named(vocab("ordinal"))?, Literal::from(ordinal as i64))?;
        self.set_properties(&subject, &rel.properties)
    }

    /// Load every node and edge of a document. Returns (nodes, relationships) loaded.
    pub fn load_document(&self, doc: &GraphDocument) -> GraphResult<(usize, usize)> {
        let mut counts = (0, 0);
        for node in doc.graph_nodes() {
            self.add_node(&node)?;
            counts.0 += 1;
        }
        for rel in doc.graph_relationships() {
            self.add_relationship(&rel)?;
            counts.1 += 1;
        }
        Ok(counts)
    }

    /// Run a SPARQL query and convert solutions to records.
    pub fn select(&self, sparql: &str) -> GraphResult<Vec<Record>> {
        let results = self
            .store
            .query(sparql)
            .map_err(|e| sparql_error("SPARQL query failed", e))?;

        match results {
            QueryResults::Solutions(solutions) => {
                let mut rows = Vec::new();
                for solution in solutions {
                    let solution = solution.map_err(|e| sparql_error("solution error", e))?;
                    let row: Record = solution
                        .iter()
                        .map(|(var, term)| (var.as_str().to_string(), term_to_value(term)))
                        .collect();
                    rows.push(row);
                }
                Ok(rows)
            }
            QueryResults::Boolean(b) => Ok(vec![Record::from_iter([(
                "result".to_string(),
                Value::Bool(b),
            )])]),
            QueryResults::Graph(_) => Err(GraphError::Sparql {
                message: "CONSTRUCT/DESCRIBE queries are not supported; use SELECT or ASK".into(),
            }),
        }
    }

    fn count(&self, sparql: &str) -> GraphResult<usize> {
        let rows = self.select(sparql)?;
        Ok(rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }

    /// Collect `prop/` values into per-subject property maps, in ordinal order.
    fn grouped(&self, rows: Vec<Record>, key_var: &str) -> Vec<(String, Record, Record)> {
        let prop_prefix = vocab("prop/");
        let mut out: Vec<(String, Record, Record)> = Vec::new();
        for row in rows {
            let Some(subject) = row.get("r").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            if out.last().is_none_or(|(s, _, _)| *s != subject) {
                let mut fixed = Record::new();
                for var in [key_var, SOURCE_KEY, TARGET_KEY] {
                    if let Some(v) = row.get(var) {
                        fixed.insert(var.to_string(), v.clone());
                    }
                }
                out.push((subject.clone(), fixed, Record::new()));
            }
            let (Some(p), Some(v)) = (row.get("p").and_then(Value::as_str), row.get("v")) else {
                continue;
            };
            if let (Some(key), Some(last)) = (p.strip_prefix(&prop_prefix), out.last_mut()) {
                last.2.insert(decode_id(key), v.clone());
            }
        }
        out
    }
}

impl GraphBackend for SparqlGraph {
    fn kind(&self) -> BackendKind {
        BackendKind::Sparql
    }

    fn nodes(&self) -> GraphResult<Vec<GraphNode>> {
        let rows = self.select(&format!(
            "SELECT ?r ?node ?p ?v WHERE {{ GRAPH {g} {{ \
               ?r a <{node_type}> ; <{id}> ?node ; <{ord}> ?o . \
               OPTIONAL {{ ?r ?p ?v . FILTER(STRSTARTS(STR(?p), \"{prop}\")) }} \
             }} }} ORDER BY ?o",
            g = self.graph_ref(),
            node_type = vocab("Node"),
            id = vocab("id"),
            ord = vocab("ordinal"),
            prop = vocab("prop/"),
        ))?;

        Ok(self
            .grouped(rows, NODE_KEY)
            .into_iter()
            .filter_map(|(_, fixed, properties)| {
                let id = fixed.get(NODE_KEY)?.as_str()?.to_string();
                Some(GraphNode { id, properties })
            })
            .collect())
    }

    fn relationships(&self) -> GraphResult<Vec<GraphRelationship>> {
        let rows = self.select(&format!(
            "SELECT ?r ?source ?target ?p ?v WHERE {{ GRAPH {g} {{ \
               ?r a <{rel_type}> ; <{src}> ?sn ; <{tgt}> ?tn ; <{ord}> ?o . \
               ?sn <{id}> ?source . ?tn <{id}> ?target . \
               OPTIONAL {{ ?r ?p ?v . FILTER(STRSTARTS(STR(?p), \"{prop}\")) }} \
             }} }} ORDER BY ?o",
            g = self.graph_ref(),
            rel_type = vocab("Relationship"),
            src = vocab("source"),
            tgt = vocab("target"),
            ord = vocab("ordinal"),
            id = vocab("id"),
            prop = vocab("prop/"),
        ))?;

        Ok(self
            .grouped(rows, SOURCE_KEY)
            .into_iter()
            .filter_map(|(_, fixed, properties)| {
                Some(GraphRelationship {
                    source: fixed.get(SOURCE_KEY)?.as_str()?.to_string(),
                    target: fixed.get(TARGET_KEY)?.as_str()?.to_string(),
                    properties,
                })
            })
            .collect())
    }

    fn execute_pattern(&self, query: &str) -> GraphResult<Vec<Record>> {
        self.select(&query.replace(GRAPH_PLACEHOLDER, &self.graph_ref()))
    }

    fn describe_schema(&self) -> GraphResult<SchemaSummary> {
        let g = self.graph_ref();
        let node_type = vocab("Node");
        let kind_prop = vocab(&format!("prop/{KIND_KEY}"));
        let rel_kind_prop = vocab(&format!("prop/{RELATIONSHIP_KIND_KEY}"));
        let prop = vocab("prop/");

        let kind_counts = self.select(&format!(
            "SELECT ?k (COUNT(?n) AS ?count) WHERE {{ \
               GRAPH {g} {{ ?n a <{node_type}> . OPTIONAL {{ ?n <{kind_prop}> ?kind }} }} \
               BIND(COALESCE(STR(?kind), \"{UNKNOWN_KIND}\") AS ?k) \
             }} GROUP BY ?k"
        ))?;
        let kind_props = self.select(&format!(
            "SELECT DISTINCT ?k ?p WHERE {{ \
               GRAPH {g} {{ ?n a <{node_type}> ; ?p ?v . \
                 OPTIONAL {{ ?n <{kind_prop}> ?kind }} \
                 FILTER(STRSTARTS(STR(?p), \"{prop}\")) }} \
               BIND(COALESCE(STR(?kind), \"{UNKNOWN_KIND}\") AS ?k) \
             }}"
        ))?;
        let rel_counts = self.select(&format!(
            "SELECT ?k (COUNT(?r) AS ?count) WHERE {{ \
               GRAPH {g} {{ ?r a <{rel_type}> . OPTIONAL {{ ?r <{rel_kind_prop}> ?kind }} }} \
               BIND(COALESCE(STR(?kind), \"{UNKNOWN_KIND}\") AS ?k) \
             }} GROUP BY ?k",
            rel_type = vocab("Relationship"),
        ))?;

        // Kinds are compared after quote stripping, so merge groups that differ
        // only in quoting.
        let mut nodes: std::collections::BTreeMap<String, (usize, std::collections::BTreeSet<String>)> =
            Default::default();
        for row in &kind_counts {
            let kind = canonical_kind(row.get("k"));
            let count = row.get("count").and_then(Value::as_u64).unwrap_or(0) as usize;
            nodes.entry(kind).or_default().0 += count;
        }
        for row in &kind_props {
            let kind = canonical_kind(row.get("k"));
            if let Some(key) = row
                .get("p")
                .and_then(Value::as_str)
                .and_then(|p| p.strip_prefix(&prop))
            {
                nodes.entry(kind).or_default().1.insert(decode_id(key));
            }
        }

        let mut rels: std::collections::BTreeMap<String, usize> = Default::default();
        for row in &rel_counts {
            let count = row.get("count").and_then(Value::as_u64).unwrap_or(0) as usize;
            *rels.entry(canonical_kind(row.get("k"))).or_default() += count;
        }

        let total_nodes = nodes.values().map(|(count, _)| count).sum();
        let total_relationships = rels.values().sum();
        Ok(SchemaSummary {
            node_kinds: nodes
                .into_iter()
                .map(|(kind, (count, props))| NodeKindSummary {
                    kind,
                    count,
                    properties: props.into_iter().collect(),
                })
                .collect(),
            relationship_kinds: rels
                .into_iter()
                .map(|(kind, count)| RelationshipKindSummary { kind, count })
                .collect(),
            total_nodes,
            total_relationships,
        })
    }

    fn fallback_query(&self, limit: usize) -> String {
        format!(
            "SELECT ?node ?{KIND_KEY} ?description WHERE {{ GRAPH {g} {{ \
               ?r a <{node_type}> ; <{id}> ?node ; <{ord}> ?o . \
               OPTIONAL {{ ?r <{kind}> ?{KIND_KEY} }} \
               OPTIONAL {{ ?r <{desc}> ?description }} \
             }} }} ORDER BY ?o LIMIT {limit}",
            g = GRAPH_PLACEHOLDER,
            node_type = vocab("Node"),
            id = vocab("id"),
            ord = vocab("ordinal"),
            kind = vocab(&format!("prop/{KIND_KEY}")),
            desc = vocab("prop/description"),
        )
    }

    fn syntax_examples(&self) -> String {
        format!(
            "Pattern queries are SPARQL SELECT or ASK. Scope every pattern with \
             GRAPH {GRAPH_PLACEHOLDER} {{ ... }}; the placeholder is replaced with the namespace graph.\n\
             Vocabulary: nodes are `?x a <{node}>` with id `<{id}>`; relationships are \
             `?r a <{rel}>` with `<{src}>` and `<{tgt}>` pointing at nodes; every property is \
             `<{prop}NAME>`.\n\
             Bind the node id to ?node and relationship endpoint ids to ?source and ?target.\n\
             - Find people: PREFIX p: <{prop}> SELECT ?node ?description WHERE {{ GRAPH {GRAPH_PLACEHOLDER} \
             {{ ?x a <{node}> ; <{id}> ?node ; p:entity_type \"PERSON\" . OPTIONAL {{ ?x p:description ?description }} }} }}\n\
             - Find relationships: PREFIX p: <{prop}> SELECT ?source ?target ?relationship_name WHERE {{ \
             GRAPH {GRAPH_PLACEHOLDER} {{ ?r a <{rel}> ; <{src}> ?s ; <{tgt}> ?t . ?s <{id}> ?source . \
             ?t <{id}> ?target . OPTIONAL {{ ?r p:relationship_name ?relationship_name }} }} }}\n\
             - Count by kind: PREFIX p: <{prop}> SELECT ?entity_type (COUNT(?x) AS ?count) WHERE {{ \
             GRAPH {GRAPH_PLACEHOLDER} {{ ?x a <{node}> ; p:entity_type ?entity_type }} }} GROUP BY ?entity_type",
            node = vocab("Node"),
            rel = vocab("Relationship"),
            id = vocab("id"),
            src = vocab("source"),
            tgt = vocab("target"),
            prop = vocab("prop/"),
        )
    }
}

impl std::fmt::Debug for SparqlGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparqlGraph")
            .field("namespace", &self.namespace)
            .finish()
    }
}

fn canonical_kind(value: Option<&Value>) -> String {
    let kind = value
        .and_then(Value::as_str)
        .map(crate::identity::strip_quotes)
        .unwrap_or("");
    if kind.is_empty() {
        UNKNOWN_KIND.to_string()
    } else {
        kind.to_string()
    }
}

fn value_to_literal(value: &Value) -> Literal {
    match value {
        Value::String(s) => Literal::new_simple_literal(s),
        Value::Bool(b) => Literal::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Literal::from(i),
            None => Literal::from(n.as_f64().unwrap_or(0.0)),
        },
        other => Literal::new_simple_literal(other.to_string()),
    }
}

/// Convert an RDF term to JSON. Node IRIs become their ids; numeric and
/// boolean literals become JSON numbers and booleans.
fn term_to_value(term: &Term) -> Value {
    match term {
        Term::NamedNode(node) => {
            let iri = node.as_str();
            match iri.strip_prefix(&vocab("node/")) {
                Some(encoded) => Value::String(decode_id(encoded)),
                None => Value::String(iri.to_string()),
            }
        }
        Term::BlankNode(blank) => Value::String(blank.as_str().to_string()),
        Term::Literal(literal) => literal_to_value(literal),
        #[allow(unreachable_patterns)]
        other => Value::String(other.to_string()),
    }
}

fn literal_to_value(literal: &Literal) -> Value {
    let datatype = literal.datatype();
    let text = literal.value();
    let integer_types = [xsd::INTEGER, xsd::INT, xsd::LONG];
    if integer_types.contains(&datatype) {
        if let Ok(i) = text.parse::<i64>() {
            return Value::from(i);
        }
    }
    if [xsd::DECIMAL, xsd::DOUBLE, xsd::FLOAT].contains(&datatype) {
        if let Some(n) = text.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return Value::Number(n);
        }
    }
    if datatype == xsd::BOOLEAN {
        if let Ok(b) = text.parse::<bool>() {
            return Value::Bool(b);
        }
    }
    Value::String(text.to_string())
}

/// Percent-encode everything outside the IRI-unreserved set.
fn encode_id(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_id(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(b) = encoded
                .get(i + 1..i + 3)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
