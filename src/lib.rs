// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # graph-analyst
//!
//! Plan-based analytical question answering over knowledge graphs.
//!
//! A question goes through a fixed pipeline: the graph schema is summarized,
//! a reasoning service decomposes the question into query steps, each step
//! runs against the active graph backend, step results are processed into
//! typed summaries, and the summaries are formatted into a bounded digest
//! from which one final answer is synthesized.
//!
//! ## Architecture
//!
//! - **Backends** (`graph`): in-memory property graph (petgraph) or a managed
//!   store queried through SPARQL (oxigraph), behind one `GraphBackend` trait
//! - **Planning** (`plan`): reasoning-service plans parsed into closed enums,
//!   with a single-step fallback for unusable replies
//! - **Execution** (`execute`, `process`): per-step routing, failure isolation,
//!   typed result processors
//! - **Answering** (`format`, `answer`, `retriever`): digest and synthesis
//! - **Micro-batching** (`batch`, `state`): token-bounded batches over large
//!   item collections, merged and optionally stored as named variables
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use graph_analyst::config::AnalystConfig;
//! use graph_analyst::graph::{GraphNode, MemoryGraph, KIND_KEY};
//! use graph_analyst::llm::{OllamaClient, OllamaConfig};
//! use graph_analyst::retriever::AnalyticalRetriever;
//!
//! let graph = MemoryGraph::new();
//! graph.add_node(GraphNode::new("Jane Doe").with_property(KIND_KEY, "PERSON"));
//!
//! let llm = OllamaClient::new(OllamaConfig::default());
//! let retriever = AnalyticalRetriever::new(Arc::new(graph), Arc::new(llm), AnalystConfig::default());
//! let answer = retriever.get_completion("Who is in the graph?", None);
//! println!("{}", answer[0]);
//! ```

pub mod answer;
pub mod batch;
pub mod config;
pub mod error;
pub mod execute;
pub mod format;
pub mod graph;
pub mod identity;
pub mod llm;
pub mod observe;
pub mod plan;
pub mod process;
pub mod provenance;
pub mod retriever;
pub mod state;
