//! Rich diagnostic error types for graph-analyst.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains. Failures the pipeline
//! recovers from on its own (bad plans, failed steps, failed batches) never
//! reach these types; they are folded into the typed results instead.

use miette::Diagnostic;
use thiserror::Error;

pub use crate::llm::LlmError;

/// Top-level error type for graph-analyst.
#[derive(Debug, Error, Diagnostic)]
pub enum AnalystError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("SPARQL query error: {message}")]
    #[diagnostic(
        code(analyst::graph::sparql),
        help(
            "The SPARQL query failed. Check the query syntax and make sure it is \
             scoped to the namespace graph (use {{graph}} as a placeholder)."
        )
    )]
    Sparql { message: String },

    #[error("{backend} backend cannot run {query_type} queries")]
    #[diagnostic(
        code(analyst::graph::unsupported_query),
        help(
            "The in-memory graph only understands native traversal queries \
             (\"find nodes with entity_type=...\", \"find edges\", ...). \
             Switch to the SPARQL backend for pattern queries."
        )
    )]
    UnsupportedQuery { backend: String, query_type: String },

    #[error("failed to load graph document: {message}")]
    #[diagnostic(
        code(analyst::graph::load),
        help(
            "Graph documents are JSON objects with a \"nodes\" array of {{\"id\": ...}} \
             objects and an optional \"edges\" array of {{\"source\": ..., \"target\": ...}} objects."
        )
    )]
    Load { message: String },

    #[error("failed to read graph document {path}")]
    #[diagnostic(
        code(analyst::graph::io),
        help("Check that the file exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Micro-batch errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum BatchError {
    #[error("batch {batch} reply is not valid structured data: {message}")]
    #[diagnostic(
        code(analyst::batch::reply_parse),
        help(
            "The reasoning service must answer with a JSON object. \
             This batch contributes no items; the remaining batches still run."
        )
    )]
    ReplyParse { batch: usize, message: String },

    #[error("batch {batch} reasoning call failed: {message}")]
    #[diagnostic(
        code(analyst::batch::reasoning),
        help("Check that the reasoning service is reachable and the model is loaded.")
    )]
    Reasoning { batch: usize, message: String },

    #[error("unknown batch operation: {name}")]
    #[diagnostic(
        code(analyst::batch::unknown_operation),
        help("Valid operations are: transform (alias process), classify, count, aggregate.")
    )]
    UnknownOperation { name: String },
}

// ---------------------------------------------------------------------------
// State store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StateError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(analyst::state::io),
        help(
            "A filesystem operation failed. Check that the state directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(analyst::state::redb),
        help(
            "The embedded state database encountered a transaction error. \
             Try running with a fresh state directory."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(analyst::state::serde),
        help(
            "Failed to serialize or deserialize a stored variable. \
             The stored format may predate this version; clear the state directory."
        )
    )]
    Serialization { message: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(analyst::config::read),
        help("Ensure the config file exists and is valid TOML.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {path}")]
    #[diagnostic(
        code(analyst::config::parse),
        help("Check the TOML syntax in the config file. {message}")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(analyst::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(analyst::config::invalid),
        help("Check the AnalystConfig fields. {message}")
    )]
    Invalid { message: String },
}

/// Convenience alias for functions returning graph-analyst results.
pub type AnalystResult<T> = std::result::Result<T, AnalystError>;
