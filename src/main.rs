//! graph-analyst CLI: plan-based question answering over a JSON graph document.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};

use graph_analyst::batch::{BatchOperation, MicroBatchExecutor};
use graph_analyst::config::AnalystConfig;
use graph_analyst::error::LlmError;
use graph_analyst::graph::{GraphBackend, GraphDocument, MemoryGraph, Record, SparqlGraph};
use graph_analyst::llm::{OllamaClient, ReasoningService, ScriptedService};
use graph_analyst::observe::{EventSink, JsonSink, TracingSink};
use graph_analyst::retriever::AnalyticalRetriever;
use graph_analyst::state::{ContextStore, StateStore};

#[derive(Parser)]
#[command(name = "graph-analyst", version, about = "Analytical question answering over knowledge graphs")]
struct Cli {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Graph document (JSON with "nodes" and "edges").
    #[arg(long, global = true)]
    graph: Option<PathBuf>,

    /// Graph backend to load the document into.
    #[arg(long, global = true, value_enum, default_value_t = BackendChoice::Memory)]
    backend: BackendChoice,

    /// How pipeline events are reported.
    #[arg(long, global = true, value_enum, default_value_t = EventFormat::Text)]
    events: EventFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendChoice {
    Memory,
    Sparql,
}

#[derive(Clone, Copy, ValueEnum)]
enum EventFormat {
    /// Log lines through `tracing`.
    Text,
    /// Newline-delimited JSON on stderr.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the graph schema as JSON.
    Schema,

    /// Plan a question without executing it.
    Plan {
        /// The question.
        query: String,
    },

    /// Retrieve the execution context for a question and print it as JSON.
    Context {
        /// The question.
        query: String,
    },

    /// Answer a question.
    Ask {
        /// The question.
        query: String,
    },

    /// Run a micro-batch operation over a JSON array of items.
    Batch {
        /// JSON file holding an array of item objects.
        #[arg(long)]
        items: PathBuf,

        /// transform (alias process), classify, count or aggregate.
        #[arg(long)]
        operation: String,

        /// Instruction passed to the reasoning service.
        #[arg(long, default_value = "")]
        instruction: String,

        /// Fixed batch size. Probed against the token ceiling when omitted.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Store the merged items under this variable name.
        #[arg(long)]
        target: Option<String>,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AnalystConfig::load(path)?,
        None => AnalystConfig::default(),
    };
    let sink: Arc<dyn EventSink> = match cli.events {
        EventFormat::Text => Arc::new(TracingSink),
        EventFormat::Json => Arc::new(JsonSink::stderr()),
    };

    match cli.command {
        Commands::Schema => {
            let backend = load_backend(cli.backend, cli.graph.as_deref(), &config)?;
            let retriever = AnalyticalRetriever::new(backend, Arc::new(ScriptedService::new()), config)
                .with_sink(sink);
            print_json(&retriever.schema())?;
        }

        Commands::Plan { query } => {
            let backend = load_backend(cli.backend, cli.graph.as_deref(), &config)?;
            let reasoning = connect(&config, true)?;
            let retriever = AnalyticalRetriever::new(backend, reasoning, config).with_sink(sink);
            let outcome = retriever.plan(&query);
            if let Some(reason) = &outcome.fallback_reason {
                eprintln!("Planner fell back to a basic search: {reason}");
            }
            print_json(&outcome.steps)?;
        }

        Commands::Context { query } => {
            let backend = load_backend(cli.backend, cli.graph.as_deref(), &config)?;
            let reasoning = connect(&config, true)?;
            let retriever = AnalyticalRetriever::new(backend, reasoning, config).with_sink(sink);
            print_json(&retriever.get_context(&query))?;
        }

        Commands::Ask { query } => {
            let backend = load_backend(cli.backend, cli.graph.as_deref(), &config)?;
            let reasoning = connect(&config, true)?;
            let retriever = AnalyticalRetriever::new(backend, reasoning, config).with_sink(sink);
            let context = retriever.get_context(&query);
            let summary = &context.execution_summary;
            eprintln!(
                "Executed {} steps ({} succeeded, {} failed)",
                summary.total_steps, summary.successful_steps, summary.failed_steps
            );
            for answer in retriever.get_completion(&query, Some(&context)) {
                println!("{answer}");
            }
        }

        Commands::Batch {
            items,
            operation,
            instruction,
            batch_size,
            target,
        } => {
            let operation = BatchOperation::parse(&operation)?;
            let content = std::fs::read_to_string(&items).into_diagnostic()?;
            let records: Vec<Record> = serde_json::from_str(&content).into_diagnostic()?;

            let reasoning = connect(&config, operation.calls_reasoning())?;
            let context = ContextStore::new();
            let state = StateStore::from_dir(config.state_dir.as_deref())?;
            let executor = MicroBatchExecutor::new(
                reasoning.as_ref(),
                &config.batch,
                sink.as_ref(),
                &context,
                &state,
            );
            let result = executor.run(
                &records,
                operation,
                &instruction,
                batch_size,
                target.as_deref(),
            )?;
            print_json(&result)?;
            if let Some(name) = &result.stored_as {
                eprintln!("Stored {} items as \"{name}\"", result.items.len());
            }
        }
    }

    Ok(())
}

/// Load the graph document into the chosen backend.
fn load_backend(
    choice: BackendChoice,
    graph: Option<&Path>,
    config: &AnalystConfig,
) -> Result<Arc<dyn GraphBackend>> {
    let document = match graph {
        Some(path) => Some(GraphDocument::read(path)?),
        None => None,
    };

    match choice {
        BackendChoice::Memory => {
            let Some(document) = document else {
                miette::bail!("the in-memory backend needs a graph document (--graph <FILE>)");
            };
            let graph = MemoryGraph::from_document(&document);
            tracing::info!(
                nodes = graph.node_count(),
                relationships = graph.relationship_count(),
                "loaded graph document"
            );
            Ok(Arc::new(graph))
        }
        BackendChoice::Sparql => {
            let namespace = &config.sparql.namespace;
            let graph = match &config.sparql.store_path {
                Some(path) => SparqlGraph::open(path, namespace)?,
                None => SparqlGraph::in_memory(namespace)?,
            };
            match document {
                Some(document) => {
                    let (nodes, relationships) = graph.load_document(&document)?;
                    tracing::info!(nodes, relationships, %namespace, "loaded graph document");
                }
                None if config.sparql.store_path.is_none() => {
                    miette::bail!(
                        "an in-memory SPARQL store starts empty; pass --graph <FILE> or set sparql.store_path"
                    );
                }
                None => {}
            }
            Ok(Arc::new(graph))
        }
    }
}

/// Connect to the reasoning service when the command needs it.
fn connect(config: &AnalystConfig, needed: bool) -> Result<Arc<dyn ReasoningService>> {
    if !needed {
        return Ok(Arc::new(ScriptedService::new()));
    }
    let mut client = OllamaClient::new(config.llm.to_ollama());
    if !client.probe() {
        return Err(LlmError::Unavailable {
            url: config.llm.base_url.clone(),
        }
        .into());
    }
    if !client.has_model() {
        tracing::warn!(model = client.model(), "model not found locally; requests may fail");
    }
    Ok(Arc::new(client))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{json}");
    Ok(())
}
