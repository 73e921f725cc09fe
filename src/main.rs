//! Binary entry point for marketsift.
//!
//! Reads inbound events as JSON lines and runs each through the signal
//! pipeline.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow prints in the main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use marketsift::analysis::{DeepAnalysis, SignalOrchestrator};
use marketsift::config::MarketsiftConfig;
use marketsift::dedup::{DedupService, HttpDedupStore, SignalDeduplicator};
use marketsift::embedding::{Embedder, HttpEmbedder, NoopEmbedder};
use marketsift::llm::create_provider;
use marketsift::memory::{HttpSearchBackend, LocalMemoryStore, MemoryService};
use marketsift::pipeline::{Pipeline, SignalSink, format_signal};
use marketsift::tools::{HttpJsonTool, ToolKind, ToolRegistry};
use marketsift::models::RawEvent;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Marketsift - real-time crypto news signal pipeline.
#[derive(Parser)]
#[command(name = "marketsift")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Process events from stdin, one JSON object per line.
    Run,

    /// Analyze a single event and print the outcome.
    Check {
        /// The event text.
        text: String,

        /// Source identifier.
        #[arg(short, long, default_value = "cli")]
        source: String,

        /// Channel name.
        #[arg(long, default_value = "manual")]
        channel: String,
    },
}

fn init_tracing(verbose: bool, json_logs: bool) {
    let default_filter = if verbose { "marketsift=debug,info" } else { "marketsift=info,warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Sink printing formatted signals to stdout.
struct StdoutSink;

#[async_trait::async_trait]
impl SignalSink for StdoutSink {
    async fn deliver(&self, formatted: &str) -> marketsift::Result<bool> {
        println!("{formatted}\n---");
        Ok(true)
    }
}

fn build_pipeline(config: &MarketsiftConfig) -> marketsift::Result<Pipeline> {
    let http = reqwest::Client::new();

    let mut dedup = DedupService::new(config.dedup.clone());
    if let Ok(url) = std::env::var("MARKETSIFT_DEDUP_STORE_URL") {
        let mut store = HttpDedupStore::new(url, http.clone());
        if let Ok(key) = std::env::var("MARKETSIFT_DEDUP_STORE_KEY") {
            store = store.with_api_key(key);
        }
        dedup = dedup.with_store(Arc::new(store));
    }

    let embedder: Arc<dyn Embedder> = match std::env::var("MARKETSIFT_EMBEDDING_URL") {
        Ok(url) => {
            let model = std::env::var("MARKETSIFT_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string());
            let mut embedder = HttpEmbedder::new(url, model, http.clone());
            if let Ok(key) = std::env::var("MARKETSIFT_EMBEDDING_KEY") {
                embedder = embedder.with_api_key(key);
            }
            Arc::new(embedder)
        },
        Err(_) => Arc::new(NoopEmbedder::new()),
    };

    let mut memory = MemoryService::new(config.memory.clone());
    if let Ok(url) = std::env::var("MARKETSIFT_MEMORY_PRIMARY_URL") {
        let mut backend = HttpSearchBackend::new(url, http.clone());
        if let Ok(key) = std::env::var("MARKETSIFT_MEMORY_PRIMARY_KEY") {
            backend = backend.with_api_key(key);
        }
        memory = memory.with_primary(Arc::new(backend));
    }
    if let Ok(url) = std::env::var("MARKETSIFT_MEMORY_SECONDARY_URL") {
        memory = memory.with_secondary(Arc::new(HttpSearchBackend::new(url, http.clone())));
    }
    if let Some(path) = &config.local_memory_path {
        memory = memory.with_local(Arc::new(LocalMemoryStore::open(path)?));
    }
    let memory = Arc::new(memory);

    let fast = create_provider(&config.llm.fast, config.llm.http, config.llm.retry)?;
    let deep_provider = create_provider(&config.llm.deep, config.llm.http, config.llm.retry)?;

    let mut tools = ToolRegistry::new(&config.tools);
    for kind in ToolKind::ALL {
        let var = format!("MARKETSIFT_TOOL_{}_URL", kind.as_str().to_uppercase());
        if let Ok(url) = std::env::var(&var) {
            tools = tools.with_tool(Arc::new(HttpJsonTool::new(kind, url, http.clone())));
        }
    }

    let deep = DeepAnalysis::new(
        deep_provider,
        Arc::new(tools),
        memory.clone(),
        config.analysis.clone(),
    );
    let orchestrator =
        SignalOrchestrator::new(fast, config.analysis.clone()).with_deep(Arc::new(deep));

    Ok(Pipeline::new(
        Arc::new(dedup),
        Arc::new(SignalDeduplicator::new(config.signal_dedup.clone())),
        memory,
        Arc::new(orchestrator),
        config.pipeline.clone(),
    )
    .with_embedder(embedder)
    .with_sink(Arc::new(StdoutSink)))
}

async fn run_stream(pipeline: &Pipeline) -> ExitCode {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                eprintln!("stdin read failed: {err}");
                break;
            },
        };
        if line.trim().is_empty() {
            continue;
        }
        let event: RawEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed event line");
                continue;
            },
        };
        let outcome = pipeline.process(&event).await;
        tracing::info!(
            status = outcome.status.as_str(),
            forwarded = outcome.forwarded,
            skip_reason = outcome.skip_reason.map(marketsift::pipeline::SkipReason::as_str),
            "event processed"
        );
    }

    match serde_json::to_string_pretty(&pipeline.stats()) {
        Ok(stats) => eprintln!("{stats}"),
        Err(err) => eprintln!("failed to render stats: {err}"),
    }
    ExitCode::SUCCESS
}

async fn run_check(pipeline: &Pipeline, text: String, source: String, channel: String) -> ExitCode {
    let event = RawEvent::new(source, channel, text, chrono::Utc::now());
    let outcome = pipeline.process(&event).await;
    println!("status: {}", outcome.status.as_str());
    if let Some(reason) = outcome.skip_reason {
        println!("skip_reason: {}", reason.as_str());
    }
    if let Some(signal) = &outcome.signal {
        println!("{}", format_signal(signal));
    }
    if outcome.status == marketsift::models::SignalStatus::Error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present; real environment wins.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let config = match &cli.config {
        Some(path) => match MarketsiftConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("failed to load config: {err}");
                return ExitCode::FAILURE;
            },
        },
        None => MarketsiftConfig::from_env(),
    };

    let pipeline = match build_pipeline(&config) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            eprintln!("failed to build pipeline: {err}");
            return ExitCode::FAILURE;
        },
    };

    match cli.command {
        Commands::Run => run_stream(&pipeline).await,
        Commands::Check {
            text,
            source,
            channel,
        } => run_check(&pipeline, text, source, channel).await,
    }
}
