//! Research Crew - command line entry point
//!
//! `run` researches one topic in the foreground, `serve` exposes the HTTP/WebSocket API,
//! `preflight` checks the inference backend and storage, and `config` validates configuration.

use clap::{Parser, Subcommand};
use research_crew::agent::LlmAgentExecutor;
use research_crew::config::CrewConfig;
use research_crew::llm::providers::factory::create_provider;
use research_crew::observability::init_default_logging;
use research_crew::orchestrator::ResearchOrchestrator;
use research_crew::pipeline::{DocumentRef, RunStatus, SequentialExecutor, StageCatalog};
use research_crew::preflight::{HealthCheckManager, LlmProviderHealthCheck, StorageHealthCheck};
use research_crew::progress::ProgressBroadcaster;
use research_crew::registry::RunRegistry;
use research_crew::storage::JsonFileStore;
use research_crew::tools::{PlainTextExtractor, SerperSearch};
use research_crew::transport::{serve, ApiState};
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Topic research pipeline with live progress
#[derive(Parser)]
#[command(name = "research-crew")]
#[command(about = "Research a topic through a sequence of LLM-backed stages")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Research one topic and print the final report
    Run {
        /// Topic to research; prompted for when omitted
        #[arg(short, long)]
        topic: Option<String>,

        /// Document to include (repeatable)
        #[arg(short, long = "document", value_name = "PATH")]
        documents: Vec<PathBuf>,
    },
    /// Serve the HTTP and WebSocket API
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Check the inference backend and storage directories
    Preflight,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { topic, documents } => run_once(config, topic, documents).await,
        Commands::Serve { port } => run_server(config, port).await,
        Commands::Preflight => run_preflight(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    match result {
        Ok(0) => {}
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("Command failed: {}", e);
            process::exit(1);
        }
    }
}

fn load_configuration(config_path: Option<&Path>) -> Result<CrewConfig, BoxError> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(CrewConfig::load_from_file(path)?);
    }

    for path_str in ["research-crew.toml", "config/research-crew.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(CrewConfig::load_from_file(&path)?);
        }
    }

    info!("No configuration file found, using built-in defaults");
    let config = CrewConfig::default();
    config.validate()?;
    Ok(config)
}

/// Wire collaborators from configuration into an orchestrator
async fn build_orchestrator(
    config: &CrewConfig,
) -> Result<(Arc<ResearchOrchestrator>, HealthCheckManager), BoxError> {
    let provider = create_provider(config)?;
    let catalog = Arc::new(StageCatalog::new(
        &config.pipeline.writing_style,
        &config.pipeline.writing_length,
    ));

    let broadcaster = Arc::new(ProgressBroadcaster::new());
    let registry = Arc::new(RunRegistry::new(
        broadcaster.clone(),
        config.pipeline.max_retained_runs,
    ));

    let agent = LlmAgentExecutor::new(provider.clone(), catalog.clone(), config.llm.clone());
    let extractor = PlainTextExtractor::new(config.documents.max_chars_per_document);
    let mut executor = SequentialExecutor::new(
        catalog,
        Arc::new(agent),
        Arc::new(extractor),
        broadcaster,
        config.pipeline.stage_timeout(),
    );

    if let Some(section) = &config.search {
        match config.get_search_api_key() {
            Ok(Some(api_key)) => {
                let search = SerperSearch::from_config(section, api_key)?;
                executor = executor.with_search(Arc::new(search));
                info!("Web search enabled");
            }
            Ok(None) => {}
            Err(e) => warn!("Web search disabled: {}", e),
        }
    }

    let mut health = HealthCheckManager::new();
    health.add_health_check(Box::new(LlmProviderHealthCheck::new(provider)));
    health.add_health_check(Box::new(StorageHealthCheck::new(
        "uploads",
        config.server.upload_dir.clone(),
    )));

    if config.storage.enabled {
        match JsonFileStore::open(config.storage.dir.clone(), "extraction").await {
            Ok(store) => executor = executor.with_archive(Arc::new(store)),
            Err(e) => warn!("Extraction archive disabled: {}", e),
        }
        health.add_health_check(Box::new(StorageHealthCheck::new(
            "archive",
            config.storage.dir.clone(),
        )));
    }

    let orchestrator = Arc::new(ResearchOrchestrator::new(registry, Arc::new(executor)));
    Ok((orchestrator, health))
}

fn prompt(message: &str) -> io::Result<String> {
    print!("{message}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Ask for document paths until an empty line, skipping files that do not exist
fn prompt_documents() -> io::Result<Vec<PathBuf>> {
    let answer = prompt("Do you want to process documents? (y/n): ")?;
    if !answer.eq_ignore_ascii_case("y") && !answer.eq_ignore_ascii_case("yes") {
        return Ok(Vec::new());
    }

    println!("Enter document paths, one per line (empty line to finish):");
    let mut paths = Vec::new();
    loop {
        let line = prompt("> ")?;
        if line.is_empty() {
            break;
        }
        let path = PathBuf::from(&line);
        if path.is_file() {
            paths.push(path);
        } else {
            println!("File not found: {line}");
        }
    }
    Ok(paths)
}

async fn run_once(
    config: CrewConfig,
    topic: Option<String>,
    documents: Vec<PathBuf>,
) -> Result<i32, BoxError> {
    let (topic, documents) = match topic {
        Some(topic) => (topic, documents),
        None => {
            let topic = prompt("Enter a topic to research: ")?;
            let documents = if documents.is_empty() {
                prompt_documents()?
            } else {
                documents
            };
            (topic, documents)
        }
    };

    let (orchestrator, _health) = build_orchestrator(&config).await?;
    let document_refs = documents.iter().map(DocumentRef::from_path).collect();

    let run_id = match orchestrator.submit(&topic, document_refs).await {
        Ok(run_id) => run_id,
        Err(e) => {
            eprintln!("{e}");
            return Ok(1);
        }
    };

    let broadcaster = orchestrator.registry().broadcaster();
    let mut subscription = broadcaster.subscribe(run_id).await?;
    while let Some(event) = subscription.receiver.recv().await {
        println!("{}", event.summary_line());
        if event.event_type.is_terminal() {
            break;
        }
    }
    broadcaster.detach(run_id, subscription.id).await;

    let run = orchestrator
        .registry()
        .snapshot(run_id)
        .await
        .ok_or_else(|| format!("run {run_id} disappeared before completion"))?;

    println!();
    println!("{}", run.final_output.as_deref().unwrap_or_default());

    Ok(if run.overall_status == RunStatus::Completed {
        0
    } else {
        1
    })
}

async fn run_server(mut config: CrewConfig, port: Option<u16>) -> Result<i32, BoxError> {
    if let Some(port) = port {
        config.server.port = port;
    }

    let (orchestrator, health) = build_orchestrator(&config).await?;
    let state = ApiState::new(orchestrator, Arc::new(health), config.server.upload_dir.clone());
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
    };

    serve(state, addr, shutdown).await?;
    Ok(0)
}

async fn run_preflight(config: CrewConfig) -> Result<i32, BoxError> {
    let (_orchestrator, health) = build_orchestrator(&config).await?;
    let (healthy, results) = health.calculate_overall_health().await;

    for result in &results {
        let mark = if result.healthy { "ok" } else { "FAIL" };
        println!(
            "[{mark}] {}: {}",
            result.component,
            result.message.as_deref().unwrap_or_default()
        );
    }

    Ok(if healthy { 0 } else { 1 })
}

fn handle_config_command(config: CrewConfig, show: bool) -> Result<i32, BoxError> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(0)
}
