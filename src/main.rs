//! Vigil - intent detection and override learning daemon
//!
//! `vigil serve` runs the socket transport and the learning pipeline;
//! `vigil hook <name>` is what editor hooks invoke.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{self, EnvFilter};
use vigil_core::{
    error::Result,
    hooks,
    service::{self, AdaptationReport},
    EventPipeline, EventQueue, IpcClient, IpcServer, LearnedPatternStore, VigilConfig,
};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Intent detection and override learning for coding assistants", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML); VIGIL__SECTION__FIELD variables override it
    #[arg(short, long, global = true, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the event socket and learning pipeline until interrupted
    Serve,

    /// Forward a hook payload from stdin to the daemon
    Hook {
        /// Hook name, used as the event type (e.g. post_tool_use)
        name: String,
    },

    /// Show pattern store statistics
    Status,

    /// List permanent-exception candidates and rule-adjustment suggestions
    Suggestions {
        /// Minimum pattern confidence
        #[arg(long, default_value_t = 0.85)]
        confidence: f64,

        /// Minimum number of applications
        #[arg(long, default_value_t = 10)]
        applications: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::new(format!(
        "vigil={level},vigil_core={level}",
        level = level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // stdout is reserved for hook replies
        .init();

    debug!("Vigil v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve => serve(cli.config).await,
        Commands::Hook { name } => hook(cli.config, &name).await,
        Commands::Status => status(cli.config),
        Commands::Suggestions {
            confidence,
            applications,
        } => suggestions(cli.config, confidence, applications),
    }
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let config = VigilConfig::load(config_path.as_deref())?;

    let queue = Arc::new(EventQueue::new(
        config.queue.capacity,
        config.queue.overflow_policy,
    ));
    let pipeline = EventPipeline::open(&config)?;
    let cancel = CancellationToken::new();

    let consumer = tokio::spawn(service::run(
        pipeline,
        queue.clone(),
        config.queue.poll_interval,
        config.learning.persist_interval,
        cancel.clone(),
    ));

    let server = IpcServer::bind_with_drain_timeout(
        &config.transport.socket_path,
        config.transport.max_frame_bytes,
        queue.clone(),
        config.transport.drain_timeout,
    )
    .await?;

    info!(
        "Vigil listening on {} (queue capacity {}, {:?})",
        server.socket_path().display(),
        config.queue.capacity,
        config.queue.overflow_policy
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Received shutdown signal, stopping gracefully...");

    // Stop the transport first so every acknowledged event is still consumed
    server.stop().await?;
    cancel.cancel();

    let pipeline = consumer.await.context("pipeline task failed")?;

    let metrics = queue.metrics();
    info!(
        "Shut down: {} events received, {} processed, {} dropped, {} patterns stored",
        metrics.received,
        metrics.processed,
        metrics.dropped,
        pipeline.store().len()
    );
    Ok(())
}

/// Always prints a status object and succeeds, whatever happens
async fn hook(config_path: Option<PathBuf>, name: &str) -> Result<()> {
    let config = VigilConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Using default configuration: {}", e);
        VigilConfig::default()
    });

    let mut input = String::new();
    let reply = match tokio::io::stdin().read_to_string(&mut input).await {
        Ok(_) => {
            let client = IpcClient::new(&config.transport.socket_path)
                .with_timeout(config.transport.client_timeout);
            hooks::handle_hook_input(name, &input, &client).await
        }
        Err(e) => json!({"status": "error", "error": format!("failed to read stdin: {}", e)}),
    };

    println!("{}", reply);
    Ok(())
}

fn status(config_path: Option<PathBuf>) -> Result<()> {
    let config = VigilConfig::load(config_path.as_deref())?;
    let store = LearnedPatternStore::open(config.learning.patterns_path(), &config.learning);

    let report = json!({
        "socket": {
            "path": config.transport.socket_path,
            "present": config.transport.socket_path.exists(),
        },
        "patterns": {
            "path": config.learning.patterns_path(),
            "count": store.len(),
            "stats": store.stats(),
        },
    });

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn suggestions(config_path: Option<PathBuf>, confidence: f64, applications: u32) -> Result<()> {
    let config = VigilConfig::load(config_path.as_deref())?;
    let store = LearnedPatternStore::open(config.learning.patterns_path(), &config.learning);
    let adaptations = AdaptationReport::load_or_default(&config.learning.adaptations_path());

    let report = json!({
        "permanent_exceptions": store.suggest_permanent_exceptions(confidence, applications),
        "rule_adjustments": adaptations.adjustments,
    });

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
