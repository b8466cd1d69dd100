//! Process entry point for the Reasoning Orchestrator (C13): parses CLI
//! flags, loads configuration and the tool catalog, wires the Anthropic
//! provider and the MCP client pool into a `RuntimeController`, and drives
//! newline-delimited `TaskSpec` JSON from stdin until EOF or Ctrl-C.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use taskwright_core::catalog::Catalog;
use taskwright_core::config::OrchestratorConfig;
use taskwright_core::types::TaskSpec;
use taskwright_llm::anthropic::AnthropicProvider;
use taskwright_llm::LlmProvider;
use taskwright_mcp::McpClientPool;
use taskwright_runtime::RuntimeController;

#[derive(Parser)]
#[command(name = "taskwright", about = "Reasoning Orchestrator: drives LLM tool-use trajectories")]
struct Cli {
    /// Path to the orchestrator config TOML. Missing file falls back to defaults.
    #[arg(long, default_value = "taskwright.toml")]
    config: PathBuf,

    /// Path to the tool catalog TOML document; defaults to the config's `catalog_path`.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Override the config's trajectory output directory.
    #[arg(long)]
    trajectory_dir: Option<PathBuf>,

    /// Override the config's Session worker pool size.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Model name passed to the LLM provider on every request.
    #[arg(long, default_value = "claude-sonnet-4-20250514")]
    model: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read newline-delimited TaskSpec JSON from stdin, run each to completion.
    Run,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = OrchestratorConfig::load(&cli.config);
    if let Some(dir) = &cli.trajectory_dir {
        config.trajectory.output_dir = dir.to_string_lossy().to_string();
    }
    if let Some(n) = cli.concurrency {
        config.session.max_concurrent_sessions = n;
    }

    let catalog_path = cli
        .catalog
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.catalog_path));
    let catalog = Arc::new(Catalog::load(&catalog_path)?);

    let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
    let llm: Arc<dyn LlmProvider> = Arc::new(AnthropicProvider::new(api_key));

    let mcp_pool = Arc::new(McpClientPool::new(config.mcp.clone()));
    let reconnect_cancel = CancellationToken::new();
    for server in config.mcp.servers.keys().cloned() {
        tokio::spawn(McpClientPool::run_reconnect_loop(
            mcp_pool.clone(),
            server,
            reconnect_cancel.clone(),
        ));
    }

    match cli.command {
        Command::Run => {
            run_from_stdin(config, catalog, llm, cli.model, mcp_pool, reconnect_cancel).await?
        }
    }

    Ok(())
}

/// Feed the Runtime Controller from stdin: one `TaskSpec` JSON object per
/// line. EOF closes the intake channel; Ctrl-C begins graceful shutdown
/// without waiting for EOF.
async fn run_from_stdin(
    config: OrchestratorConfig,
    catalog: Arc<Catalog>,
    llm: Arc<dyn LlmProvider>,
    model: String,
    mcp_pool: Arc<McpClientPool>,
    reconnect_cancel: CancellationToken,
) -> anyhow::Result<()> {
    let controller = RuntimeController::new(config, catalog, llm, model, mcp_pool);

    let shutdown = controller.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c; beginning graceful shutdown");
            shutdown.cancel();
        }
    });

    let (tx, rx) = mpsc::channel(64);
    tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TaskSpec>(&line) {
                Ok(task) => {
                    if tx.blocking_send(task).is_err() {
                        break;
                    }
                }
                Err(e) => eprintln!("skipping invalid task spec: {}", e),
            }
        }
    });

    controller.run(rx).await;
    reconnect_cancel.cancel();
    Ok(())
}
