// Vigil Project Assistant Engine
// Main entry point for the vigil binary

use clap::Parser;
use std::sync::Arc;
use vigil_engine::agent::AgentEngine;
use vigil_engine::cli::{Cli, Command};
use vigil_engine::config::Config;
use vigil_engine::planner::openai::OpenAiBackend;
use vigil_engine::queue::TaskQueue;
use vigil_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Basic telemetry first, before config is loaded
    init_telemetry();
    tracing::info!("Vigil Engine v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Init { project_root } => {
            let config = Config::load_or_create(&project_root)?;
            println!(
                "Initialized vigil configuration at {}",
                config.core.project_root.join(".vigil/config.toml").display()
            );
            Ok(())
        }

        Command::Run { project_root } => {
            let config = Config::load_or_create(&project_root)?;

            // Re-initialize telemetry with the configured log level
            // (only takes effect if RUST_LOG env var is not set)
            let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
            init_telemetry_with_level(level);

            let backend = Arc::new(OpenAiBackend::from_config(&config.planner)?);
            let engine = Arc::new(AgentEngine::new(config, backend)?);

            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("shutdown signal received");
                    let _ = shutdown_tx.send(true);
                }
            });

            engine.run(shutdown_rx).await
        }

        Command::Status { project_root } => {
            let config = Config::load_or_create(&project_root)?;
            let queue_path = config.runtime_dir().join("queue.json");
            let stats = TaskQueue::stats_from_file(&queue_path)?;

            println!("Task queue ({})", queue_path.display());
            println!("  pending:   {}", stats.pending);
            println!("  leased:    {}", stats.leased);
            println!("  running:   {}", stats.running);
            println!("  retrying:  {}", stats.retrying);
            println!("  succeeded: {}", stats.succeeded);
            println!("  failed:    {}", stats.failed);
            Ok(())
        }
    }
}
