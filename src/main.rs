use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chainhost::{AppConfig, NodeService};

#[derive(Parser)]
#[command(name = "chainhostd", about = "Blockchain node stack coordinator")]
struct Cli {
    /// Node data directory (overrides CHAINHOST_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Directory holding the stack's compose file
    #[arg(long, global = true)]
    stack_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coordinator daemon (monitor, sampler and uptime loops)
    Run {
        /// Start the node stack immediately
        #[arg(long)]
        start: bool,
    },
    /// Check host requirements, acquire the snapshot and mark initialized
    Setup,
    /// Report host requirement probes without changing anything
    Check,
    /// Start the node stack
    Start,
    /// Stop the node stack
    Stop,
    /// Restart the node stack
    Restart,
    /// Print the current node status
    Status {
        /// Include live engine and port probes
        #[arg(long)]
        detailed: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load().context("failed to load configuration")?;
    if let Some(dir) = cli.data_dir {
        config.paths.data_dir = dir;
    }
    if let Some(dir) = cli.stack_dir {
        config.paths.stack_dir = dir;
    }

    let service = NodeService::new(config).context("failed to build node service")?;

    match cli.command.unwrap_or(Command::Run { start: false }) {
        Command::Run { start } => run_daemon(service, start).await,
        Command::Setup => {
            service.initialize().await.context("setup failed")?;
            println!("setup complete");
            Ok(())
        }
        Command::Check => {
            let requirements = service.check_system_requirements().await;
            println!("{}", serde_json::to_string_pretty(&requirements)?);
            Ok(())
        }
        Command::Start => {
            let status = service.start_node().await.context("start failed")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Stop => {
            let status = service.stop_node().await.context("stop failed")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Restart => {
            let status = service.restart_node().await.context("restart failed")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Status { detailed } => {
            if detailed {
                let status = service.detailed_status().await;
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&service.node_status())?);
            }
            Ok(())
        }
    }
}

async fn run_daemon(service: NodeService, start: bool) -> Result<()> {
    service.spawn_background_tasks();
    tracing::info!("coordinator started");

    if start {
        let status = service.start_node().await.context("start failed")?;
        tracing::info!(phase = %status.phase, "node stack start requested");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    service.shutdown();
    Ok(())
}
