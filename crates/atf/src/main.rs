//! CLI to run a local test network.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ironfish_atf::{ClusterConfig, TestNetwork};
use tracing::{info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Cluster configuration file. The built-in three node network is used when omitted.
    #[arg(long, short, env = "IRONFISH_ATF_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Clone, Debug, Subcommand)]
enum Cmd {
    /// Start the test network and run until every node exits or Ctrl-C
    Start {
        /// Seconds between liveness checks
        #[arg(long, default_value_t = 5)]
        poll_secs: u64,
    },
    /// Stop the nodes of a test network
    Stop,
    /// Print the effective configuration
    Config,
}

fn load_config(path: Option<&PathBuf>) -> Result<ClusterConfig> {
    match path {
        Some(path) => ClusterConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(ClusterConfig::example()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    match args.command {
        Cmd::Start { poll_secs } => {
            let mut network = TestNetwork::start(&config).await?;
            info!("atf is running");

            tokio::select! {
                () = network.wait_for_shutdown(Duration::from_secs(poll_secs)) => {}
                result = tokio::signal::ctrl_c() => {
                    result.context("listening for Ctrl-C")?;
                    info!("Received interrupt signal");
                    network.stop().await;
                    let drained = tokio::time::timeout(
                        SHUTDOWN_GRACE,
                        network.wait_for_shutdown(Duration::from_secs(1)),
                    )
                    .await;
                    if drained.is_err() {
                        warn!("nodes still running after {SHUTDOWN_GRACE:?}, killing");
                        network.kill_all().await?;
                    }
                }
            }
            info!("stopping atf");
        }
        Cmd::Stop => {
            let outcomes = futures::future::join_all(config.nodes.iter().map(|node| {
                ironfish_atf::run_command(&config.root_cmd, node.stop_args())
            }))
            .await;

            for (node, outcome) in config.nodes.iter().zip(outcomes) {
                match outcome {
                    Ok(outcome) if outcome.is_success() => info!("stopped node {}", node.name),
                    Ok(outcome) => warn!("couldn't stop node {}: {outcome}", node.name),
                    Err(e) => warn!("couldn't stop node {}: {e}", node.name),
                }
            }
        }
        Cmd::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
