//! A set of nodes started from one cluster configuration.

use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use crate::command::CommandOutcome;
use crate::config::ClusterConfig;
use crate::error::Result;
use crate::node::TestNode;

/// Outcome of stopping one node.
#[derive(Debug)]
pub struct StopReport {
    /// Node name.
    pub name: String,
    /// Result of the stop command.
    pub outcome: Result<CommandOutcome>,
}

impl StopReport {
    /// Whether the node acknowledged the stop.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.as_ref().is_ok_and(CommandOutcome::is_success)
    }
}

/// Running test network.
#[derive(Debug)]
pub struct TestNetwork {
    nodes: Vec<TestNode>,
}

impl TestNetwork {
    /// Start every configured node.
    ///
    /// If a node fails to start, the nodes already started are killed.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a node cannot be
    /// spawned.
    pub async fn start(config: &ClusterConfig) -> Result<Self> {
        config.validate()?;

        let mut nodes = Vec::with_capacity(config.nodes.len());
        for node_config in &config.nodes {
            match TestNode::start(node_config.clone(), &config.root_cmd) {
                Ok(node) => nodes.push(node),
                Err(e) => {
                    for node in &mut nodes {
                        if let Err(kill_err) = node.kill().await {
                            warn!("failed to kill node {}: {kill_err}", node.name());
                        }
                    }
                    return Err(e);
                }
            }
        }

        info!("test network running with {} nodes", nodes.len());
        Ok(Self { nodes })
    }

    /// Nodes in configuration order.
    #[must_use]
    pub fn nodes(&self) -> &[TestNode] {
        &self.nodes
    }

    /// Number of nodes whose process is still running.
    pub fn alive_count(&mut self) -> usize {
        self.nodes.iter_mut().filter_map(|node| node.is_alive().then_some(())).count()
    }

    /// Ask every node to stop, concurrently.
    pub async fn stop(&self) -> Vec<StopReport> {
        let reports = join_all(self.nodes.iter().map(|node| async move {
            StopReport {
                name: node.name().to_string(),
                outcome: node.stop().await,
            }
        }))
        .await;

        for report in &reports {
            match &report.outcome {
                Ok(CommandOutcome::Success { .. }) => {
                    info!("stopped node {} successfully", report.name);
                }
                Ok(CommandOutcome::Failure { stderr }) => {
                    warn!("error stopping node {}: {}", report.name, stderr.trim_end());
                }
                Err(e) => warn!("error stopping node {}: {e}", report.name),
            }
        }
        reports
    }

    /// Resolve once no node process is running, checking every `poll_interval`.
    pub async fn wait_for_shutdown(&mut self, poll_interval: Duration) {
        loop {
            let alive = self.alive_count();
            if alive == 0 {
                info!("all nodes stopped");
                return;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Force-terminate every node still running.
    ///
    /// # Errors
    ///
    /// Returns the first error hit while killing; the remaining nodes are
    /// still killed.
    pub async fn kill_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for node in &mut self.nodes {
            if let Err(e) = node.kill().await {
                warn!("failed to kill node {}: {e}", node.name());
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
