//! A single node process.

use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::command::{CommandOutcome, run_command};
use crate::config::TestNodeConfig;
use crate::error::{Error, Result};

/// A running node and the tasks forwarding its output.
#[derive(Debug)]
pub struct TestNode {
    config: TestNodeConfig,
    root_cmd: String,
    child: Child,
    output: TaskTracker,
}

impl TestNode {
    /// Spawn `root_cmd start ...` for `config`.
    ///
    /// Every line the node prints is logged, tagged with the node name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SpawnProcess`] if the node cannot be started.
    pub fn start(config: TestNodeConfig, root_cmd: &str) -> Result<Self> {
        let mut cmd = Command::new(root_cmd);
        cmd.args(config.start_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Spawning node: {:?}", cmd);
        let mut child = cmd.spawn().map_err(|source| Error::SpawnProcess {
            program: root_cmd.to_string(),
            source,
        })?;

        let output = TaskTracker::new();
        if let Some(stdout) = child.stdout.take() {
            let name = config.name.clone();
            output.spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(node = %name, "{line}");
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let name = config.name.clone();
            output.spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(node = %name, "stderr: {line}");
                }
            });
        }
        output.close();

        info!("started node: {}", config.name);
        Ok(Self {
            config,
            root_cmd: root_cmd.to_string(),
            child,
            output,
        })
    }

    /// Node name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Node configuration.
    #[must_use]
    pub const fn config(&self) -> &TestNodeConfig {
        &self.config
    }

    /// OS process id, while the process runs.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether the node process is still running.
    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!("node {} exited with {status}", self.config.name);
                false
            }
            Err(e) => {
                error!("failed to poll node {}: {e}", self.config.name);
                false
            }
        }
    }

    /// Ask the node to shut down with `root_cmd stop --datadir ...`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SpawnProcess`] if the stop command cannot be started.
    pub async fn stop(&self) -> Result<CommandOutcome> {
        info!("stopping node {}...", self.config.name);
        run_command(&self.root_cmd, self.config.stop_args()).await
    }

    /// Wait for the node process to exit and its output to drain.
    ///
    /// # Errors
    ///
    /// Returns an error if the process status cannot be collected.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| Error::Io("failed to wait for node", e))?;
        self.output.wait().await;
        Ok(status)
    }

    /// Force-terminate the node process.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be killed.
    pub async fn kill(&mut self) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        warn!("killing node {}", self.config.name);
        self.child
            .kill()
            .await
            .map_err(|e| Error::Io("failed to kill node", e))
    }
}
