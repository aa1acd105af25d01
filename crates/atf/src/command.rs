//! One-shot commands with a typed outcome.

use std::ffi::OsStr;
use std::fmt;

use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Result of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Exited successfully without writing to stderr.
    Success {
        /// Captured stdout.
        stdout: String,
    },
    /// Exited with a failure status or wrote to stderr.
    Failure {
        /// Captured stderr, or the exit status when stderr was empty.
        stderr: String,
    },
}

impl CommandOutcome {
    /// Whether the command succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Captured output: stdout on success, stderr on failure.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Success { stdout } => stdout,
            Self::Failure { stderr } => stderr,
        }
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { stdout } => write!(f, "success: {}", stdout.trim_end()),
            Self::Failure { stderr } => write!(f, "failure: {}", stderr.trim_end()),
        }
    }
}

/// Run `program` to completion and classify the result.
///
/// Output on stderr counts as failure even when the exit status is zero.
///
/// # Errors
///
/// Returns [`Error::SpawnProcess`] if the program cannot be started.
pub async fn run_command<I, S>(program: &str, args: I) -> Result<CommandOutcome>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    debug!("Running command: {:?}", cmd);

    let output = cmd.output().await.map_err(|source| Error::SpawnProcess {
        program: program.to_string(),
        source,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    Ok(match (output.status.success(), stderr.is_empty()) {
        (true, true) => CommandOutcome::Success { stdout },
        (false, true) => CommandOutcome::Failure {
            stderr: format!("{program} exited with {}", output.status),
        },
        (_, false) => CommandOutcome::Failure { stderr },
    })
}
