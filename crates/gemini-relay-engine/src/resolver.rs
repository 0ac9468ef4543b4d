//! Launch-command discovery.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use gemini_relay_core::config::EngineConfig;
use gemini_relay_core::error::{RelayError, Result};

/// A concrete engine invocation: program plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl EngineCommand {
    /// Split a candidate string on whitespace. Blank candidates yield `None`.
    pub fn parse(candidate: &str) -> Option<Self> {
        let mut parts = candidate.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    /// A `tokio` command for this invocation with no stdio configured.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Tries candidate invocations in priority order and returns the first that
/// exits successfully when probed.
#[derive(Debug, Clone)]
pub struct CommandResolver {
    candidates: Vec<EngineCommand>,
    probe_args: Vec<String>,
    timeout: Duration,
}

impl CommandResolver {
    pub fn new(candidates: &[String], probe_args: Vec<String>, timeout: Duration) -> Self {
        Self {
            candidates: candidates
                .iter()
                .filter_map(|c| EngineCommand::parse(c))
                .collect(),
            probe_args,
            timeout,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            &config.resolved_candidates(),
            config.probe_args.clone(),
            config.probe_timeout(),
        )
    }

    pub fn candidates(&self) -> &[EngineCommand] {
        &self.candidates
    }

    pub async fn resolve(&self) -> Result<EngineCommand> {
        for candidate in &self.candidates {
            if self.probe(candidate).await {
                info!(command = %candidate, "Resolved engine command");
                return Ok(candidate.clone());
            }
        }
        warn!(tried = self.candidates.len(), "No engine command candidate is available");
        Err(RelayError::EngineNotFound)
    }

    /// Run the candidate with the probe arguments; a zero exit within the
    /// timeout means it is available.
    async fn probe(&self, candidate: &EngineCommand) -> bool {
        let mut cmd = candidate.to_command();
        cmd.args(&self.probe_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                debug!(command = %candidate, %e, "Candidate failed to spawn");
                return false;
            }
        };

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(command = %candidate, %status, "Candidate probe finished");
                status.success()
            }
            Ok(Err(e)) => {
                debug!(command = %candidate, %e, "Candidate probe wait failed");
                false
            }
            Err(_) => {
                warn!(
                    command = %candidate,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Candidate probe timed out"
                );
                let _ = child.start_kill();
                let _ = child.wait().await;
                false
            }
        }
    }
}
