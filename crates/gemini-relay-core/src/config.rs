//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Top-level Gemini Relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address (default: 127.0.0.1).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Serve the embedded browser UI at `/`.
    #[serde(default = "default_true")]
    pub ui: bool,
}

fn default_port() -> u16 {
    5000
}

fn default_true() -> bool {
    true
}

/// How the engine process is discovered, probed, and torn down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Launch commands tried in order. Each is split on whitespace into
    /// program and arguments.
    #[serde(default = "default_candidates")]
    pub candidates: Vec<String>,

    /// Entry script of a source checkout; adds a `node <script_path>` candidate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_path: Option<String>,

    /// Arguments appended to a candidate when probing it.
    #[serde(default = "default_probe_args")]
    pub probe_args: Vec<String>,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Grace period between the termination signal and a forced kill.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Cap on output held back while waiting for a closing marker.
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
}

fn default_candidates() -> Vec<String> {
    vec![
        "gemini".into(),
        "npx @google/gemini-cli".into(),
        "npx gemini".into(),
    ]
}

fn default_probe_args() -> Vec<String> {
    vec!["--version".into()]
}

fn default_probe_timeout_ms() -> u64 {
    10_000
}

fn default_stop_timeout_ms() -> u64 {
    5_000
}

fn default_max_buffer_bytes() -> usize {
    64 * 1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
            script_path: None,
            probe_args: default_probe_args(),
            probe_timeout_ms: default_probe_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            max_buffer_bytes: default_max_buffer_bytes(),
        }
    }
}

impl EngineConfig {
    /// The ordered candidate list with the script candidate slotted in third,
    /// after the bare executable and the package-runner invocation.
    pub fn resolved_candidates(&self) -> Vec<String> {
        let mut candidates = self.candidates.clone();
        if let Some(script) = self.script_path.as_deref().filter(|s| !s.is_empty()) {
            let expanded = shellexpand::tilde(script);
            let index = candidates.len().min(2);
            candidates.insert(index, format!("node {expanded}"));
        }
        candidates
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "gemini_relay_engine=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| RelayError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw)?;

        json5::from_str(&substituted).map_err(|e| RelayError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn server_port(&self) -> u16 {
        self.server.as_ref().map(|s| s.port).unwrap_or_else(default_port)
    }

    pub fn bind_addr(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    pub fn ui_enabled(&self) -> bool {
        self.server.as_ref().map(|s| s.ui).unwrap_or(true)
    }

    /// Engine settings, falling back to defaults when the section is absent.
    pub fn engine(&self) -> EngineConfig {
        self.engine.clone().unwrap_or_default()
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(server) = &self.server {
            if server.port == 0 {
                errors.push("Server port cannot be 0".to_string());
            }
        }

        if let Some(engine) = &self.engine {
            if engine.resolved_candidates().iter().all(|c| c.trim().is_empty()) {
                errors.push("Engine candidate list is empty".to_string());
            }
            if engine.probe_timeout_ms == 0 {
                errors.push("Engine probe timeout cannot be 0".to_string());
            }
            if let Some(script) = &engine.script_path {
                let expanded = shellexpand::tilde(script);
                if !Path::new(expanded.as_ref()).exists() {
                    warnings.push(format!("Engine script not found: {script}"));
                }
            }
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for Gemini Relay data: `~/.gemini_relay/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gemini_relay")
}
