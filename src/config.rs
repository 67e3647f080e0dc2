//! Bridge configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// How to launch and talk to execution-engine adapter processes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Engine adapter executable. Must be set here or on the command line.
    #[serde(default)]
    pub program: String,
    /// Arguments passed to the adapter executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Fallback working directory when the target file has no usable parent.
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Extra environment variables set on every engine process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Maximum time to wait for the adapter's ready line.
    #[serde(default = "default_startup_timeout_seconds")]
    pub startup_timeout_seconds: u64,
    /// Per-poll wait bound while collecting events for a submission.
    #[serde(default = "default_poll_interval_millis")]
    pub poll_interval_millis: u64,
    /// Grace period between the shutdown request and a force-kill.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_startup_timeout_seconds() -> u64 {
    30
}

fn default_poll_interval_millis() -> u64 {
    1000
}

fn default_shutdown_grace_seconds() -> u64 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            working_dir: default_working_dir(),
            env: HashMap::new(),
            startup_timeout_seconds: default_startup_timeout_seconds(),
            poll_interval_millis: default_poll_interval_millis(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
        }
    }
}

impl EngineConfig {
    /// Startup timeout as a [`Duration`].
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }

    /// Per-poll wait bound as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }

    /// Shutdown grace period as a [`Duration`].
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

/// Front-end protocol knobs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProtocolConfig {
    /// Write an acknowledgement line for `restart` and `shutdown` requests.
    #[serde(default)]
    pub acknowledge_control: bool,
    /// How long `shutdown_all` and end of input wait for running
    /// submissions before tearing sessions down.
    #[serde(default = "default_drain_timeout_seconds")]
    pub drain_timeout_seconds: u64,
}

fn default_drain_timeout_seconds() -> u64 {
    30
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            acknowledge_control: false,
            drain_timeout_seconds: default_drain_timeout_seconds(),
        }
    }
}

impl ProtocolConfig {
    /// Drain window as a [`Duration`].
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }
}

/// Top-level configuration parsed from `kernel-bridge.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Append logs to this file instead of stderr.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Engine launch settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Protocol settings.
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string without validating it.
    ///
    /// The engine program may still be supplied on the command line, so
    /// callers run [`BridgeConfig::validate`] once all overrides are applied.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the TOML is invalid.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Replace the engine command with one given on the command line.
    pub fn override_engine_command(&mut self, command: &[String]) {
        if let Some((program, args)) = command.split_first() {
            self.engine.program.clone_from(program);
            self.engine.args = args.to_vec();
        }
    }

    /// Check that the configuration can launch engines.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.engine.program.trim().is_empty() {
            return Err(AppError::Config(
                "engine.program must be set in the config file or after `--`".into(),
            ));
        }

        if self.engine.poll_interval_millis == 0 {
            return Err(AppError::Config(
                "engine.poll_interval_millis must be greater than zero".into(),
            ));
        }

        if self.engine.startup_timeout_seconds == 0 {
            return Err(AppError::Config(
                "engine.startup_timeout_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
