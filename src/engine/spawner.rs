//! Engine adapter process spawner.
//!
//! Spawns adapter processes with:
//! - `kill_on_drop(true)` so a dropped session never leaves an orphan.
//! - Session identity exported through `KERNEL_BRIDGE_*` environment
//!   variables, on top of the inherited environment and configured extras.
//! - The target file's directory as the working directory, so relative paths
//!   in user code resolve the way the user expects.
//! - A startup timeout: if the adapter does not print its ready line within
//!   the window, the process is killed and the launch fails.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::models::key::SessionKey;
use crate::{AppError, Result};

/// Env var carrying the front-end process id.
pub const ENV_CLIENT_PID: &str = "KERNEL_BRIDGE_CLIENT_PID";
/// Env var carrying the target file path.
pub const ENV_FILE: &str = "KERNEL_BRIDGE_FILE";
/// Env var carrying the buffer identifier, when the key has one.
pub const ENV_BUFFER: &str = "KERNEL_BRIDGE_BUFFER";

/// Everything needed to start one adapter process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Adapter executable.
    pub program: String,
    /// Adapter arguments.
    pub args: Vec<String>,
    /// Working directory used when the target file has no usable parent.
    pub working_dir: PathBuf,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Maximum time to wait for the ready line.
    pub startup_timeout: Duration,
}

impl From<&EngineConfig> for SpawnConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            env: config.env.clone(),
            startup_timeout: config.startup_timeout(),
        }
    }
}

/// Live stdio connection to a spawned adapter.
#[derive(Debug)]
pub struct EngineConnection {
    /// Child process handle; kept alive so `kill_on_drop` works.
    pub child: Child,
    /// Adapter stdin for requests.
    pub stdin: ChildStdin,
    /// Adapter stdout positioned just after the ready line.
    pub stdout: BufReader<ChildStdout>,
    /// Adapter stderr, if it could be captured.
    pub stderr: Option<ChildStderr>,
}

/// Working directory for an engine serving `file`.
#[must_use]
pub fn working_dir_for(file: &str, fallback: &Path) -> PathBuf {
    Path::new(file)
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty() && dir.is_dir())
        .map_or_else(|| fallback.to_path_buf(), Path::to_path_buf)
}

/// Spawn an adapter process for `key` and wait for its ready line.
///
/// # Errors
///
/// - `AppError::Engine("failed to spawn engine: …")`: OS spawn failure.
/// - `AppError::Engine("startup timeout …")`: no ready line within the window.
/// - `AppError::Engine("engine process exited before ready signal")`: early EOF.
pub async fn spawn_engine(config: &SpawnConfig, key: &SessionKey) -> Result<EngineConnection> {
    let mut cmd = Command::new(&config.program);
    cmd.args(&config.args);

    for (name, value) in &config.env {
        cmd.env(name, value);
    }
    cmd.env(ENV_CLIENT_PID, &key.pid).env(ENV_FILE, &key.file);
    if let Some(buffer) = &key.buffer {
        cmd.env(ENV_BUFFER, buffer);
    }

    cmd.current_dir(working_dir_for(&key.file, &config.working_dir))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Engine(format!("failed to spawn engine: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Engine("failed to capture engine stdin".into()))?;
    let stdout_raw = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Engine("failed to capture engine stdout".into()))?;
    let stderr = child.stderr.take();

    let mut reader = BufReader::new(stdout_raw);
    let mut line = String::new();

    match tokio::time::timeout(config.startup_timeout, reader.read_line(&mut line)).await {
        Ok(Ok(n)) if n > 0 => {
            info!(session = %key, ready_line = line.trim(), "engine emitted ready signal");
        }
        Ok(Ok(_)) => {
            return Err(AppError::Engine(
                "engine process exited before ready signal".into(),
            ));
        }
        Ok(Err(err)) => {
            child.kill().await.ok();
            return Err(AppError::Engine(format!(
                "failed to read engine ready signal: {err}"
            )));
        }
        Err(_elapsed) => {
            child.kill().await.ok();
            return Err(AppError::Engine(format!(
                "startup timeout: engine did not emit ready signal within {:?}",
                config.startup_timeout
            )));
        }
    }

    Ok(EngineConnection {
        child,
        stdin,
        stdout: reader,
        stderr,
    })
}

/// Forward adapter stderr into the log, one line per record.
pub async fn drain_stderr(engine_id: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(engine_id, line, "engine stderr"),
            Ok(None) => break,
            Err(err) => {
                warn!(engine_id, %err, "failed to read engine stderr");
                break;
            }
        }
    }
}

/// Wait up to `grace` for `child` to exit on its own, then force-kill it.
pub async fn terminate(engine_id: &str, child: &mut Child, grace: Duration) {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(exit)) => {
            info!(engine_id, ?exit, "engine process exited gracefully");
        }
        Ok(Err(err)) => {
            warn!(engine_id, %err, "error waiting for engine process");
        }
        Err(_) => {
            warn!(
                engine_id,
                "engine process did not exit within grace period, forcing kill"
            );
            if let Err(err) = child.kill().await {
                warn!(engine_id, %err, "failed to force-kill engine process");
            }
        }
    }
}
