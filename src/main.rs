#![forbid(unsafe_code)]

//! `kernel-bridge`: editor-facing execution-engine bridge binary.
//!
//! Loads configuration, then serves line-delimited JSON requests on stdin
//! and writes responses on stdout until the front-end sends `shutdown_all`,
//! closes its end, or the process is signalled. Logs never touch stdout.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, EnvFilter};

use kernel_bridge::engine::process::ProcessLauncher;
use kernel_bridge::gateway;
use kernel_bridge::session::registry::SessionRegistry;
use kernel_bridge::{AppError, BridgeConfig, Result};

/// How long blocked stdin reads may hold up process exit.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "kernel-bridge",
    about = "Line-delimited JSON bridge to interactive execution engines",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Engine adapter command, overriding `engine.program` and `engine.args`.
    #[arg(last = true)]
    engine: Vec<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let mut config = match &args.config {
        Some(path) => BridgeConfig::load_from_path(path)?,
        None => BridgeConfig::default(),
    };
    config.override_engine_command(&args.engine);
    if args.log_file.is_some() {
        config.log_file.clone_from(&args.log_file);
    }
    config.validate()?;

    init_tracing(args.log_format, config.log_file.as_ref())?;
    info!(program = config.engine.program.as_str(), "kernel-bridge starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let result = runtime.block_on(run(config));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

async fn run(config: BridgeConfig) -> Result<()> {
    let launcher = Arc::new(ProcessLauncher::new(&config.engine));
    let registry = Arc::new(SessionRegistry::new(
        launcher,
        config.engine.poll_interval(),
    ));

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    info!("serving requests on stdio");
    let result = gateway::serve(
        registry,
        tokio::io::stdin(),
        tokio::io::stdout(),
        config.protocol.clone(),
        ct,
    )
    .await;

    info!("kernel-bridge shut down");
    result
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat, log_file: Option<&PathBuf>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let writer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| {
                    AppError::Config(format!("cannot open log file {}: {err}", path.display()))
                })?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_ansi(log_file.is_none());

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
