//! Protocol gateway: the front-end request loop.
//!
//! Reads one JSON request per line from the front-end, routes it to the
//! [`SessionRegistry`], and writes one JSON response per `exec`. Each session
//! key has one worker task that runs its execs in arrival order; workers for
//! different keys run concurrently. Engine launches, restarts, and closes all
//! happen off the read loop, so one slow engine never holds up requests for
//! another. All output goes through a single writer task, so responses are
//! never interleaved mid-line.
//!
//! Submodules:
//! - `request`: request-line parsing.
//! - `response`: response record builders.

pub mod request;
pub mod response;

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::ProtocolConfig;
use crate::gateway::request::{parse_request, Request};
use crate::models::key::SessionKey;
use crate::models::report::ExecutionReport;
use crate::session::registry::SessionRegistry;
use crate::wire::codec::NdjsonCodec;
use crate::wire::writer::run_writer;
use crate::{AppError, Result};

/// Capacity of the outbound response queue.
const OUTBOUND_CAPACITY: usize = 64;

/// Why the request loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    /// The front-end asked for `shutdown_all`.
    ShutdownAll,
    /// Input reached end of stream.
    Eof,
    /// The host cancelled the gateway.
    Cancelled,
}

/// Serve requests from `input` until `shutdown_all`, end of input, an
/// unrecoverable read error, or `cancel`.
///
/// On `shutdown_all` and end of input, running submissions get
/// `options.drain_timeout()` to finish before the registry is torn down;
/// cancellation and read failures tear down at once. Either way every
/// accepted exec, started or still queued, writes its response before
/// `output` is flushed and released. Only an explicit `shutdown_all` produces a confirmation record.
///
/// # Errors
///
/// Returns `AppError::Io` if reading `input` or writing `output` fails.
pub async fn serve<R, W>(
    registry: Arc<SessionRegistry>,
    input: R,
    output: W,
    options: ProtocolConfig,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let writer = tokio::spawn(run_writer(
        "frontend",
        output,
        out_rx,
        CancellationToken::new(),
    ));

    let mut inflight = JoinSet::new();
    let outcome = read_requests(&registry, input, &out_tx, &mut inflight, &options, &cancel).await;

    if matches!(outcome, Ok(Stop::ShutdownAll | Stop::Eof)) {
        let window = options.drain_timeout();
        if tokio::time::timeout(window, reap_all(&mut inflight)).await.is_err() {
            warn!(
                running = inflight.len(),
                ?window,
                "submissions still running after drain window; stopping them"
            );
        }
    }

    let drained = registry.shutdown_all().await;
    reap_all(&mut inflight).await;

    if matches!(outcome, Ok(Stop::ShutdownAll)) {
        send(&out_tx, response::shutdown_all_ack(drained)).await;
    }
    drop(out_tx);

    let written = match writer.await {
        Ok(result) => result,
        Err(err) => Err(AppError::Io(format!("response writer task failed: {err}"))),
    };

    match outcome {
        Ok(stop) => {
            info!(?stop, sessions = drained, "gateway stopped");
            written
        }
        Err(err) => {
            error!(%err, sessions = drained, "gateway stopped on read failure");
            Err(err)
        }
    }
}

async fn read_requests<R>(
    registry: &Arc<SessionRegistry>,
    input: R,
    out_tx: &mpsc::Sender<Value>,
    inflight: &mut JoinSet<()>,
    options: &ProtocolConfig,
    cancel: &CancellationToken,
) -> Result<Stop>
where
    R: AsyncRead + Unpin + Send,
{
    let ctx = LoopContext {
        registry: Arc::clone(registry),
        out_tx: out_tx.clone(),
        acknowledge_control: options.acknowledge_control,
    };
    // Dropped on return, which lets every worker finish its queue and exit.
    let mut workers = HashMap::new();
    let mut lines = FramedRead::new(input, NdjsonCodec::new());
    // FramedRead yields one `None` after a decode error before resuming.
    let mut recovering = false;

    loop {
        let item = tokio::select! {
            biased;

            () = cancel.cancelled() => return Ok(Stop::Cancelled),

            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(err) = joined {
                    error!(%err, "gateway task failed");
                }
                continue;
            }

            item = lines.next() => item,
        };

        let line = match item {
            Some(Ok(line)) => {
                recovering = false;
                line
            }
            Some(Err(AppError::Protocol(reason))) => {
                warn!(%reason, "skipping unreadable request line");
                recovering = true;
                continue;
            }
            Some(Err(err)) => return Err(err),
            None if recovering => {
                recovering = false;
                continue;
            }
            None => return Ok(Stop::Eof),
        };

        let request = match parse_request(&line) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(err) => {
                warn!(%err, raw_line = %line, "skipping invalid request");
                continue;
            }
        };

        match request {
            Request::Exec { key, cell_id, code } => {
                dispatch_exec(&ctx, &mut workers, key, ExecJob { cell_id, code }, inflight);
            }
            Request::Restart { key, id } => dispatch_restart(&ctx, &key, id, inflight).await,
            Request::Shutdown { key, id } => dispatch_shutdown(&ctx, &key, id, inflight).await,
            Request::ShutdownAll => return Ok(Stop::ShutdownAll),
        }
    }
}

/// Shared handles for work spawned by the request loop.
#[derive(Clone)]
struct LoopContext {
    registry: Arc<SessionRegistry>,
    out_tx: mpsc::Sender<Value>,
    acknowledge_control: bool,
}

impl LoopContext {
    async fn acknowledge(
        &self,
        kind: &str,
        id: &Value,
        outcome: std::result::Result<bool, String>,
    ) {
        if self.acknowledge_control {
            send(&self.out_tx, response::control_ack(kind, id, outcome)).await;
        }
    }
}

/// One `exec` waiting for its session worker.
#[derive(Debug)]
struct ExecJob {
    cell_id: Value,
    code: String,
}

/// Queue `job` on the worker for `key`, starting the worker on first use.
///
/// Exactly one response is written per job, including when the session
/// cannot be started.
fn dispatch_exec(
    ctx: &LoopContext,
    workers: &mut HashMap<SessionKey, mpsc::UnboundedSender<ExecJob>>,
    key: SessionKey,
    job: ExecJob,
    inflight: &mut JoinSet<()>,
) {
    let queue = workers
        .entry(key.clone())
        .or_insert_with(|| spawn_worker(ctx, key.clone(), inflight));

    if let Err(mpsc::error::SendError(job)) = queue.send(job) {
        warn!(session = %key, "session worker stopped; starting a new one");
        let fresh = spawn_worker(ctx, key.clone(), inflight);
        if fresh.send(job).is_err() {
            error!(session = %key, "session worker unavailable; dropping exec");
        }
        workers.insert(key, fresh);
    }
}

fn spawn_worker(
    ctx: &LoopContext,
    key: SessionKey,
    inflight: &mut JoinSet<()>,
) -> mpsc::UnboundedSender<ExecJob> {
    let (job_tx, job_rx) = mpsc::unbounded_channel();
    inflight.spawn(run_session_worker(ctx.clone(), key, job_rx));
    job_tx
}

/// Run the execs for one session strictly in arrival order.
///
/// The engine is launched by the first job. The worker exits once its queue
/// is closed and drained.
async fn run_session_worker(
    ctx: LoopContext,
    key: SessionKey,
    mut jobs: mpsc::UnboundedReceiver<ExecJob>,
) {
    while let Some(job) = jobs.recv().await {
        let span = info_span!("exec", session = %key, cell_id = %job.cell_id);
        let report = execute(&ctx.registry, &key, &job.code)
            .instrument(span.clone())
            .await;
        span.in_scope(|| debug!(outcome = ?report.outcome, "writing exec response"));
        send(&ctx.out_tx, response::exec_response(&report, &job.cell_id)).await;
    }
    debug!(session = %key, "session worker stopped");
}

async fn execute(registry: &SessionRegistry, key: &SessionKey, code: &str) -> ExecutionReport {
    let session = match registry.get(key).await {
        Ok(session) => session,
        Err(err) => {
            warn!(%err, "session unavailable");
            return ExecutionReport::no_response(err.to_string(), 0);
        }
    };

    match session.submit(code).await {
        Ok(report) => report,
        Err(err) => {
            warn!(%err, "execution produced no result");
            ExecutionReport::no_response(err.to_string(), session.execution_count())
        }
    }
}

/// Swap in the replacement slot now, so later requests for `key` reach the
/// new engine, and finish the restart in the background.
async fn dispatch_restart(
    ctx: &LoopContext,
    key: &SessionKey,
    id: Value,
    inflight: &mut JoinSet<()>,
) {
    let Some(pending) = ctx.registry.begin_restart(key).await else {
        ctx.acknowledge("restart", &id, Ok(false)).await;
        return;
    };

    let ctx = ctx.clone();
    let span = info_span!("control", kind = "restart", session = %key);
    inflight.spawn(
        async move {
            let outcome = match ctx.registry.finish_restart(pending).await {
                Ok(_) => Ok(true),
                Err(err) => {
                    warn!(%err, "restart failed");
                    Err(err.to_string())
                }
            };
            ctx.acknowledge("restart", &id, outcome).await;
        }
        .instrument(span),
    );
}

/// Forget the session for `key` now and close its engine in the background.
async fn dispatch_shutdown(
    ctx: &LoopContext,
    key: &SessionKey,
    id: Value,
    inflight: &mut JoinSet<()>,
) {
    let Some(session) = ctx.registry.detach(key).await else {
        ctx.acknowledge("shutdown", &id, Ok(false)).await;
        return;
    };

    let ctx = ctx.clone();
    let span = info_span!("control", kind = "shutdown", session = %key);
    inflight.spawn(
        async move {
            let outcome = match session.shutdown().await {
                Ok(()) => Ok(true),
                Err(err) => {
                    warn!(%err, "shutdown did not complete cleanly");
                    Err(err.to_string())
                }
            };
            ctx.acknowledge("shutdown", &id, outcome).await;
        }
        .instrument(span),
    );
}

async fn reap_all(inflight: &mut JoinSet<()>) {
    while let Some(joined) = inflight.join_next().await {
        if let Err(err) = joined {
            error!(%err, "gateway task failed");
        }
    }
}

async fn send(out_tx: &mpsc::Sender<Value>, value: Value) {
    if out_tx.send(value).await.is_err() {
        warn!("response writer closed; dropping response");
    }
}
