//! [`Engine`] implementation backed by an NDJSON adapter process.
//!
//! Requests go to the adapter's stdin through a writer task; events come
//! back from its stdout through a reader task. The adapter answers each
//! request with Jupyter-shaped messages whose `parent_header.msg_id` names
//! the request; messages for any other request are dropped as stale.

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::reader::run_reader;
use crate::engine::spawner::{drain_stderr, spawn_engine, terminate, SpawnConfig};
use crate::engine::{Engine, EngineFuture, EngineLauncher};
use crate::models::event::Event;
use crate::models::key::SessionKey;
use crate::temporal::format_wire;
use crate::wire::writer::run_writer;
use crate::{AppError, Result};

const EVENT_BUFFER: usize = 256;
const REQUEST_BUFFER: usize = 16;

/// One running adapter process.
#[derive(Debug)]
pub struct ProcessEngine {
    handle_id: String,
    client_session: String,
    child: Option<Child>,
    request_tx: Option<mpsc::Sender<Value>>,
    event_rx: mpsc::Receiver<Event>,
    writer: Option<JoinHandle<Result<()>>>,
    cancel: CancellationToken,
    pending_msg_id: Option<String>,
    shutdown_grace: Duration,
}

impl ProcessEngine {
    /// Spawn an adapter for `key` and wire up its reader and writer tasks.
    ///
    /// # Errors
    ///
    /// Propagates spawn and startup failures from
    /// [`spawn_engine`](crate::engine::spawner::spawn_engine).
    pub async fn start(
        config: &SpawnConfig,
        shutdown_grace: Duration,
        key: &SessionKey,
    ) -> Result<Self> {
        let conn = spawn_engine(config, key).await?;
        let handle_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (request_tx, request_rx) = mpsc::channel(REQUEST_BUFFER);

        tokio::spawn(run_reader(
            handle_id.clone(),
            conn.stdout,
            event_tx,
            cancel.child_token(),
        ));
        let writer = tokio::spawn(run_writer(
            "engine-stdin",
            conn.stdin,
            request_rx,
            cancel.child_token(),
        ));
        if let Some(stderr) = conn.stderr {
            tokio::spawn(drain_stderr(handle_id.clone(), stderr));
        }

        info!(session = %key, engine_id = handle_id.as_str(), pid = ?conn.child.id(), "engine started");

        Ok(Self {
            handle_id,
            client_session: Uuid::new_v4().to_string(),
            child: Some(conn.child),
            request_tx: Some(request_tx),
            event_rx,
            writer: Some(writer),
            cancel,
            pending_msg_id: None,
            shutdown_grace,
        })
    }

    fn request(&self, msg_id: &str, msg_type: &str, content: Value) -> Value {
        json!({
            "header": {
                "msg_id": msg_id,
                "msg_type": msg_type,
                "session": self.client_session,
                "date": format_wire(&Utc::now().fixed_offset()),
            },
            "parent_header": {},
            "metadata": {},
            "content": content,
        })
    }

    fn is_stale(&self, event: &Event) -> bool {
        match (&event.parent_id, &self.pending_msg_id) {
            (Some(parent), Some(pending)) => parent != pending,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

impl Engine for ProcessEngine {
    fn handle_id(&self) -> &str {
        &self.handle_id
    }

    fn submit<'a>(&'a mut self, code: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let tx = self
                .request_tx
                .as_ref()
                .ok_or_else(|| AppError::Engine("engine is closed".into()))?;

            let msg_id = Uuid::new_v4().to_string();
            let msg = self.request(
                &msg_id,
                "execute_request",
                json!({
                    "code": code,
                    "silent": false,
                    "store_history": true,
                    "allow_stdin": false,
                }),
            );

            tx.send(msg).await.map_err(|_| {
                AppError::Engine(format!(
                    "write failed: stdin closed for engine '{}'",
                    self.handle_id
                ))
            })?;

            debug!(engine_id = self.handle_id.as_str(), msg_id, "execute request sent");
            self.pending_msg_id = Some(msg_id);
            Ok(())
        })
    }

    fn next_event(&mut self, wait: Duration) -> EngineFuture<'_, Option<Event>> {
        Box::pin(async move {
            let deadline = Instant::now() + wait;
            loop {
                match tokio::time::timeout_at(deadline, self.event_rx.recv()).await {
                    Err(_elapsed) => return Ok(None),
                    Ok(None) => {
                        return Err(AppError::Engine(format!(
                            "event stream closed for engine '{}'",
                            self.handle_id
                        )));
                    }
                    Ok(Some(event)) if self.is_stale(&event) => {
                        debug!(
                            engine_id = self.handle_id.as_str(),
                            kind = event.kind().wire_name(),
                            "dropping event for a previous request"
                        );
                    }
                    Ok(Some(event)) => return Ok(Some(event)),
                }
            }
        })
    }

    fn close(&mut self) -> EngineFuture<'_, ()> {
        Box::pin(async move {
            let Some(mut child) = self.child.take() else {
                return Ok(());
            };

            if let Some(tx) = self.request_tx.take() {
                let msg_id = Uuid::new_v4().to_string();
                let msg = self.request(&msg_id, "shutdown_request", json!({ "restart": false }));
                if tx.send(msg).await.is_err() {
                    debug!(engine_id = self.handle_id.as_str(), "stdin already closed at shutdown");
                }
            }

            // The writer exits once the request channel is closed, which
            // closes the adapter's stdin.
            if let Some(writer) = self.writer.take() {
                match tokio::time::timeout(self.shutdown_grace, writer).await {
                    Ok(Ok(Err(err))) => {
                        debug!(engine_id = self.handle_id.as_str(), %err, "writer ended with error");
                    }
                    Ok(Err(err)) => {
                        warn!(engine_id = self.handle_id.as_str(), %err, "writer task panicked");
                    }
                    Err(_) => {
                        warn!(engine_id = self.handle_id.as_str(), "writer did not drain in time");
                    }
                    Ok(Ok(Ok(()))) => {}
                }
            }

            terminate(&self.handle_id, &mut child, self.shutdown_grace).await;
            self.cancel.cancel();
            self.pending_msg_id = None;

            info!(engine_id = self.handle_id.as_str(), "engine closed");
            Ok(())
        })
    }
}

impl Drop for ProcessEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Launches [`ProcessEngine`]s from the `[engine]` configuration.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    spawn: SpawnConfig,
    shutdown_grace: Duration,
}

impl ProcessLauncher {
    /// Build a launcher from engine settings.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            spawn: SpawnConfig::from(config),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

impl EngineLauncher for ProcessLauncher {
    fn launch<'a>(&'a self, key: &'a SessionKey) -> EngineFuture<'a, Box<dyn Engine>> {
        Box::pin(async move {
            let engine = ProcessEngine::start(&self.spawn, self.shutdown_grace, key).await?;
            Ok(Box::new(engine) as Box<dyn Engine>)
        })
    }
}
