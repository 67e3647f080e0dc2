//! Sessions: one execution engine plus its lifecycle and counters.
//!
//! A [`Session`] serializes submissions with an async mutex around its
//! engine; status is published through a [`watch`] channel so it can be
//! observed while a submission holds that mutex.
//!
//! Submodules:
//! - `aggregate`: folds a submission's events into a report.
//! - `registry`: keyed ownership of all live sessions.

pub mod aggregate;
pub mod registry;

use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::engine::{Engine, EngineLauncher};
use crate::models::event::ExecutionState;
use crate::models::key::SessionKey;
use crate::models::report::ExecutionReport;
use crate::session::aggregate::Aggregator;
use crate::{AppError, Result};

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Engine is being launched.
    Starting,
    /// Ready for a submission.
    Idle,
    /// A submission is running, or the last one ended without the engine
    /// returning to idle.
    Busy,
    /// Shut down; the engine handle has been released.
    Down,
}

impl From<ExecutionState> for SessionStatus {
    fn from(state: ExecutionState) -> Self {
        match state {
            ExecutionState::Starting | ExecutionState::Restarting => Self::Starting,
            ExecutionState::Busy => Self::Busy,
            ExecutionState::Idle => Self::Idle,
            ExecutionState::Dead => Self::Down,
        }
    }
}

/// One managed execution engine.
pub struct Session {
    key: SessionKey,
    handle_id: String,
    status: watch::Sender<SessionStatus>,
    execution_count: AtomicU64,
    engine: Mutex<Option<Box<dyn Engine>>>,
    closing: CancellationToken,
    poll_interval: Duration,
}

impl Session {
    /// Launch an engine for `key` and return the session once it is idle.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Engine` if the launcher fails.
    pub async fn start(
        key: SessionKey,
        launcher: &dyn EngineLauncher,
        poll_interval: Duration,
    ) -> Result<Self> {
        debug!(session = %key, "starting session");
        let engine = launcher.launch(&key).await?;
        Ok(Self::with_engine(key, engine, poll_interval))
    }

    /// Wrap an engine that is already running.
    #[must_use]
    pub fn with_engine(key: SessionKey, engine: Box<dyn Engine>, poll_interval: Duration) -> Self {
        let handle_id = engine.handle_id().to_owned();
        let (status, _) = watch::channel(SessionStatus::Idle);
        info!(session = %key, engine_id = handle_id.as_str(), "session ready");
        Self {
            key,
            handle_id,
            status,
            execution_count: AtomicU64::new(0),
            engine: Mutex::new(Some(engine)),
            closing: CancellationToken::new(),
            poll_interval,
        }
    }

    /// Routing identity of this session.
    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Identifier of the engine this session owns.
    #[must_use]
    pub fn handle_id(&self) -> &str {
        &self.handle_id
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Watch status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Number of the most recently completed submission.
    #[must_use]
    pub fn execution_count(&self) -> u64 {
        self.execution_count.load(Ordering::Acquire)
    }

    /// Run `code` and collect everything the engine reports until it goes
    /// back to idle.
    ///
    /// Submissions on one session run one at a time; a second caller waits
    /// for the first to finish. Quiet periods longer than the poll interval
    /// are not failures; the wait only ends on idle, on a closed event
    /// stream, or when the session is shut down.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Engine` if the session is not idle, the engine
    /// cannot accept the code, the event stream closes, the engine reports
    /// itself dead, or the session is shut down mid-submission. Except for
    /// shutdown, the session is left non-idle and refuses further work until
    /// restarted.
    pub async fn submit(&self, code: &str) -> Result<ExecutionReport> {
        let span = info_span!("submit", session = %self.key);
        async move {
            let mut slot = self.engine.lock().await;

            let status = self.status();
            let Some(engine) = slot.as_mut().filter(|_| status == SessionStatus::Idle) else {
                return Err(AppError::Engine(format!(
                    "session {} is {status:?}; restart required",
                    self.key
                )));
            };

            self.status.send_replace(SessionStatus::Busy);
            engine.submit(code).await?;

            let mut aggregator = Aggregator::new();
            loop {
                let next = tokio::select! {
                    biased;

                    () = self.closing.cancelled() => {
                        return Err(AppError::Engine(
                            "session shut down during submission".into(),
                        ));
                    }

                    next = engine.next_event(self.poll_interval) => next,
                };

                let event = match next {
                    Ok(Some(event)) => event,
                    Ok(None) => {
                        debug!("no engine event within poll window");
                        continue;
                    }
                    Err(err) => {
                        warn!(%err, "engine stopped responding");
                        return Err(err);
                    }
                };

                let Some(state) = aggregator.absorb(event) else {
                    continue;
                };
                self.status.send_replace(state.into());

                match state {
                    ExecutionState::Idle => {
                        let count = aggregator
                            .reported_count()
                            .unwrap_or_else(|| self.execution_count() + 1);
                        self.execution_count.store(count, Ordering::Release);
                        info!(execution_count = count, "submission complete");
                        return Ok(aggregator.finish(count));
                    }
                    ExecutionState::Dead => {
                        return Err(AppError::Engine("engine reported itself dead".into()));
                    }
                    ExecutionState::Starting
                    | ExecutionState::Restarting
                    | ExecutionState::Busy => {}
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Release the engine and mark the session down.
    ///
    /// An in-flight submission is told to stop and this call waits for it.
    /// Calling this on a session that is already down is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Engine` if the engine fails to close cleanly; the
    /// session is down regardless.
    pub async fn shutdown(&self) -> Result<()> {
        self.closing.cancel();
        let mut slot = self.engine.lock().await;
        let Some(mut engine) = slot.take() else {
            return Ok(());
        };

        let result = engine.close().await;
        self.status.send_replace(SessionStatus::Down);
        info!(session = %self.key, engine_id = self.handle_id.as_str(), "session shut down");
        result
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("handle_id", &self.handle_id)
            .field("status", &self.status())
            .field("execution_count", &self.execution_count())
            .finish_non_exhaustive()
    }
}
