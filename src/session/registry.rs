//! Keyed ownership of live sessions.
//!
//! Each key maps to a slot that is filled once its engine has launched. The
//! map mutex is held only to look up, insert, or remove slots; launches,
//! submissions, and shutdowns all run outside it, so a slow engine never
//! blocks requests for other sessions. Callers asking for a key whose engine
//! is still starting wait on that slot instead of launching a second engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, info_span, warn, Instrument};

use crate::engine::EngineLauncher;
use crate::models::key::SessionKey;
use crate::session::Session;
use crate::{AppError, Result};

/// A session, or the launch that will produce it.
type Slot = Arc<OnceCell<Arc<Session>>>;

/// A restart whose replacement slot is already mapped.
///
/// Produced by [`SessionRegistry::begin_restart`] and completed by
/// [`SessionRegistry::finish_restart`].
#[derive(Debug)]
pub struct PendingRestart {
    key: SessionKey,
    old: Arc<Session>,
    fresh: Slot,
}

/// Owner of every live [`Session`], keyed by [`SessionKey`].
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionKey, Slot>>,
    launcher: Arc<dyn EngineLauncher>,
    poll_interval: Duration,
    closed: AtomicBool,
}

impl SessionRegistry {
    /// Create an empty registry that launches engines with `launcher`.
    #[must_use]
    pub fn new(launcher: Arc<dyn EngineLauncher>, poll_interval: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            launcher,
            poll_interval,
            closed: AtomicBool::new(false),
        }
    }

    /// Return the session for `key`, launching one on first use.
    ///
    /// Concurrent calls for one key share a single launch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Engine` if a new engine cannot be started, if the
    /// registry has been shut down, or if the key was shut down while its
    /// engine was starting.
    pub async fn get(&self, key: &SessionKey) -> Result<Arc<Session>> {
        let slot = {
            let mut sessions = self.sessions.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(AppError::Engine("session registry is shut down".into()));
            }
            Arc::clone(sessions.entry(key.clone()).or_default())
        };

        if let Some(session) = slot.get() {
            return Ok(Arc::clone(session));
        }
        self.fill(key, &slot).await
    }

    /// Return the session for `key` without creating one.
    ///
    /// A session whose engine is still starting is not returned.
    pub async fn lookup(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .get(key)
            .and_then(|slot| slot.get().cloned())
    }

    /// Replace the session for `key` with a freshly launched one.
    ///
    /// Waits for any in-flight submission on the old session to stop before
    /// its engine is released. Returns `Ok(None)` if `key` has no running
    /// session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Engine` if the replacement cannot be started; the
    /// key is then left without a session.
    pub async fn restart(&self, key: &SessionKey) -> Result<Option<Arc<Session>>> {
        let Some(pending) = self.begin_restart(key).await else {
            return Ok(None);
        };
        self.finish_restart(pending).await.map(Some)
    }

    /// First half of [`restart`](Self::restart): map an empty replacement
    /// slot for `key` and hand back the session it displaces.
    ///
    /// From here on, `get` for `key` waits for the replacement and never
    /// sees the key vacant. Returns `None` if `key` has no running session.
    pub async fn begin_restart(&self, key: &SessionKey) -> Option<PendingRestart> {
        let mut sessions = self.sessions.lock().await;
        let Some(old) = sessions.get(key).and_then(|slot| slot.get().cloned()) else {
            info!(session = %key, "restart requested for unknown session");
            return None;
        };
        let fresh = Slot::default();
        sessions.insert(key.clone(), Arc::clone(&fresh));
        Some(PendingRestart {
            key: key.clone(),
            old,
            fresh,
        })
    }

    /// Second half of [`restart`](Self::restart): release the old engine,
    /// then launch the replacement unless a concurrent `get` already has.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Engine` if the replacement cannot be started.
    pub async fn finish_restart(&self, pending: PendingRestart) -> Result<Arc<Session>> {
        let PendingRestart { key, old, fresh } = pending;
        let span = info_span!("restart", session = %key);
        async move {
            if let Err(err) = old.shutdown().await {
                warn!(%err, "old engine did not close cleanly");
            }

            let session = self.fill(&key, &fresh).await?;
            info!(engine_id = session.handle_id(), "session restarted");
            Ok(session)
        }
        .instrument(span)
        .await
    }

    /// Shut down and forget the session for `key`.
    ///
    /// Returns whether a running session existed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Engine` if the engine fails to close cleanly; the
    /// entry is removed regardless.
    pub async fn shutdown(&self, key: &SessionKey) -> Result<bool> {
        let Some(session) = self.detach(key).await else {
            return Ok(false);
        };

        session.shutdown().await?;
        Ok(true)
    }

    /// Forget the session for `key` without closing it, and return it.
    ///
    /// The caller owns the shutdown. An engine still starting for `key` is
    /// discarded once its launch completes.
    pub async fn detach(&self, key: &SessionKey) -> Option<Arc<Session>> {
        let removed = self.sessions.lock().await.remove(key);
        let session = removed.and_then(|slot| slot.get().cloned());
        if session.is_none() {
            info!(session = %key, "shutdown requested for unknown session");
        }
        session
    }

    /// Shut down every session, empty the registry, and refuse new sessions.
    ///
    /// Returns how many sessions were shut down.
    pub async fn shutdown_all(&self) -> usize {
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().await;
            self.closed.store(true, Ordering::SeqCst);
            sessions
                .drain()
                .filter_map(|(_, slot)| slot.get().cloned())
                .collect()
        };

        let results = join_all(drained.iter().map(|session| session.shutdown())).await;
        for (session, result) in drained.iter().zip(results) {
            if let Err(err) = result {
                warn!(session = %session.key(), %err, "engine did not close cleanly");
            }
        }

        info!(count = drained.len(), "all sessions shut down");
        drained.len()
    }

    /// Number of running sessions.
    pub async fn len(&self) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Whether no session is running.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Launch into `slot` unless another caller already has, then make sure
    /// the slot is still the one mapped for `key`.
    async fn fill(&self, key: &SessionKey, slot: &Slot) -> Result<Arc<Session>> {
        let launched = slot
            .get_or_try_init(|| async {
                let session = self.launch(key).await?;
                info!(session = %key, engine_id = session.handle_id(), "session registered");
                Ok::<_, AppError>(Arc::new(session))
            })
            .await;

        let session = match launched {
            Ok(session) => Arc::clone(session),
            Err(err) => {
                self.forget_if_current(key, slot).await;
                return Err(err);
            }
        };

        let current = self
            .sessions
            .lock()
            .await
            .get(key)
            .is_some_and(|mapped| Arc::ptr_eq(mapped, slot));
        if !current {
            warn!(session = %key, "session was shut down while its engine started");
            if let Err(err) = session.shutdown().await {
                warn!(%err, "discarded engine did not close cleanly");
            }
            return Err(AppError::Engine(format!(
                "session {key} was shut down while starting"
            )));
        }

        Ok(session)
    }

    async fn forget_if_current(&self, key: &SessionKey, slot: &Slot) {
        let mut sessions = self.sessions.lock().await;
        let stale = sessions
            .get(key)
            .is_some_and(|mapped| Arc::ptr_eq(mapped, slot) && !mapped.initialized());
        if stale {
            sessions.remove(key);
        }
    }

    async fn launch(&self, key: &SessionKey) -> Result<Session> {
        Session::start(key.clone(), self.launcher.as_ref(), self.poll_interval).await
    }
}
