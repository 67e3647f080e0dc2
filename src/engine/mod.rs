//! Execution-engine abstraction.
//!
//! The [`Engine`] trait is the only surface the session state machine sees:
//! submit code, then pull events with a bounded wait until the engine goes
//! idle. [`EngineLauncher`] starts engines for the registry. The shipped
//! implementation in [`process`] drives an NDJSON adapter process; tests
//! substitute scripted engines.
//!
//! Submodules:
//! - `reader`: parses adapter stdout into [`Event`]s.
//! - `spawner`: launches adapter processes and waits for their ready line.
//! - `process`: [`ProcessEngine`](process::ProcessEngine) and its launcher.

pub mod process;
pub mod reader;
pub mod spawner;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::models::event::Event;
use crate::models::key::SessionKey;
use crate::Result;

/// Boxed future returned by engine operations.
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// One running execution engine, exclusively owned by a session.
pub trait Engine: Send {
    /// Identifier of this engine instance, unique per launch.
    fn handle_id(&self) -> &str;

    /// Forward `code` for execution. Events follow on [`Engine::next_event`].
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Engine`](crate::AppError::Engine) if the request
    /// cannot be delivered.
    fn submit<'a>(&'a mut self, code: &'a str) -> EngineFuture<'a, ()>;

    /// Wait up to `wait` for the next event of the current submission.
    ///
    /// `Ok(None)` means nothing arrived in time; the stream is still alive.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Engine`](crate::AppError::Engine) once the event
    /// stream has closed or failed.
    fn next_event(&mut self, wait: Duration) -> EngineFuture<'_, Option<Event>>;

    /// Stop the engine and release its resources.
    ///
    /// Calling this on an already-closed engine is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Engine`](crate::AppError::Engine) if teardown
    /// fails; the engine is unusable either way.
    fn close(&mut self) -> EngineFuture<'_, ()>;
}

/// Starts engines on behalf of the session registry.
pub trait EngineLauncher: Send + Sync {
    /// Start a fresh engine for `key` and wait until it is ready.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Engine`](crate::AppError::Engine) if the engine
    /// cannot be started.
    fn launch<'a>(&'a self, key: &'a SessionKey) -> EngineFuture<'a, Box<dyn Engine>>;
}
