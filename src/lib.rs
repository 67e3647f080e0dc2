#![forbid(unsafe_code)]

//! `kernel-bridge`: a line-delimited JSON bridge between an editor front-end
//! and interactive execution engines.

pub mod config;
pub mod engine;
pub mod errors;
pub mod gateway;
pub mod models;
pub mod sanitize;
pub mod session;
pub mod temporal;
pub mod wire;

pub use config::BridgeConfig;
pub use errors::{AppError, Result};
