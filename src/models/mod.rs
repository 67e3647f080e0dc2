//! Domain model module declarations.

pub mod event;
pub mod key;
pub mod report;
