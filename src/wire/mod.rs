//! Newline-delimited JSON plumbing.
//!
//! - `codec`: bounded line framing for inbound streams.
//! - `writer`: the single task that owns an outbound stream.

pub mod codec;
pub mod writer;
