//! Engine event reader task.
//!
//! Reads newline-delimited JSON messages from an engine adapter's stdout,
//! parses each line into an [`Event`], and forwards the events through a
//! tokio [`mpsc`] channel. Dropping the sender (on EOF or I/O failure) is how
//! the owning engine learns that its event stream is gone.
//!
//! # Known message types
//!
//! | `header.msg_type` | Maps to                       |
//! |-------------------|-------------------------------|
//! | `status`          | [`EventBody::Status`]         |
//! | `execute_input`   | [`EventBody::ExecuteInput`]   |
//! | `execute_result`  | [`EventBody::ExecuteResult`]  |
//! | `stream`          | [`EventBody::Stream`]         |
//! | `display_data`    | [`EventBody::DisplayData`]    |
//! | `error`           | [`EventBody::Error`]          |
//! | *(any other)*     | Skipped; logged at `DEBUG`    |

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::event::{Event, EventBody, EventKind};
use crate::temporal;
use crate::wire::codec::NdjsonCodec;
use crate::{AppError, Result};

#[derive(Debug, Deserialize)]
struct Header {
    msg_type: String,
}

#[derive(Debug, Default, Deserialize)]
struct ParentHeader {
    #[serde(default)]
    msg_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    header: Header,
    #[serde(default)]
    parent_header: Option<ParentHeader>,
    #[serde(default)]
    content: Value,
}

/// Parse a single NDJSON line from an engine into an [`Event`].
///
/// - `Ok(Some(event))`: a recognized, complete message.
/// - `Ok(None)`: blank line or a `msg_type` the bridge does not aggregate.
///
/// # Errors
///
/// - `AppError::Engine("malformed json: …")`: not valid JSON.
/// - `AppError::Engine("missing required field: …")`: no `header.msg_type`,
///   or the content of a known type lacks a required field.
pub fn parse_event_line(line: &str) -> Result<Option<Event>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let message: Value =
        serde_json::from_str(line).map_err(|e| AppError::Engine(format!("malformed json: {e}")))?;
    parse_event(message)
}

/// Parse an already-decoded engine message into an [`Event`].
///
/// # Errors
///
/// See [`parse_event_line`].
pub fn parse_event(message: Value) -> Result<Option<Event>> {
    let envelope = Envelope::deserialize(&message)
        .map_err(|e| AppError::Engine(format!("missing required field: {e}")))?;

    let Some(kind) = EventKind::from_wire(&envelope.header.msg_type) else {
        debug!(
            msg_type = envelope.header.msg_type.as_str(),
            "engine reader: skipping unhandled message type"
        );
        return Ok(None);
    };

    let content = &envelope.content;
    let body = match kind {
        EventKind::Status => EventBody::Status(content_of(kind, content)?),
        EventKind::ExecuteInput => EventBody::ExecuteInput(content_of(kind, content)?),
        EventKind::ExecuteResult => EventBody::ExecuteResult(content_of(kind, content)?),
        EventKind::Stream => EventBody::Stream(content_of(kind, content)?),
        EventKind::DisplayData => EventBody::DisplayData(content_of(kind, content)?),
        EventKind::Error => EventBody::Error(content_of(kind, content)?),
    };

    let parent_id = envelope.parent_header.and_then(|parent| parent.msg_id);

    Ok(Some(Event {
        body,
        parent_id,
        message: temporal::decode(message),
    }))
}

/// Reader task: turns engine stdout lines into [`Event`]s on `event_tx`.
///
/// Malformed and oversized lines are logged and skipped. The task ends,
/// dropping `event_tx`, on EOF, on an I/O error, when the receiver is gone,
/// or when `cancel` fires.
pub async fn run_reader<R>(
    engine_id: String,
    stdout: R,
    event_tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, NdjsonCodec::new());
    let mut recovering = false;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(engine_id, "engine reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    // FramedRead yields one `None` after a decode error before resuming.
                    None if recovering => recovering = false,

                    None => {
                        debug!(engine_id, "engine reader: EOF detected");
                        break;
                    }

                    Some(Err(AppError::Protocol(ref msg))) => {
                        warn!(engine_id, error = msg.as_str(), "engine reader: framing error, skipping");
                        recovering = true;
                    }

                    Some(Err(e)) => {
                        warn!(engine_id, error = %e, "engine reader: IO error, stopping");
                        break;
                    }

                    Some(Ok(line)) => match parse_event_line(&line) {
                        Ok(Some(event)) => {
                            if event_tx.send(event).await.is_err() {
                                debug!(engine_id, "engine reader: event_tx closed, stopping");
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(engine_id, error = %e, raw_line = %line, "engine reader: parse error, skipping line");
                        }
                    },
                }
            }
        }
    }
}

fn content_of<T: DeserializeOwned>(kind: EventKind, content: &Value) -> Result<T> {
    T::deserialize(content).map_err(|e| {
        AppError::Engine(format!(
            "missing required field: {} content: {e}",
            kind.wire_name()
        ))
    })
}
