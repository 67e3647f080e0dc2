//! Engine events observed while a submission runs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::temporal::Payload;

/// Closed set of event kinds the bridge aggregates.
///
/// The serialized names are the engine's `msg_type` values and double as
/// the keys of the `messages` map in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Engine lifecycle state change.
    Status,
    /// Echo of the submitted code with the engine's execution count.
    ExecuteInput,
    /// Value of the last expression.
    ExecuteResult,
    /// Text written to stdout or stderr.
    Stream,
    /// Rich output such as images or HTML.
    DisplayData,
    /// Exception raised by the executed code.
    Error,
}

impl EventKind {
    /// The engine's `msg_type` for this kind.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::ExecuteInput => "execute_input",
            Self::ExecuteResult => "execute_result",
            Self::Stream => "stream",
            Self::DisplayData => "display_data",
            Self::Error => "error",
        }
    }

    /// Map an engine `msg_type` onto a kind, if it is one the bridge handles.
    #[must_use]
    pub fn from_wire(msg_type: &str) -> Option<Self> {
        match msg_type {
            "status" => Some(Self::Status),
            "execute_input" => Some(Self::ExecuteInput),
            "execute_result" => Some(Self::ExecuteResult),
            "stream" => Some(Self::Stream),
            "display_data" => Some(Self::DisplayData),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Engine lifecycle state carried by `status` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Engine is booting.
    Starting,
    /// Engine is working on a request.
    Busy,
    /// Engine finished all work for the current request.
    Idle,
    /// Engine is restarting itself.
    Restarting,
    /// Engine process is gone.
    Dead,
}

/// `status` content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusContent {
    /// Reported lifecycle state.
    pub execution_state: ExecutionState,
}

/// `execute_input` content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputContent {
    /// Code as the engine received it.
    #[serde(default)]
    pub code: String,
    /// Engine-assigned execution number.
    pub execution_count: u64,
}

/// `execute_result` content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultContent {
    /// Execution number the result belongs to.
    #[serde(default)]
    pub execution_count: Option<u64>,
    /// Representations keyed by MIME type.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Per-representation metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ResultContent {
    /// The `text/plain` representation, if present.
    #[must_use]
    pub fn plain_text(&self) -> Option<&str> {
        self.data.get("text/plain").and_then(Value::as_str)
    }
}

/// `stream` content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamContent {
    /// Stream name (`stdout` or `stderr`).
    #[serde(default)]
    pub name: String,
    /// Text chunk.
    pub text: String,
}

/// `display_data` content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayContent {
    /// Representations keyed by MIME type.
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// `error` content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContent {
    /// Exception type name.
    pub ename: String,
    /// Exception message.
    #[serde(default)]
    pub evalue: String,
    /// Traceback entries, possibly colorized.
    #[serde(default)]
    pub traceback: Vec<String>,
}

/// Kind-specific payload of an [`Event`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    /// See [`EventKind::Status`].
    Status(StatusContent),
    /// See [`EventKind::ExecuteInput`].
    ExecuteInput(InputContent),
    /// See [`EventKind::ExecuteResult`].
    ExecuteResult(ResultContent),
    /// See [`EventKind::Stream`].
    Stream(StreamContent),
    /// See [`EventKind::DisplayData`].
    DisplayData(DisplayContent),
    /// See [`EventKind::Error`].
    Error(ErrorContent),
}

impl EventBody {
    /// Kind tag of this body.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Status(_) => EventKind::Status,
            Self::ExecuteInput(_) => EventKind::ExecuteInput,
            Self::ExecuteResult(_) => EventKind::ExecuteResult,
            Self::Stream(_) => EventKind::Stream,
            Self::DisplayData(_) => EventKind::DisplayData,
            Self::Error(_) => EventKind::Error,
        }
    }
}

/// One message emitted by an engine during a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Typed view of the message content.
    pub body: EventBody,
    /// `msg_id` of the request this event answers, when the engine says.
    pub parent_id: Option<String>,
    /// Full message with timestamps decoded, kept for the audit trail.
    pub message: Payload,
}

impl Event {
    /// Build an event whose audit message is just the kind tag.
    ///
    /// Engines that do not speak the full message shape (and tests) use this.
    #[must_use]
    pub fn bare(body: EventBody) -> Self {
        let message = Payload::Object(vec![(
            "msg_type".to_owned(),
            Payload::String(body.kind().wire_name().to_owned()),
        )]);
        Self {
            body,
            parent_id: None,
            message,
        }
    }

    /// Kind tag of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }
}
