//! Front-end request parsing.
//!
//! ```json
//! {"type":"exec","id":{"pid":4242,"file":"/src/a.py"},"cell_id":7,"code":"2 + 2"}
//! {"type":"restart","id":{"pid":4242,"file":"/src/a.py"}}
//! {"type":"shutdown","id":{"pid":4242,"file":"/src/a.py","buf":3}}
//! {"type":"shutdown_all"}
//! ```

use serde::Deserialize;
use serde_json::Value;

use crate::models::key::SessionKey;
use crate::{AppError, Result};

/// Marker value that turns a `shutdown` into a `shutdown_all`.
const ALL_TARGET: &str = "all";

/// One decoded front-end request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Run `code` in the session for `key`.
    Exec {
        /// Target session.
        key: SessionKey,
        /// Caller's request identifier, echoed in the response.
        cell_id: Value,
        /// Code to execute.
        code: String,
    },
    /// Replace the session for `key` with a fresh engine.
    Restart {
        /// Target session.
        key: SessionKey,
        /// Raw `id` object, echoed in acknowledgements.
        id: Value,
    },
    /// Shut down the session for `key`.
    Shutdown {
        /// Target session.
        key: SessionKey,
        /// Raw `id` object, echoed in acknowledgements.
        id: Value,
    },
    /// Shut down every session and stop serving.
    ShutdownAll,
}

#[derive(Debug, Deserialize)]
struct RawRequest {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    target: Option<Value>,
    #[serde(default)]
    cell_id: Option<Value>,
    #[serde(default)]
    code: Option<String>,
}

/// Parse one request line.
///
/// Returns `Ok(None)` for blank lines.
///
/// # Errors
///
/// - `AppError::Protocol`: invalid JSON, unknown `type`, or missing `code`.
/// - `AppError::Identity`: missing or incomplete `id`.
pub fn parse_request(line: &str) -> Result<Option<Request>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let raw: RawRequest = serde_json::from_str(line)?;

    let request = match raw.kind.as_str() {
        "exec" => {
            let key = identity(raw.id.as_ref())?;
            let code = raw
                .code
                .ok_or_else(|| AppError::Protocol("missing required field: `code`".into()))?;
            Request::Exec {
                key,
                cell_id: raw.cell_id.unwrap_or(Value::Null),
                code,
            }
        }
        "restart" => Request::Restart {
            key: identity(raw.id.as_ref())?,
            id: raw.id.unwrap_or(Value::Null),
        },
        "shutdown" if targets_all(&raw) => Request::ShutdownAll,
        "shutdown" => Request::Shutdown {
            key: identity(raw.id.as_ref())?,
            id: raw.id.unwrap_or(Value::Null),
        },
        "shutdown_all" => Request::ShutdownAll,
        other => {
            return Err(AppError::Protocol(format!("unknown request type: {other}")));
        }
    };

    Ok(Some(request))
}

fn identity(id: Option<&Value>) -> Result<SessionKey> {
    let id = id.ok_or_else(|| AppError::Identity("missing required field: `id`".into()))?;
    SessionKey::from_identity(id)
}

fn targets_all(raw: &RawRequest) -> bool {
    [&raw.id, &raw.target]
        .into_iter()
        .any(|field| field.as_ref().and_then(Value::as_str) == Some(ALL_TARGET))
}
