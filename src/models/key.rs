//! Session routing identity.

use std::fmt::{Display, Formatter};

use serde_json::Value;

use crate::{AppError, Result};

/// Stable identity of one session: client process, target file, and an
/// optional buffer/tab discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    /// Front-end process id, normalized to text.
    pub pid: String,
    /// Target file path as sent by the front-end.
    pub file: String,
    /// Buffer or tab identifier separating sessions on the same file.
    pub buffer: Option<String>,
}

impl SessionKey {
    /// Construct a key from already-normalized parts.
    #[must_use]
    pub fn new(pid: impl Into<String>, file: impl Into<String>, buffer: Option<String>) -> Self {
        Self {
            pid: pid.into(),
            file: file.into(),
            buffer,
        }
    }

    /// Derive a key from the request `id` object.
    ///
    /// `pid` and `buf` may be integers or strings; `file` must be a
    /// non-empty string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Identity` when `id` is not an object or a required
    /// field is missing or empty.
    pub fn from_identity(id: &Value) -> Result<Self> {
        let Value::Object(fields) = id else {
            return Err(AppError::Identity(format!(
                "`id` must be an object, got {id}"
            )));
        };

        let pid = fields
            .get("pid")
            .and_then(scalar_text)
            .ok_or_else(|| AppError::Identity("missing required field: `id.pid`".into()))?;

        let file = fields
            .get("file")
            .and_then(Value::as_str)
            .filter(|file| !file.trim().is_empty())
            .ok_or_else(|| AppError::Identity("missing required field: `id.file`".into()))?;

        let buffer = fields.get("buf").and_then(scalar_text);

        Ok(Self::new(pid, file, buffer))
    }
}

impl Display for SessionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.buffer {
            Some(buffer) => write!(f, "{}:{}#{buffer}", self.pid, self.file),
            None => write!(f, "{}:{}", self.pid, self.file),
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        _ => None,
    }
}
