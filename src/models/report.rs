//! Aggregated outcome of one submission.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::event::{Event, EventKind, InputContent, ResultContent, StreamContent};
use crate::sanitize::Traceback;

/// How a submission ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Code ran to completion.
    Ok,
    /// Code raised an exception; see the [`Diagnostic`].
    Error,
    /// The engine never answered: stream failure, refused, or shut down.
    NoResponse,
}

/// Structured exception report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Exception type name.
    pub ename: String,
    /// Exception message.
    pub evalue: String,
    /// Traceback in plain and colorized form.
    pub traceback: Traceback,
}

/// Last result-like payload of a submission, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrimaryPayload {
    /// Value of the last expression.
    ExecuteResult(ResultContent),
    /// Last chunk of stream output.
    Stream(StreamContent),
    /// Exception raised by the code.
    Error(Diagnostic),
}

/// Everything one submission produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    /// Final outcome.
    pub outcome: Outcome,
    /// Session execution counter after this submission.
    pub execution_count: u64,
    /// All textual output in arrival order.
    pub text: String,
    /// Last `execute_input` echo, if any.
    pub input: Option<InputContent>,
    /// Last result, stream chunk, or diagnostic.
    pub primary: Option<PrimaryPayload>,
    /// Every event received, grouped by kind in arrival order.
    pub messages: BTreeMap<EventKind, Vec<Event>>,
    /// Why the engine did not answer, for [`Outcome::NoResponse`].
    pub error: Option<String>,
}

impl ExecutionReport {
    /// Report for a submission the engine never answered.
    #[must_use]
    pub fn no_response(reason: impl Into<String>, execution_count: u64) -> Self {
        Self {
            outcome: Outcome::NoResponse,
            execution_count,
            text: String::new(),
            input: None,
            primary: None,
            messages: BTreeMap::new(),
            error: Some(reason.into()),
        }
    }

    /// Events of one kind, in arrival order.
    #[must_use]
    pub fn events(&self, kind: EventKind) -> &[Event] {
        self.messages.get(&kind).map_or(&[][..], Vec::as_slice)
    }

    /// The diagnostic, when the code raised an exception.
    #[must_use]
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match &self.primary {
            Some(PrimaryPayload::Error(diagnostic)) => Some(diagnostic),
            _ => None,
        }
    }
}
