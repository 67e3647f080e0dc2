//! Reduction of one submission's event stream into an [`ExecutionReport`].
//!
//! Events arrive in no guaranteed order except that the `status: idle`
//! event closing the submission comes last. The aggregator therefore keeps
//! absorbing everything, including events after an `error`, and only the
//! caller decides, from the returned state, when the stream is over.

use std::collections::BTreeMap;

use tracing::{debug, error, info};

use crate::models::event::{Event, EventBody, EventKind, ExecutionState, InputContent};
use crate::models::report::{Diagnostic, ExecutionReport, Outcome, PrimaryPayload};
use crate::sanitize;

/// Result under construction for one submission.
#[derive(Debug, Default)]
pub struct Aggregator {
    failed: bool,
    text: String,
    input: Option<InputContent>,
    primary: Option<PrimaryPayload>,
    messages: BTreeMap<EventKind, Vec<Event>>,
}

impl Aggregator {
    /// Start an empty aggregation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the report.
    ///
    /// Returns the reported state for `status` events and `None` for every
    /// other kind.
    pub fn absorb(&mut self, event: Event) -> Option<ExecutionState> {
        let mut reported = None;

        match &event.body {
            EventBody::Status(status) => {
                info!(state = ?status.execution_state, "engine status");
                reported = Some(status.execution_state);
            }
            EventBody::ExecuteInput(input) => {
                info!(execution_count = input.execution_count, code = input.code.as_str(), "input");
                self.input = Some(input.clone());
            }
            EventBody::ExecuteResult(result) => {
                if let Some(text) = result.plain_text() {
                    self.text.push_str(text);
                }
                info!(data = ?result.data, "result");
                self.primary = Some(PrimaryPayload::ExecuteResult(result.clone()));
            }
            EventBody::Stream(stream) => {
                self.text.push_str(&stream.text);
                debug!(name = stream.name.as_str(), text = stream.text.as_str(), "stream");
                self.primary = Some(PrimaryPayload::Stream(stream.clone()));
            }
            EventBody::DisplayData(rich) => {
                info!(mime_types = ?rich.data.keys().collect::<Vec<_>>(), "rich display");
            }
            EventBody::Error(err) => {
                let traceback = sanitize::clean_traceback(&err.traceback);
                error!(
                    ename = err.ename.as_str(),
                    evalue = err.evalue.as_str(),
                    traceback = %traceback.plain.join("\n"),
                    "execution error"
                );
                self.failed = true;
                self.primary = Some(PrimaryPayload::Error(Diagnostic {
                    ename: err.ename.clone(),
                    evalue: err.evalue.clone(),
                    traceback,
                }));
            }
        }

        self.messages.entry(event.kind()).or_default().push(event);
        reported
    }

    /// Execution count from the most recent `execute_input`, if one arrived.
    #[must_use]
    pub fn reported_count(&self) -> Option<u64> {
        self.input.as_ref().map(|input| input.execution_count)
    }

    /// Close the aggregation with the session's final execution count.
    #[must_use]
    pub fn finish(self, execution_count: u64) -> ExecutionReport {
        ExecutionReport {
            outcome: if self.failed {
                Outcome::Error
            } else {
                Outcome::Ok
            },
            execution_count,
            text: self.text,
            input: self.input,
            primary: self.primary,
            messages: self.messages,
            error: None,
        }
    }
}
