//! Response records written to the front-end.

use serde_json::{json, Map, Value};

use crate::models::report::ExecutionReport;
use crate::temporal;

/// Build the `exec` response for `report`.
///
/// Every audited message is passed through [`temporal::encode`] so its
/// timestamps leave as ISO-8601 text.
#[must_use]
pub fn exec_response(report: &ExecutionReport, cell_id: &Value) -> Value {
    let messages: Map<String, Value> = report
        .messages
        .iter()
        .map(|(kind, events)| {
            let encoded = events
                .iter()
                .map(|event| temporal::encode(&event.message))
                .collect();
            (kind.wire_name().to_owned(), Value::Array(encoded))
        })
        .collect();

    let mut response = json!({
        "status": report.outcome,
        "execution_count": report.execution_count,
        "cell_id": cell_id,
        "text": report.text,
        "input": report.input,
        "result": report.primary,
        "messages": messages,
    });

    if let (Some(error), Value::Object(fields)) = (&report.error, &mut response) {
        fields.insert("error".to_owned(), Value::String(error.clone()));
    }

    response
}

/// Acknowledgement for a `restart` or `shutdown` request.
#[must_use]
pub fn control_ack(kind: &str, id: &Value, outcome: Result<bool, String>) -> Value {
    match outcome {
        Ok(found) => json!({ "type": kind, "status": "ok", "id": id, "found": found }),
        Err(error) => json!({ "type": kind, "status": "error", "id": id, "error": error }),
    }
}

/// Confirmation written once `shutdown_all` has drained every session.
#[must_use]
pub fn shutdown_all_ack(sessions: usize) -> Value {
    json!({ "type": "shutdown_all", "status": "ok", "sessions": sessions })
}
