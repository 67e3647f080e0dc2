//! Unit tests for front-end request parsing and response records.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use kernel_bridge::gateway::request::{parse_request, Request};
use kernel_bridge::gateway::response::{control_ack, exec_response, shutdown_all_ack};
use kernel_bridge::models::event::{Event, EventBody, EventKind, StreamContent};
use kernel_bridge::models::key::SessionKey;
use kernel_bridge::models::report::{ExecutionReport, Outcome, PrimaryPayload};
use kernel_bridge::temporal::decode;
use kernel_bridge::AppError;

// ── Requests ────────────────────────────────────────────────────────────────

#[test]
fn exec_request_parses() {
    let request = parse_request(
        r#"{"type":"exec","id":{"pid":4242,"file":"/src/a.py"},"cell_id":"c-1","code":"2 + 2"}"#,
    )
    .expect("parse")
    .expect("request");

    assert_eq!(
        request,
        Request::Exec {
            key: SessionKey::new("4242", "/src/a.py", None),
            cell_id: json!("c-1"),
            code: "2 + 2".into(),
        }
    );
}

#[test]
fn exec_without_cell_id_echoes_null() {
    let request = parse_request(r#"{"type":"exec","id":{"pid":1,"file":"/a.py"},"code":""}"#)
        .expect("parse")
        .expect("request");

    assert!(matches!(request, Request::Exec { cell_id: Value::Null, .. }));
}

#[test]
fn control_requests_keep_raw_identity() {
    let id = json!({ "pid": 1, "file": "/a.py", "buf": 2 });

    let restart = parse_request(&json!({ "type": "restart", "id": id }).to_string())
        .expect("parse")
        .expect("request");
    let shutdown = parse_request(&json!({ "type": "shutdown", "id": id }).to_string())
        .expect("parse")
        .expect("request");

    let key = SessionKey::new("1", "/a.py", Some("2".into()));
    assert_eq!(restart, Request::Restart { key: key.clone(), id: id.clone() });
    assert_eq!(shutdown, Request::Shutdown { key, id });
}

#[test]
fn shutdown_all_forms_are_equivalent() {
    for line in [
        r#"{"type":"shutdown_all"}"#,
        r#"{"type":"shutdown","id":"all"}"#,
        r#"{"type":"shutdown","target":"all"}"#,
    ] {
        let request = parse_request(line).expect("parse").expect("request");
        assert_eq!(request, Request::ShutdownAll, "{line}");
    }
}

#[test]
fn blank_request_line_is_skipped() {
    assert!(parse_request("").expect("parse").is_none());
}

#[test]
fn missing_identity_is_an_identity_error() {
    let err = parse_request(r#"{"type":"restart"}"#).unwrap_err();

    assert!(matches!(err, AppError::Identity(_)));
}

#[test]
fn missing_code_is_a_protocol_error() {
    let err = parse_request(r#"{"type":"exec","id":{"pid":1,"file":"/a.py"}}"#).unwrap_err();

    assert!(matches!(err, AppError::Protocol(ref msg) if msg.contains("code")));
}

#[test]
fn unknown_type_is_a_protocol_error() {
    let err = parse_request(r#"{"type":"interrupt"}"#).unwrap_err();

    assert!(matches!(err, AppError::Protocol(ref msg) if msg.contains("interrupt")));
}

#[test]
fn invalid_json_is_a_protocol_error() {
    assert!(matches!(parse_request("{"), Err(AppError::Protocol(_))));
}

// ── Responses ───────────────────────────────────────────────────────────────

#[test]
fn exec_response_has_the_wire_shape() {
    let stamped = Event {
        body: EventBody::Stream(StreamContent {
            name: "stdout".into(),
            text: "4".into(),
        }),
        parent_id: None,
        message: decode(json!({
            "header": { "msg_type": "stream", "date": "2024-05-01T12:30:45.123456+00:00" },
            "content": { "name": "stdout", "text": "4" },
        })),
    };
    let report = ExecutionReport {
        outcome: Outcome::Ok,
        execution_count: 3,
        text: "4".into(),
        input: None,
        primary: Some(PrimaryPayload::Stream(StreamContent {
            name: "stdout".into(),
            text: "4".into(),
        })),
        messages: BTreeMap::from([(EventKind::Stream, vec![stamped])]),
        error: None,
    };

    let response = exec_response(&report, &json!(12));

    assert_eq!(
        response,
        json!({
            "status": "ok",
            "execution_count": 3,
            "cell_id": 12,
            "text": "4",
            "input": null,
            "result": { "kind": "stream", "name": "stdout", "text": "4" },
            "messages": {
                "stream": [{
                    "header": { "msg_type": "stream", "date": "2024-05-01T12:30:45.123456+00:00" },
                    "content": { "name": "stdout", "text": "4" },
                }],
            },
        })
    );
}

#[test]
fn error_result_carries_diagnostic_fields() {
    let mut aggregator = kernel_bridge::session::aggregate::Aggregator::new();
    aggregator.absorb(Event::bare(EventBody::Error(kernel_bridge::models::event::ErrorContent {
        ename: "KeyError".into(),
        evalue: "'x'".into(),
        traceback: vec!["\u{1b}[31mKeyError\u{1b}[0m: 'x'".into()],
    })));
    let report = aggregator.finish(2);

    let response = exec_response(&report, &Value::Null);

    assert_eq!(response["status"], "error");
    assert_eq!(response["result"]["kind"], "error");
    assert_eq!(response["result"]["ename"], "KeyError");
    assert_eq!(response["result"]["traceback"]["plain"], json!(["KeyError: 'x'"]));
    assert_eq!(
        response["result"]["traceback"]["colorized"],
        json!(["\u{1b}[31mKeyError\u{1b}[0m: 'x'"])
    );
    assert_eq!(response["messages"]["error"][0]["msg_type"], "error");
}

#[test]
fn no_response_report_includes_reason() {
    let report = ExecutionReport::no_response("engine: event stream closed", 4);

    let response = exec_response(&report, &json!("c"));

    assert_eq!(response["status"], "no_response");
    assert_eq!(response["execution_count"], 4);
    assert_eq!(response["error"], "engine: event stream closed");
    assert_eq!(response["result"], Value::Null);
    assert_eq!(response["messages"], json!({}));
}

#[test]
fn acknowledgements_have_fixed_shapes() {
    let id = json!({ "pid": 1, "file": "/a.py" });

    assert_eq!(
        control_ack("restart", &id, Ok(true)),
        json!({ "type": "restart", "status": "ok", "id": id, "found": true })
    );
    assert_eq!(
        control_ack("shutdown", &id, Err("engine: stuck".into())),
        json!({ "type": "shutdown", "status": "error", "id": id, "error": "engine: stuck" })
    );
    assert_eq!(
        shutdown_all_ack(2),
        json!({ "type": "shutdown_all", "status": "ok", "sessions": 2 })
    );
}
