//! Unit tests for folding a submission's events into a report.

use serde_json::{json, Map};

use kernel_bridge::models::event::{
    DisplayContent, ErrorContent, Event, EventBody, EventKind, ExecutionState, InputContent,
    ResultContent, StatusContent, StreamContent,
};
use kernel_bridge::models::report::{Outcome, PrimaryPayload};
use kernel_bridge::session::aggregate::Aggregator;

fn status(state: ExecutionState) -> Event {
    Event::bare(EventBody::Status(StatusContent {
        execution_state: state,
    }))
}

fn input(count: u64) -> Event {
    Event::bare(EventBody::ExecuteInput(InputContent {
        code: "2 + 2".into(),
        execution_count: count,
    }))
}

fn result(text: &str) -> Event {
    let mut data = Map::new();
    data.insert("text/plain".into(), json!(text));
    Event::bare(EventBody::ExecuteResult(ResultContent {
        execution_count: None,
        data,
        metadata: Map::new(),
    }))
}

fn stream(text: &str) -> Event {
    Event::bare(EventBody::Stream(StreamContent {
        name: "stdout".into(),
        text: text.into(),
    }))
}

/// input(1), result "4", idle → ok, count 1, text "4".
#[test]
fn simple_result_is_reported() {
    let mut aggregator = Aggregator::new();

    assert_eq!(aggregator.absorb(input(1)), None);
    assert_eq!(aggregator.absorb(result("4")), None);
    assert_eq!(aggregator.absorb(status(ExecutionState::Idle)), Some(ExecutionState::Idle));
    assert_eq!(aggregator.reported_count(), Some(1));

    let report = aggregator.finish(1);

    assert_eq!(report.outcome, Outcome::Ok);
    assert_eq!(report.execution_count, 1);
    assert_eq!(report.text, "4");
    assert!(report.error.is_none());
}

/// Error with a colorized traceback → error outcome and a clean diagnostic.
#[test]
fn error_is_reported_with_clean_traceback() {
    let mut aggregator = Aggregator::new();
    aggregator.absorb(Event::bare(EventBody::Error(ErrorContent {
        ename: "ZeroDivisionError".into(),
        evalue: "division by zero".into(),
        traceback: vec!["\u{1b}[31mTrace\u{1b}[0m".into(), "line2".into()],
    })));
    aggregator.absorb(status(ExecutionState::Idle));

    let report = aggregator.finish(1);
    let diagnostic = report.diagnostic().expect("diagnostic");

    assert_eq!(report.outcome, Outcome::Error);
    assert_eq!(diagnostic.traceback.plain, vec!["Trace", "line2"]);
    assert_eq!(
        diagnostic.traceback.colorized,
        vec!["\u{1b}[31mTrace\u{1b}[0m", "line2"]
    );
    assert_eq!(report.text, "", "errors do not add to the text");
}

/// The last result-like event wins the primary slot.
#[test]
fn last_payload_is_primary() {
    let mut aggregator = Aggregator::new();
    aggregator.absorb(result("1"));
    aggregator.absorb(stream("out"));
    aggregator.absorb(result("2"));

    let report = aggregator.finish(1);

    assert_eq!(report.text, "1out2");
    match report.primary {
        Some(PrimaryPayload::ExecuteResult(content)) => {
            assert_eq!(content.plain_text(), Some("2"));
        }
        other => panic!("unexpected primary {other:?}"),
    }
}

/// Rich display output is audited but not merged into text or primary.
#[test]
fn display_data_is_only_audited() {
    let mut aggregator = Aggregator::new();
    let mut data = Map::new();
    data.insert("image/png".into(), json!("iVBORw0KGgo="));
    aggregator.absorb(Event::bare(EventBody::DisplayData(DisplayContent { data })));

    let report = aggregator.finish(1);

    assert_eq!(report.text, "");
    assert!(report.primary.is_none());
    assert_eq!(report.events(EventKind::DisplayData).len(), 1);
}

/// Results without a plain-text form still become primary.
#[test]
fn result_without_plain_text_adds_no_text() {
    let mut aggregator = Aggregator::new();
    let mut data = Map::new();
    data.insert("text/html".into(), json!("<b>x</b>"));
    aggregator.absorb(Event::bare(EventBody::ExecuteResult(ResultContent {
        execution_count: Some(1),
        data,
        metadata: Map::new(),
    })));

    let report = aggregator.finish(1);

    assert_eq!(report.text, "");
    assert!(matches!(report.primary, Some(PrimaryPayload::ExecuteResult(_))));
}

/// Every event is kept, grouped by kind in arrival order.
#[test]
fn events_are_grouped_by_kind() {
    let mut aggregator = Aggregator::new();
    for event in [
        status(ExecutionState::Busy),
        input(7),
        stream("a"),
        stream("b"),
        status(ExecutionState::Idle),
    ] {
        aggregator.absorb(event);
    }

    let report = aggregator.finish(7);

    assert_eq!(report.events(EventKind::Status).len(), 2);
    assert_eq!(report.events(EventKind::ExecuteInput).len(), 1);
    let chunks: Vec<_> = report
        .events(EventKind::Stream)
        .iter()
        .map(|event| match &event.body {
            EventBody::Stream(chunk) => chunk.text.clone(),
            other => panic!("unexpected body {other:?}"),
        })
        .collect();
    assert_eq!(chunks, vec!["a", "b"]);
    assert!(report.events(EventKind::Error).is_empty());
}

/// The most recent input echo decides the count.
#[test]
fn latest_input_echo_wins() {
    let mut aggregator = Aggregator::new();
    aggregator.absorb(input(4));
    aggregator.absorb(input(5));

    assert_eq!(aggregator.reported_count(), Some(5));
}
