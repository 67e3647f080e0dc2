//! Unit tests for deriving session keys from request identities.

use std::collections::HashSet;

use serde_json::json;

use kernel_bridge::models::key::SessionKey;
use kernel_bridge::AppError;

#[test]
fn numeric_and_string_pids_normalize_equally() {
    let numeric = SessionKey::from_identity(&json!({ "pid": 4242, "file": "/a.py" })).expect("numeric");
    let text = SessionKey::from_identity(&json!({ "pid": "4242", "file": "/a.py" })).expect("text");

    assert_eq!(numeric, text);
    assert_eq!(numeric.to_string(), "4242:/a.py");
}

#[test]
fn buffer_is_part_of_the_identity() {
    let plain = SessionKey::from_identity(&json!({ "pid": 1, "file": "/a.py" })).expect("plain");
    let tab = SessionKey::from_identity(&json!({ "pid": 1, "file": "/a.py", "buf": 3 })).expect("tab");

    assert_ne!(plain, tab);
    assert_eq!(tab.buffer.as_deref(), Some("3"));
    assert_eq!(tab.to_string(), "1:/a.py#3");

    let keys: HashSet<_> = [plain.clone(), tab, plain].into_iter().collect();
    assert_eq!(keys.len(), 2);
}

#[test]
fn extra_fields_are_ignored() {
    let key = SessionKey::from_identity(&json!({ "pid": 1, "file": "/a.py", "cwd": "/" })).expect("key");

    assert_eq!(key, SessionKey::new("1", "/a.py", None));
}

#[test]
fn missing_pid_is_an_identity_error() {
    let err = SessionKey::from_identity(&json!({ "file": "/a.py" })).unwrap_err();

    assert!(matches!(err, AppError::Identity(_)));
    assert!(err.to_string().contains("id.pid"));
}

#[test]
fn empty_file_is_an_identity_error() {
    let err = SessionKey::from_identity(&json!({ "pid": 1, "file": "  " })).unwrap_err();

    assert!(matches!(err, AppError::Identity(_)));
    assert!(err.to_string().contains("id.file"));
}

#[test]
fn non_object_identity_is_rejected() {
    let err = SessionKey::from_identity(&json!("4242:/a.py")).unwrap_err();

    assert!(matches!(err, AppError::Identity(_)));
}
