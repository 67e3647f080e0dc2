//! Unit tests for escape stripping and traceback cleaning.

use kernel_bridge::sanitize::{clean_traceback, strip};

fn lines(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|line| (*line).to_owned()).collect()
}

// ── strip ───────────────────────────────────────────────────────────────────

#[test]
fn strip_removes_color_codes_and_trims() {
    assert_eq!(strip("  \u{1b}[1;31mValueError\u{1b}[0m: bad  \n"), "ValueError: bad");
}

#[test]
fn strip_removes_cursor_movement() {
    assert_eq!(strip("\u{1b}[2K\u{1b}[1Gprogress 100%"), "progress 100%");
}

#[test]
fn strip_leaves_plain_text_alone() {
    assert_eq!(strip("no escapes here"), "no escapes here");
}

#[test]
fn strip_of_only_escapes_is_empty() {
    assert_eq!(strip("\u{1b}[0m\u{1b}[31m"), "");
}

// ── clean_traceback ─────────────────────────────────────────────────────────

/// Colorized entries become plain lines; the raw entries are kept verbatim.
#[test]
fn colorized_traceback_is_split_into_plain_and_raw() {
    let raw = lines(&["\u{1b}[31mTrace\u{1b}[0m", "line2"]);

    let traceback = clean_traceback(&raw);

    assert_eq!(traceback.plain, vec!["Trace", "line2"]);
    assert_eq!(traceback.colorized, raw);
}

/// Entries that hold several physical lines are split apart.
#[test]
fn multi_line_entries_are_split() {
    let raw = lines(&[
        "Traceback (most recent call last):\n  File \"<cell>\", line 1",
        "ZeroDivisionError: division by zero",
    ]);

    let traceback = clean_traceback(&raw);

    assert_eq!(
        traceback.plain,
        vec![
            "Traceback (most recent call last):",
            "  File \"<cell>\", line 1",
            "ZeroDivisionError: division by zero",
        ]
    );
    assert_eq!(traceback.colorized.len(), 2);
}

/// NUL join markers and carriage returns become line breaks.
#[test]
fn control_join_markers_become_newlines() {
    let raw = lines(&["first\u{0}second\r\nthird\rfourth"]);

    let traceback = clean_traceback(&raw);

    assert_eq!(traceback.plain, vec!["first", "second", "third", "fourth"]);
}

/// Trailing padding on each line is removed; inner indentation is kept.
#[test]
fn trailing_whitespace_is_trimmed_per_line() {
    let raw = lines(&["Traceback", "    indented   ", "tail\t"]);

    let traceback = clean_traceback(&raw);

    assert_eq!(traceback.plain, vec!["Traceback", "    indented", "tail"]);
}

#[test]
fn empty_traceback_yields_no_lines() {
    let traceback = clean_traceback(&[]);

    assert!(traceback.plain.is_empty());
    assert!(traceback.colorized.is_empty());
}

/// Cleaning already-clean lines gives back the same lines.
#[test]
fn cleaning_is_idempotent_on_plain_text() {
    let raw = lines(&[
        "\u{1b}[0;31m---------------------------------------------------------------------------\u{1b}[0m",
        "\u{1b}[0;31mKeyError\u{1b}[0m                                  Traceback (most recent call last)",
        "Cell \u{1b}[0;32mIn[3], line 1\u{1b}[0m\n\u{1b}[0;32m----> 1\u{1b}[0m d[\u{1b}[38;5;124m'x'\u{1b}[39m]\r\n",
        "\u{1b}[0;31mKeyError\u{1b}[0m: 'x'",
    ]);

    let once = clean_traceback(&raw);
    let twice = clean_traceback(&once.plain);

    assert_eq!(twice.plain, once.plain);
    assert!(once.plain.iter().all(|line| !line.contains('\u{1b}')));
}

/// An escape spliced together by removing an inner one is removed as well.
#[test]
fn nested_escape_sequences_are_fully_removed() {
    assert_eq!(strip("\u{1b}\u{1b}[0m[31mTrace"), "Trace");
}

/// Spliced escapes do not break idempotence of the plain lines.
#[test]
fn cleaning_spliced_escapes_is_idempotent() {
    let raw = lines(&["\u{1b}\u{1b}[0m[31mTrace", "\u{1b}\u{1b}\u{1b}[0m[0m[1mline2"]);

    let once = clean_traceback(&raw);
    let twice = clean_traceback(&once.plain);

    assert_eq!(once.plain, vec!["Trace", "line2"]);
    assert_eq!(twice.plain, once.plain);
}
