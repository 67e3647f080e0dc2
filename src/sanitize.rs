//! Terminal escape stripping and traceback normalization.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// CSI sequences (colors, cursor movement) and OSC sequences (titles, links).
const ANSI_PATTERN: &str = r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]";

fn ansi_regex() -> Option<&'static Regex> {
    static ANSI: OnceLock<Option<Regex>> = OnceLock::new();
    ANSI.get_or_init(|| Regex::new(ANSI_PATTERN).ok()).as_ref()
}

/// Traceback text in both display forms.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Traceback {
    /// Escape-free lines, one entry per physical line.
    pub plain: Vec<String>,
    /// Lines exactly as the engine reported them.
    pub colorized: Vec<String>,
}

/// Remove ANSI escape sequences and trim surrounding whitespace.
///
/// The result never contains a complete escape sequence, even when removing
/// one sequence splices its neighbours into another.
#[must_use]
pub fn strip(text: &str) -> String {
    let Some(ansi) = ansi_regex() else {
        return text.trim().to_owned();
    };

    let mut current = text.to_owned();
    while ansi.is_match(&current) {
        current = ansi.replace_all(&current, "").into_owned();
    }
    current.trim().to_owned()
}

/// Build a [`Traceback`] from raw engine traceback entries.
///
/// Entries are joined with newlines, NUL join-markers and carriage returns
/// become newlines, escapes are removed, and the result is split back into
/// lines with trailing whitespace trimmed. Running the result through again
/// yields the same `plain` lines.
#[must_use]
pub fn clean_traceback(lines: &[String]) -> Traceback {
    let joined = lines
        .join("\n")
        .replace("\r\n", "\n")
        .replace(['\0', '\r'], "\n");

    let stripped = strip(&joined);
    let plain = if stripped.is_empty() {
        Vec::new()
    } else {
        stripped
            .split('\n')
            .map(|line| line.trim_end().to_owned())
            .collect()
    };

    Traceback {
        plain,
        colorized: lines.to_vec(),
    }
}
