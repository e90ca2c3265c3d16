// src/classify.rs
//
// Verdicts from Defects4J's free-text test output.
//
// The rules match substrings of what `defects4j test` prints today
// ("Failing tests: N" followed by "  - Class::method" lines, "FAIL" after a
// broken ant target). A change in that output format breaks them; swap the
// `Classifier` implementation rather than teaching callers about the text.

use std::sync::OnceLock;

use regex::Regex;

use crate::exec::TIMEOUT_SENTINEL;
use crate::state::Correctness;

pub const BUILD_FAIL_MARKER: &str = "FAIL";
pub const ZERO_FAILING_MARKER: &str = "Failing tests: 0";
const ENTRY_DELIMITER: &str = " - ";

pub trait Classifier: Send + Sync {
    fn classify(&self, stdout: &str, stderr: &str) -> Correctness;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct D4jTextClassifier;

impl Classifier for D4jTextClassifier {
    fn classify(&self, stdout: &str, stderr: &str) -> Correctness {
        if is_timeout(stdout) || is_timeout(stderr) {
            Correctness::Timeout
        } else if stdout.contains(BUILD_FAIL_MARKER) || stderr.contains(BUILD_FAIL_MARKER) {
            Correctness::Uncompilable
        } else if stdout.contains(ZERO_FAILING_MARKER) {
            Correctness::Plausible
        } else {
            // listed failures and unrecognised output both land here
            Correctness::Wrong
        }
    }
}

fn is_timeout(stream: &str) -> bool {
    stream.trim() == TIMEOUT_SENTINEL
}

/// Dash-delimited failing-test entries of a `defects4j test` run.
pub fn failing_tests(stdout: &str) -> Vec<String> {
    stdout
        .split(ENTRY_DELIMITER)
        .skip(1)
        .map(|entry| entry.trim().to_string())
        .collect()
}

/// The `Failing tests: N` header, when present.
pub fn reported_failing_count(stdout: &str) -> Option<usize> {
    static HEADER: OnceLock<Option<Regex>> = OnceLock::new();
    let re = HEADER
        .get_or_init(|| Regex::new(r"Failing tests:\s*(\d+)").ok())
        .as_ref()?;

    re.captures_iter(stdout)
        .last()
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
}

/// One test name per non-empty line of a `defects4j export` listing.
pub fn parse_listing(stdout: &str) -> Vec<String> {
    if is_timeout(stdout) {
        return Vec::new();
    }

    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
