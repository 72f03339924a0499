//! Maps raw failures onto an [`ErrorCategory`] with ranked recovery suggestions.
//!
//! Typed backend errors are classified by variant; anything else is matched
//! against a table of message signatures. Classification never fails: an
//! unrecognized fault becomes `Unknown` with a generic suggestion.

use super::types::{ErrorCategory, ErrorInfo};
use super::ServerError;
use crate::core::ExecutorError;
use regex::Regex;
use std::sync::OnceLock;

const MAX_MESSAGE_LEN: usize = 500;

struct Signature {
    category: ErrorCategory,
    pattern: Regex,
    suggestions: &'static [&'static str],
}

// Checked in order; the first match wins.
const SIGNATURES: &[(ErrorCategory, &str, &[&str])] = &[
    (
        ErrorCategory::Unavailable,
        r"(?i)(not installed|connection refused|econnrefused|unavailable|unreachable|browser (has )?(closed|crashed|disconnected)|driver (exited|not running)|broken pipe|\b50[234]\b)",
        &[
            "Check that the automation backend is installed and running",
            "Retry once the backend is reachable again",
            "Verify the driver command in the server configuration",
        ],
    ),
    (
        ErrorCategory::Timeout,
        r"(?i)(timed? ?out|timeout|deadline exceeded|took too long)",
        &[
            "Increase the timeout for this call",
            "Wait for the page to finish loading before retrying",
            "Check network connectivity to the target page",
        ],
    ),
    (
        ErrorCategory::NotFound,
        r"(?i)(not found|no such|does not exist|unable to locate|could not find|unknown (tool|session|element)|\b404\b)",
        &[
            "Verify the selector or name spelling",
            "Wait for dynamic content to load before interacting",
            "Check whether the element is inside an iframe",
        ],
    ),
    (
        ErrorCategory::InvalidInput,
        r"(?i)(invalid|malformed|unsupported|missing required|expected .+ got|bad request|\b400\b)",
        &[
            "Check the arguments against the tool's inputSchema",
            "Verify argument types and required fields",
        ],
    ),
];

fn signatures() -> &'static [Signature] {
    static TABLE: OnceLock<Vec<Signature>> = OnceLock::new();
    TABLE.get_or_init(|| {
        SIGNATURES
            .iter()
            .filter_map(|(category, pattern, suggestions)| {
                Regex::new(pattern).ok().map(|pattern| Signature {
                    category: *category,
                    pattern,
                    suggestions: *suggestions,
                })
            })
            .collect()
    })
}

/// Suggestions attached to an error of `category` when nothing more specific is known.
pub fn default_suggestions(category: ErrorCategory) -> Vec<String> {
    let suggestions: &[&str] = match category {
        ErrorCategory::Unknown => &[
            "Inspect the server logs for details",
            "Retry the call and report the issue if it persists",
        ],
        other => signatures()
            .iter()
            .find(|s| s.category == other)
            .map(|s| s.suggestions)
            .unwrap_or(&["Inspect the server logs for details"]),
    };
    suggestions.iter().map(|s| s.to_string()).collect()
}

/// Classifies a free-form failure message.
pub fn classify_message(message: &str) -> ErrorInfo {
    let message = sanitize(message);
    match signatures().iter().find(|s| s.pattern.is_match(&message)) {
        Some(signature) => ErrorInfo {
            category: signature.category,
            message,
            suggestions: signature.suggestions.iter().map(|s| s.to_string()).collect(),
        },
        None => ErrorInfo::unknown(message),
    }
}

/// Classifies anything displayable by its message.
pub fn classify<E: std::fmt::Display + ?Sized>(err: &E) -> ErrorInfo {
    classify_message(&err.to_string())
}

/// Keeps the first line only, so backend stack traces never reach the caller.
fn sanitize(message: &str) -> String {
    let first_line = message
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("unspecified failure");
    if first_line.chars().count() > MAX_MESSAGE_LEN {
        let truncated: String = first_line.chars().take(MAX_MESSAGE_LEN).collect();
        format!("{}...", truncated)
    } else {
        first_line.to_string()
    }
}

/// Conversion of a failure into caller-facing [`ErrorInfo`].
pub trait Classify {
    fn error_info(&self) -> ErrorInfo;
}

impl Classify for ErrorInfo {
    fn error_info(&self) -> ErrorInfo {
        self.clone()
    }
}

impl Classify for ExecutorError {
    fn error_info(&self) -> ErrorInfo {
        match self {
            ExecutorError::NotFound(msg) => ErrorInfo::not_found(sanitize(msg)),
            ExecutorError::Timeout(msg) => ErrorInfo::timeout(sanitize(msg)),
            ExecutorError::InvalidArgument(msg) => ErrorInfo::invalid_input(sanitize(msg)),
            ExecutorError::Unavailable(msg) => ErrorInfo::unavailable(sanitize(msg)),
            ExecutorError::Failed(msg) => classify_message(msg),
        }
    }
}

impl Classify for ServerError {
    fn error_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.category(), sanitize(&self.to_string()))
    }
}
