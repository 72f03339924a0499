use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error kinds surfaced to callers in `ToolResult.error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    NotFound,
    Timeout,
    InvalidInput,
    Unavailable,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NotFound => "NotFound",
            ErrorCategory::Timeout => "Timeout",
            ErrorCategory::InvalidInput => "InvalidInput",
            ErrorCategory::Unavailable => "Unavailable",
            ErrorCategory::Unknown => "Unknown",
        }
    }

    /// Timeouts and unreachable backends can succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorCategory::Timeout | ErrorCategory::Unavailable)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub category: ErrorCategory,
    pub message: String,
    pub suggestions: Vec<String>,
}

impl ErrorInfo {
    /// Builds an error carrying the default suggestions for its category.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            suggestions: super::classifier::default_suggestions(category),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::InvalidInput, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unavailable, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unknown, message)
    }

    /// Replaces the suggestions, keeping the defaults when `suggestions` is empty.
    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        if !suggestions.is_empty() {
            self.suggestions = suggestions;
        }
        self
    }

    /// Puts a context-specific suggestion first, keeping at most three.
    pub fn with_leading_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.insert(0, suggestion.into());
        self.suggestions.truncate(3);
        self
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

impl std::error::Error for ErrorInfo {}
