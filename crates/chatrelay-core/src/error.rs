//! Error types for chatrelay

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::routing::AttemptTrace;

/// Result type alias using chatrelay's Error
pub type Result<T> = std::result::Result<T, Error>;

/// chatrelay error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (E100-E199)
    #[error("Configuration error: {0}. Set provider API keys and run `chatrelay providers` to check.")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Routing errors (E200-E299)
    #[error("All providers failed after {} attempt(s):\n{}", .trace.iter().filter(|t| !t.skipped).count(), render_trace(.trace))]
    AllProvidersFailed { trace: Vec<AttemptTrace> },

    #[error("Request cancelled by caller after {} attempt(s)", .trace.iter().filter(|t| !t.skipped).count())]
    Cancelled { trace: Vec<AttemptTrace> },

    // Storage errors (E300-E399)
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Network errors (E400-E499)
    #[error("Network error: {0}. Check your internet connection.")]
    Network(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "E100",
            Self::InvalidInput(_) => "E101",
            Self::AllProvidersFailed { .. } => "E201",
            Self::Cancelled { .. } => "E202",
            Self::Storage(_) => "E300",
            Self::Serialization(_) => "E301",
            Self::Network(_) => "E400",
            Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Configuration(_) => Some("chatrelay config list".to_string()),
            Self::AllProvidersFailed { .. } => Some("chatrelay health".to_string()),
            Self::Network(_) => Some("Check internet connection".to_string()),
            _ => None,
        }
    }

    /// The ordered attempt trace carried by routing failures.
    ///
    /// Empty for every error raised before an attempt was made.
    pub fn trace(&self) -> &[AttemptTrace] {
        match self {
            Self::AllProvidersFailed { trace } | Self::Cancelled { trace } => trace,
            _ => &[],
        }
    }
}

fn render_trace(trace: &[AttemptTrace]) -> String {
    trace
        .iter()
        .map(|t| format!("  - {t}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Classification of a single provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Rate limits, 5xx, overload, connection resets
    Transient,
    /// The attempt lost the race against the per-attempt timer
    Timeout,
    /// Credentials, bad request, unsupported model
    Hard,
    /// HTTP success without usable text
    Empty,
    /// The caller cancelled the request while the attempt was running
    Cancelled,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Timeout => write!(f, "timeout"),
            Self::Hard => write!(f, "hard"),
            Self::Empty => write!(f, "empty"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A classified failure from one provider call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error{}: {message}", render_status(.status))]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    /// HTTP status, when the backend answered at all
    pub status: Option<u16>,
    pub message: String,
}

fn render_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Transient, message)
    }

    pub fn hard(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Hard, message)
    }

    pub fn empty(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Empty, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ProviderErrorKind::Timeout,
            format!("no response within {}ms", after.as_millis()),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(ProviderErrorKind::Cancelled, "attempt cancelled")
    }

    /// Attach the HTTP status code
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Classify a non-success HTTP response
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = body.trim();
        let lower = body.to_lowercase();

        let kind = if is_model_error(&lower) {
            ProviderErrorKind::Hard
        } else if is_overload_error(&lower) {
            ProviderErrorKind::Transient
        } else {
            match status {
                400 | 401 | 403 | 404 | 422 => ProviderErrorKind::Hard,
                _ => ProviderErrorKind::Transient,
            }
        };

        let message = match status {
            401 => "Unauthorized: invalid API key".to_string(),
            403 => format!("Forbidden: {body}"),
            429 => format!("Rate limited: {body}"),
            500..=599 => format!("Server error: {body}"),
            _ => format!("HTTP error: {body}"),
        };

        Self::new(kind, message).with_status(status)
    }

    /// Classify a transport-level failure
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else {
            ProviderErrorKind::Transient
        };
        let error = Self::new(kind, err.to_string());
        match err.status() {
            Some(status) => error.with_status(status.as_u16()),
            None => error,
        }
    }

    /// Whether retrying the same provider could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Transient | ProviderErrorKind::Timeout | ProviderErrorKind::Empty
        )
    }
}

/// Check if an error body indicates the model itself is unusable
fn is_model_error(lower: &str) -> bool {
    ["unsupported model", "model not found", "does not exist", "invalid model"]
        .iter()
        .any(|pattern| lower.contains(pattern))
}

/// Check if an error body indicates temporary backend pressure
fn is_overload_error(lower: &str) -> bool {
    ["overloaded", "unavailable", "capacity", "try again"]
        .iter()
        .any(|pattern| lower.contains(pattern))
}
