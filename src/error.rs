//! Error types for modelroute.

use std::time::Duration;

use crate::adapter::secret::ResolutionError;
use crate::pool::Mode;

/// Result type alias for modelroute operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for modelroute.
///
/// Only [`InvocationError`] is recovered inside the router's fallback loop;
/// every variant here reaches the caller as-is.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("No default model configured for task '{task}' in mode '{mode}'")]
    NoDefaultModel { task: String, mode: Mode },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    RoutingExhausted(Box<RoutingExhausted>),

    #[error(
        "Stream from model '{model}' interrupted after {fragments_delivered} fragment(s): {source}"
    )]
    StreamInterrupted {
        model: String,
        fragments_delivered: usize,
        #[source]
        source: InvocationError,
    },

    #[error("Failed to start blocking runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl Error {
    /// Stable snake_case label, used in logs and the call log table.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "configuration",
            Error::NoDefaultModel { .. } => "no_default_model",
            Error::InvalidRequest(_) => "invalid_request",
            Error::RoutingExhausted(_) => "routing_exhausted",
            Error::StreamInterrupted { .. } => "stream_interrupted",
            Error::Runtime(_) => "runtime",
        }
    }

    /// Model names tried before the call gave up, in attempt order.
    pub fn tried(&self) -> &[String] {
        match self {
            Error::RoutingExhausted(exhausted) => &exhausted.tried,
            _ => &[],
        }
    }
}

impl From<RoutingExhausted> for Error {
    fn from(exhausted: RoutingExhausted) -> Self {
        Error::RoutingExhausted(Box::new(exhausted))
    }
}

/// Why the fallback loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionReason {
    /// `retry_on_failure` is off, so the first failure is terminal.
    RetryDisabled,
    /// `max_total_attempts` invocations were made.
    BudgetSpent,
    /// Every candidate for the task and mode has already been tried.
    NoCandidates,
}

impl std::fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExhaustionReason::RetryDisabled => write!(f, "retry on failure is disabled"),
            ExhaustionReason::BudgetSpent => write!(f, "attempt budget spent"),
            ExhaustionReason::NoCandidates => write!(f, "no untried candidates left"),
        }
    }
}

/// Terminal failure of the fallback loop.
#[derive(Debug, thiserror::Error)]
#[error(
    "All models for task '{task}' in mode '{mode}' failed ({reason}). Tried: [{}]. Last error: {last_error}",
    .tried.join(", ")
)]
pub struct RoutingExhausted {
    pub task: String,
    pub mode: Mode,
    /// Model names in the order they were attempted.
    pub tried: Vec<String>,
    pub reason: ExhaustionReason,
    #[source]
    pub last_error: InvocationError,
}

/// A single model invocation failed.
///
/// Provider-specific failures (HTTP status, transport, decoding) are all
/// folded into this one type so the router never inspects provider details.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Provider reported an error: {0}")]
    Provider(String),

    #[error("Credential unavailable: {0}")]
    Credential(#[from] ResolutionError),
}

impl InvocationError {
    /// HTTP status code reported by the provider, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            InvocationError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for InvocationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            InvocationError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            InvocationError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            InvocationError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_display_lists_tried_models() {
        let err = Error::from(RoutingExhausted {
            task: "general".to_string(),
            mode: Mode::Cloud,
            tried: vec!["m1".to_string(), "m2".to_string()],
            reason: ExhaustionReason::NoCandidates,
            last_error: InvocationError::Status {
                status: 503,
                body: "overloaded".to_string(),
            },
        });

        let msg = err.to_string();
        assert!(msg.contains("[m1, m2]"), "{}", msg);
        assert!(msg.contains("no untried candidates left"), "{}", msg);
        assert!(msg.contains("503"), "{}", msg);
        assert_eq!(err.kind(), "routing_exhausted");
        assert_eq!(err.tried(), ["m1".to_string(), "m2".to_string()]);
    }

    #[test]
    fn test_no_default_model_message() {
        let err = Error::NoDefaultModel {
            task: "coding".to_string(),
            mode: Mode::Local,
        };
        assert_eq!(
            err.to_string(),
            "No default model configured for task 'coding' in mode 'local'"
        );
        assert!(err.tried().is_empty());
    }

    #[test]
    fn test_status_code_only_for_status_variant() {
        let status = InvocationError::Status {
            status: 502,
            body: String::new(),
        };
        assert_eq!(status.status_code(), Some(502));
        assert_eq!(
            InvocationError::Timeout(Duration::from_secs(1)).status_code(),
            None
        );
    }
}
