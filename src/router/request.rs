//! Caller-facing request and response shapes.

use std::time::Duration;

use crate::adapter::{Message, Usage};
use crate::pool::{Mode, ProviderKind, WILDCARD_TAG};

/// One logical call to route.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub messages: Vec<Message>,
    /// Task category; defaults to the wildcard `"general"`.
    pub task: String,
    /// Overrides the policy's default mode.
    pub mode: Option<Mode>,
    /// Overrides the policy's per-attempt timeout.
    pub timeout: Option<Duration>,
}

impl RouteRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            task: WILDCARD_TAG.to_string(),
            mode: None,
            timeout: None,
        }
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = task.into();
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A successful non-streaming call, attributed to the model that served it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedResponse {
    pub content: String,
    pub model_name: String,
    pub provider: ProviderKind,
    pub backend_model: String,
    /// Every model attempted, in order; the last one served the call.
    pub tried: Vec<String>,
    pub usage: Option<Usage>,
}
