//! Per-call fallback state.
//!
//! A [`CallAttempt`] lives for one logical call. It records which models were
//! tried and decides, after each failure, whether to fall back and to which
//! model. It never performs I/O, so the async, blocking, and streaming entry
//! points all drive the same decisions.

use crate::config::{RoutingPolicy, SelectionStrategy};
use crate::error::{ExhaustionReason, InvocationError, RoutingExhausted};
use crate::pool::{Mode, ModelDescriptor, ModelPool};

pub(crate) struct CallAttempt<'a> {
    pool: &'a ModelPool,
    policy: &'a RoutingPolicy,
    task: &'a str,
    mode: Mode,
    tried: Vec<String>,
}

impl<'a> CallAttempt<'a> {
    pub fn new(pool: &'a ModelPool, policy: &'a RoutingPolicy, task: &'a str, mode: Mode) -> Self {
        Self {
            pool,
            policy,
            task,
            mode,
            tried: Vec::new(),
        }
    }

    /// Record that `model` is about to be invoked.
    pub fn begin(&mut self, model: &ModelDescriptor) {
        self.tried.push(model.name.clone());
        tracing::info!(
            model = %model.name,
            attempt = self.tried.len(),
            max_attempts = self.policy.max_total_attempts,
            task = %self.task,
            mode = %self.mode,
            "Invoking model"
        );
    }

    /// Record a failure of the most recent attempt and pick the next model.
    ///
    /// Returns the exhaustion error once retries are off, the budget is
    /// spent, or no untried candidate is left.
    pub fn fail(&mut self, error: InvocationError) -> Result<&'a ModelDescriptor, RoutingExhausted> {
        let failed = self.tried.last().map(String::as_str).unwrap_or_default();
        tracing::warn!(
            model = %failed,
            attempt = self.tried.len(),
            max_attempts = self.policy.max_total_attempts,
            error = %error,
            "Model invocation failed"
        );

        if !self.policy.retry_on_failure {
            return Err(self.exhausted(ExhaustionReason::RetryDisabled, error));
        }
        if self.tried.len() >= self.policy.max_total_attempts as usize {
            return Err(self.exhausted(ExhaustionReason::BudgetSpent, error));
        }

        match self.next_candidate() {
            Some(next) => {
                tracing::info!(
                    from = %failed,
                    to = %next.name,
                    task = %self.task,
                    mode = %self.mode,
                    "Falling back to next candidate"
                );
                Ok(next)
            }
            None => Err(self.exhausted(ExhaustionReason::NoCandidates, error)),
        }
    }

    /// Models tried so far, in order.
    pub fn tried(&self) -> &[String] {
        &self.tried
    }

    pub fn into_tried(self) -> Vec<String> {
        self.tried
    }

    fn next_candidate(&self) -> Option<&'a ModelDescriptor> {
        let candidates = match self.policy.selection_strategy {
            SelectionStrategy::Priority => self.pool.find_by_task_and_mode(self.task, self.mode),
        };
        candidates
            .into_iter()
            .find(|m| !self.tried.iter().any(|t| *t == m.name))
    }

    fn exhausted(&self, reason: ExhaustionReason, last_error: InvocationError) -> RoutingExhausted {
        tracing::error!(
            task = %self.task,
            mode = %self.mode,
            tried = ?self.tried,
            reason = %reason,
            "Routing exhausted"
        );
        RoutingExhausted {
            task: self.task.to_string(),
            mode: self.mode,
            tried: self.tried.clone(),
            reason,
            last_error,
        }
    }
}
