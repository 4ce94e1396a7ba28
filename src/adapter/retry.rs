//! Same-model retries on transient provider errors.
//!
//! These retries happen inside a single router attempt: the router's
//! `max_total_attempts` budget does not see them.

use std::time::Duration;

use crate::error::InvocationError;

/// Fixed backoff: 1s, 2s, 4s. Retries past the third reuse the last slot.
const BACKOFF_DURATIONS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Record of a single failed attempt against one model.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub model_name: String,
}

/// Trait for extracting an HTTP status code from an error.
///
/// Allows the retry loop to inspect error status codes without
/// depending on provider types.
pub trait HasStatusCode {
    fn status_code(&self) -> Option<u16>;
}

impl HasStatusCode for InvocationError {
    fn status_code(&self) -> Option<u16> {
        InvocationError::status_code(self)
    }
}

/// Whether an HTTP status code should trigger a same-model retry.
///
/// Returns `true` for 500, 502, 503, 504 (server errors that are typically transient).
/// Returns `false` for all other codes including 4xx (permanent client errors).
pub fn is_retryable(status_code: u16) -> bool {
    matches!(status_code, 500 | 502 | 503 | 504)
}

/// Format attempt records as `"2/gpt-4o"` counts per model, in first-appearance order.
///
/// Returns `None` if the attempts slice is empty (no retries occurred).
pub fn format_attempts(attempts: &[AttemptRecord]) -> Option<String> {
    if attempts.is_empty() {
        return None;
    }
    let mut counts: Vec<(&str, u32)> = Vec::new();
    for attempt in attempts {
        if let Some(entry) = counts
            .iter_mut()
            .find(|(name, _)| *name == attempt.model_name)
        {
            entry.1 += 1;
        } else {
            counts.push((&attempt.model_name, 1));
        }
    }
    Some(
        counts
            .iter()
            .map(|(name, count)| format!("{}/{}", count, name))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Run `send` up to `max_retries + 1` times against the same model.
///
/// Only errors carrying a retryable status are retried; anything else is
/// returned immediately. Each failure is pushed into `attempts`.
pub async fn retry_transient<T, E, F, Fut>(
    model_name: &str,
    max_retries: u32,
    attempts: &mut Vec<AttemptRecord>,
    send: F,
) -> Result<T, E>
where
    E: HasStatusCode,
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;

    loop {
        if attempt > 0 {
            let slot = (attempt as usize - 1).min(BACKOFF_DURATIONS.len() - 1);
            tokio::time::sleep(BACKOFF_DURATIONS[slot]).await;
        }

        match send().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let status = err.status_code();
                attempts.push(AttemptRecord {
                    model_name: model_name.to_string(),
                });

                let retryable = status.is_some_and(is_retryable);
                if !retryable || attempt >= max_retries {
                    return Err(err);
                }

                tracing::debug!(
                    model = %model_name,
                    status = ?status,
                    retry = attempt + 1,
                    max_retries,
                    "Transient provider error, retrying same model"
                );
                attempt += 1;
            }
        }
    }
}
