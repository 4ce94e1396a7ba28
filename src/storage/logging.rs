//! Call log data types and database operations.

use sqlx::SqlitePool;

use crate::error::Error;
use crate::pool::Mode;
use crate::router::{RoutedResponse, RoutedStream};

/// A completed logical call ready for database insertion.
///
/// All fields are owned types to satisfy `tokio::spawn` `'static` requirement.
#[derive(Debug, Clone)]
pub struct CallLog {
    pub correlation_id: String,
    pub timestamp: String,
    pub task: String,
    pub mode: Mode,
    /// Model that served the call; `None` when every attempt failed.
    pub model: Option<String>,
    pub provider: Option<String>,
    pub backend_model: Option<String>,
    pub tried: Vec<String>,
    pub streaming: bool,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub latency_ms: i64,
    pub success: bool,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl CallLog {
    fn base(task: &str, mode: Mode, streaming: bool, latency_ms: i64) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            task: task.to_string(),
            mode,
            model: None,
            provider: None,
            backend_model: None,
            tried: Vec::new(),
            streaming,
            input_tokens: None,
            output_tokens: None,
            latency_ms,
            success: false,
            error_kind: None,
            error_message: None,
        }
    }

    /// Entry for a call answered by `response`.
    pub fn served(task: &str, mode: Mode, response: &RoutedResponse, latency_ms: i64) -> Self {
        Self {
            model: Some(response.model_name.clone()),
            provider: Some(response.provider.to_string()),
            backend_model: Some(response.backend_model.clone()),
            tried: response.tried.clone(),
            input_tokens: response.usage.map(|u| u.prompt_tokens),
            output_tokens: response.usage.map(|u| u.completion_tokens),
            success: true,
            ..Self::base(task, mode, false, latency_ms)
        }
    }

    /// Entry for a streamed call that ran to the end without error.
    pub fn streamed(task: &str, mode: Mode, stream: &RoutedStream, latency_ms: i64) -> Self {
        Self {
            success: true,
            ..Self::from_stream(task, mode, stream, latency_ms)
        }
    }

    /// Entry for a stream that failed after the serving model was fixed.
    ///
    /// Keeps the serving model's attribution alongside `error`.
    pub fn interrupted(
        task: &str,
        mode: Mode,
        stream: &RoutedStream,
        error: &Error,
        latency_ms: i64,
    ) -> Self {
        Self {
            error_kind: Some(error.kind().to_string()),
            error_message: Some(error.to_string()),
            ..Self::from_stream(task, mode, stream, latency_ms)
        }
    }

    fn from_stream(task: &str, mode: Mode, stream: &RoutedStream, latency_ms: i64) -> Self {
        Self {
            model: Some(stream.model_name().to_string()),
            provider: Some(stream.provider().to_string()),
            backend_model: Some(stream.backend_model().to_string()),
            tried: stream.tried().to_vec(),
            ..Self::base(task, mode, true, latency_ms)
        }
    }

    /// Entry for a call that ended in `error` before any model served it.
    pub fn failed(task: &str, mode: Mode, error: &Error, streaming: bool, latency_ms: i64) -> Self {
        let model = match error {
            Error::StreamInterrupted { model, .. } => Some(model.clone()),
            _ => None,
        };
        Self {
            model,
            tried: error.tried().to_vec(),
            error_kind: Some(error.kind().to_string()),
            error_message: Some(error.to_string()),
            ..Self::base(task, mode, streaming, latency_ms)
        }
    }

    /// Insert this log entry into the database.
    pub async fn insert(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO calls (
                correlation_id, timestamp, task, mode,
                model, provider, backend_model, tried, streaming,
                input_tokens, output_tokens, latency_ms,
                success, error_kind, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.correlation_id)
        .bind(&self.timestamp)
        .bind(&self.task)
        .bind(self.mode.as_str())
        .bind(&self.model)
        .bind(&self.provider)
        .bind(&self.backend_model)
        .bind(self.tried.join(","))
        .bind(self.streaming)
        .bind(self.input_tokens.map(|v| v as i64))
        .bind(self.output_tokens.map(|v| v as i64))
        .bind(self.latency_ms)
        .bind(self.success)
        .bind(self.error_kind.as_deref())
        .bind(self.error_message.as_deref())
        .execute(pool)
        .await?;
        Ok(())
    }
}

/// Spawn a fire-and-forget database write.
///
/// If the write fails, a warning is logged but the error is not propagated.
pub fn spawn_log_write(pool: &SqlitePool, log: CallLog) -> tokio::task::JoinHandle<()> {
    let pool = pool.clone();
    tokio::spawn(async move {
        if let Err(e) = log.insert(&pool).await {
            tracing::warn!(
                correlation_id = %log.correlation_id,
                error = %e,
                "Failed to write call log to database"
            );
        }
    })
}
