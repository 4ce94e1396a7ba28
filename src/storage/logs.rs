//! Call log queries.

use sqlx::SqlitePool;

/// A single call log row from the database.
#[derive(Debug, sqlx::FromRow)]
pub struct CallRow {
    pub id: i64,
    pub correlation_id: String,
    pub timestamp: String,
    pub task: String,
    pub mode: String,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub backend_model: Option<String>,
    pub tried: String,
    pub streaming: bool,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub latency_ms: i64,
    pub success: bool,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl CallRow {
    /// Tried models in attempt order.
    pub fn tried_models(&self) -> Vec<&str> {
        self.tried.split(',').filter(|s| !s.is_empty()).collect()
    }
}

/// Most recent calls first, optionally restricted to one task.
///
/// The task comparison is case-insensitive.
pub async fn recent_calls(
    pool: &SqlitePool,
    limit: u32,
    task: Option<&str>,
) -> Result<Vec<CallRow>, sqlx::Error> {
    let mut sql = String::from(
        "SELECT id, correlation_id, timestamp, task, mode, model, provider, backend_model, tried, \
         streaming, input_tokens, output_tokens, latency_ms, success, error_kind, error_message \
         FROM calls",
    );

    if task.is_some() {
        sql.push_str(" WHERE LOWER(task) = LOWER(?)");
    }
    sql.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ?");

    let mut query = sqlx::query_as::<_, CallRow>(&sql);
    if let Some(t) = task {
        query = query.bind(t);
    }
    query = query.bind(limit as i64);

    query.fetch_all(pool).await
}
