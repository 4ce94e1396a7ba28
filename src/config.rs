//! Configuration parsing and validation for modelroute.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::pool::{self, Connection, Mode, ModelDescriptor, ModelPool, ProviderKind};
use crate::router::mapping::{self, DefaultMapping, MappingTable};

/// Root configuration structure.
#[derive(Debug, Clone)]
pub struct Config {
    pub routing: RoutingPolicy,
    pub pool: Vec<ModelDescriptor>,
    pub defaults: MappingTable,
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
}

/// How candidates are ordered for fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Descending `priority`, ties in registry order.
    #[default]
    Priority,
}

/// Declarative routing rules.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingPolicy {
    /// Mode used when a request does not override it
    pub default_mode: Mode,
    #[serde(default)]
    pub selection_strategy: SelectionStrategy,
    /// When false, the first failed attempt is terminal
    #[serde(default = "default_true")]
    pub retry_on_failure: bool,
    /// Hard ceiling on invocation attempts per logical call
    #[serde(default = "default_max_total_attempts")]
    pub max_total_attempts: u32,
    /// Per-attempt timeout in seconds
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Extra same-model retries the adapter performs on transient HTTP statuses
    #[serde(default)]
    pub provider_retries: u32,
}

fn default_max_total_attempts() -> u32 {
    3
}

fn default_attempt_timeout_secs() -> u64 {
    60
}

impl RoutingPolicy {
    /// Policy with the given default mode and every other field at its default.
    pub fn new(default_mode: Mode) -> Self {
        Self {
            default_mode,
            selection_strategy: SelectionStrategy::default(),
            retry_on_failure: true,
            max_total_attempts: default_max_total_attempts(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            provider_retries: 0,
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.max_total_attempts < 1 {
            problems.push("routing.max_total_attempts must be at least 1".to_string());
        }
        if self.attempt_timeout_secs == 0 {
            problems.push("routing.attempt_timeout_secs must be greater than 0".to_string());
        }
        problems
    }
}

/// Database configuration for the call log.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "./modelroute.db".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to record routed calls in the database
    #[serde(default = "default_true")]
    pub log_calls: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_calls: true,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation failed: {}", .problems.join("; "))]
    Validation { problems: Vec<String> },

    #[error("Environment variable '{var}' not set for model '{model}': {message}")]
    EnvVar {
        var: String,
        model: String,
        message: String,
    },
}

impl ConfigError {
    /// Every validation problem found, empty for non-validation errors.
    pub fn problems(&self) -> &[String] {
        match self {
            ConfigError::Validation { problems } => problems,
            _ => &[],
        }
    }
}

/// Raw pool entry deserialized directly from TOML.
/// `base_url` may contain `${VAR}` references not yet expanded.
#[derive(Deserialize)]
pub struct RawModelConfig {
    name: String,
    backend_model: String,
    mode: Mode,
    provider: Option<ProviderKind>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    base_url: Option<String>,
    credential: Option<String>,
    #[serde(default)]
    priority: i32,
}

/// Raw configuration deserialized directly from TOML.
#[derive(Deserialize)]
pub struct RawConfig {
    routing: RoutingPolicy,
    #[serde(default)]
    pool: Vec<RawModelConfig>,
    /// `task -> mode -> model`; mode keys are parsed after deserialization
    /// so `online` works as a key too.
    #[serde(default)]
    defaults: BTreeMap<String, BTreeMap<String, String>>,
    database: Option<DatabaseConfig>,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string (e.g., `${SCHEME}://${HOST}/v1`).
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, model_name: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            model: model_name.to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                model: model_name.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            model: model_name.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in model '{}')",
                var_name, model_name
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Turn string mode keys into [`Mode`], rejecting unknown or repeated modes.
fn parse_defaults(
    raw: BTreeMap<String, BTreeMap<String, String>>,
) -> Result<MappingTable, ConfigError> {
    let mut table = MappingTable::new();
    let mut problems = Vec::new();

    for (task, modes) in raw {
        let entry = table.entry(task.clone()).or_default();
        for (key, model) in modes {
            match key.parse::<Mode>() {
                Ok(mode) => {
                    if entry.insert(mode, model).is_some() {
                        problems.push(format!(
                            "Task '{}' maps mode '{}' more than once",
                            task, mode
                        ));
                    }
                }
                Err(e) => problems.push(format!("defaults.{}: {}", task, e)),
            }
        }
    }

    if problems.is_empty() {
        Ok(table)
    } else {
        Err(ConfigError::Validation { problems })
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Parse configuration from a TOML string, expanding `${VAR}` from the
    /// process environment.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse_str_with(content, |name| std::env::var(name).ok())
    }

    /// Parse configuration from a TOML string with a custom variable lookup.
    pub fn parse_str_with<F>(content: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        let config = Self::from_raw(raw, lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Convert raw (deserialized) config to final config.
    ///
    /// Expands `${VAR}` in `base_url` and fills in the mode's default
    /// provider where none was given.
    pub fn from_raw<F>(raw: RawConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut models = Vec::with_capacity(raw.pool.len());

        for rm in raw.pool {
            let base_url = match rm.base_url {
                Some(ref url) => Some(expand_env_vars_with(url, &rm.name, &lookup)?),
                None => None,
            };

            models.push(ModelDescriptor {
                provider: rm.provider.unwrap_or_else(|| ProviderKind::default_for(rm.mode)),
                name: rm.name,
                backend_model: rm.backend_model,
                mode: rm.mode,
                tags: rm.tags,
                enabled: rm.enabled,
                connection: Connection {
                    base_url,
                    credential: rm.credential,
                },
                priority: rm.priority,
            });
        }

        let defaults = parse_defaults(raw.defaults)?;

        Ok(Config {
            routing: raw.routing,
            pool: models,
            defaults,
            database: raw.database,
            logging: raw.logging,
        })
    }

    /// Validate the configuration, collecting every problem before failing.
    fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = self.routing.problems();

        for model in &self.pool {
            if model.name.trim().is_empty() {
                problems.push(format!(
                    "Model with backend '{}' has an empty name",
                    model.backend_model
                ));
            }
            if model.backend_model.trim().is_empty() {
                problems.push(format!("Model '{}' has an empty backend_model", model.name));
            }
        }

        problems.extend(pool::duplicate_name_problems(&self.pool));
        problems.extend(mapping::violations(&self.defaults, &self.pool));

        if self.pool.is_empty() {
            tracing::warn!("Model pool is empty - every call will fail");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation { problems })
        }
    }

    /// Build the validated pool, policy, and mapping the router consumes.
    pub fn into_parts(self) -> Result<(ModelPool, RoutingPolicy, DefaultMapping), ConfigError> {
        let pool = ModelPool::new(self.pool)?;
        let mapping = DefaultMapping::new(self.defaults, &pool)?;
        Ok((pool, self.routing, mapping))
    }

    /// SQLite path of the call log, or `None` when there is no `[database]`
    /// section and calls are not logged.
    pub fn call_log_path(&self) -> Option<&str> {
        self.database.as_ref().map(|db| db.path.as_str())
    }
}
