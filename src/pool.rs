//! Model pool registry.
//!
//! The pool is the static, validated list of every model the router may
//! invoke. It is built once from configuration and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::ConfigError;

/// Tag that makes a model a candidate for every task category.
pub const WILDCARD_TAG: &str = "general";

/// Coarse deployment axis that filters candidate models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Cloud-hosted provider APIs.
    #[serde(alias = "online")]
    Cloud,
    /// Locally hosted inference servers.
    Local,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Cloud => "cloud",
            Mode::Local => "local",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cloud" | "online" => Ok(Mode::Cloud),
            "local" => Ok(Mode::Local),
            other => Err(format!("unknown mode '{}' (expected cloud or local)", other)),
        }
    }
}

/// Wire protocol spoken to a model's backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ProviderKind {
    /// OpenAI-compatible `/chat/completions` API.
    #[serde(rename = "openai")]
    OpenAi,
    /// Ollama `/api/chat` API.
    #[serde(rename = "ollama")]
    Ollama,
}

impl ProviderKind {
    /// Provider assumed when the configuration does not name one.
    pub fn default_for(mode: Mode) -> Self {
        match mode {
            Mode::Cloud => ProviderKind::OpenAi,
            Mode::Local => ProviderKind::Ollama,
        }
    }

    /// Base URL used when a descriptor has no `base_url`.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Ollama => "http://localhost:11434",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how to reach a model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connection {
    pub base_url: Option<String>,
    /// Opaque reference handed to the secret resolver, never the secret itself.
    pub credential: Option<String>,
}

/// One invocable model in the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    /// Unique name within the pool.
    pub name: String,
    /// Provider-specific model string (e.g. "gpt-4o", "llama3.1:8b").
    pub backend_model: String,
    pub mode: Mode,
    pub provider: ProviderKind,
    /// Task categories this model is suitable for.
    pub tags: Vec<String>,
    pub enabled: bool,
    pub connection: Connection,
    /// Higher value is preferred among otherwise-equal candidates.
    pub priority: i32,
}

impl ModelDescriptor {
    /// Create an enabled descriptor with no tags, priority 0, and the
    /// mode's default provider.
    pub fn new(name: impl Into<String>, backend_model: impl Into<String>, mode: Mode) -> Self {
        Self {
            name: name.into(),
            backend_model: backend_model.into(),
            mode,
            provider: ProviderKind::default_for(mode),
            tags: Vec::new(),
            enabled: true,
            connection: Connection::default(),
            priority: 0,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.connection.base_url = Some(base_url.into());
        self
    }

    pub fn with_credential(mut self, reference: impl Into<String>) -> Self {
        self.connection.credential = Some(reference.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether this model can serve `task` (directly or through the wildcard tag).
    pub fn serves(&self, task: &str) -> bool {
        self.tags.iter().any(|t| t == task || t == WILDCARD_TAG)
    }

    /// Base URL to call, falling back to the provider default.
    pub fn base_url(&self) -> &str {
        self.connection
            .base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }
}

/// Registry of every invocable model.
#[derive(Debug, Clone)]
pub struct ModelPool {
    models: Vec<ModelDescriptor>,
}

impl ModelPool {
    /// Build the registry, rejecting duplicate names.
    pub fn new(models: Vec<ModelDescriptor>) -> Result<Self, ConfigError> {
        let problems = duplicate_name_problems(&models);
        if !problems.is_empty() {
            return Err(ConfigError::Validation { problems });
        }
        Ok(Self { models })
    }

    /// Look up a descriptor by its unique name.
    pub fn find_by_name(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Enabled models for `task` in `mode`, highest priority first.
    ///
    /// Ties keep registry order (the sort is stable).
    pub fn find_by_task_and_mode(&self, task: &str, mode: Mode) -> Vec<&ModelDescriptor> {
        let mut candidates: Vec<&ModelDescriptor> = self
            .models
            .iter()
            .filter(|m| m.enabled && m.mode == mode && m.serves(task))
            .collect();
        candidates.sort_by_key(|m| std::cmp::Reverse(m.priority));
        candidates
    }

    /// All descriptors in registry order.
    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// One problem line per name that appears more than once.
pub(crate) fn duplicate_name_problems(models: &[ModelDescriptor]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut problems = Vec::new();
    for model in models {
        if !seen.insert(model.name.as_str()) && reported.insert(model.name.as_str()) {
            problems.push(format!("Duplicate model name '{}' in pool", model.name));
        }
    }
    problems
}
