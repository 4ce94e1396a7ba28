//! Credential resolution.
//!
//! Pool entries carry only a credential *reference*; the secret is looked up
//! by a [`SecretResolver`] at invocation time and never stored in config.

use secrecy::{ExposeSecret, SecretString};
use serde::{Serialize, Serializer};

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// Only accessible via `.expose_secret()` (grep-auditable).
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value. Every call site is auditable via `grep expose_secret`.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// A credential reference could not be turned into a secret.
#[derive(Debug, Clone, thiserror::Error)]
#[error("credential '{reference}' could not be resolved: {reason}")]
pub struct ResolutionError {
    pub reference: String,
    pub reason: String,
}

/// Turns a credential reference into a usable secret.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> Result<ApiKey, ResolutionError>;
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves references as environment variable names.
///
/// `OPENAI_API_KEY` and `env:OPENAI_API_KEY` are equivalent.
pub struct EnvSecretResolver {
    lookup: Lookup,
}

impl EnvSecretResolver {
    /// Resolve against the process environment.
    pub fn new() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve against a custom lookup, keeping tests off global env state.
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
        }
    }
}

impl Default for EnvSecretResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretResolver for EnvSecretResolver {
    fn resolve(&self, reference: &str) -> Result<ApiKey, ResolutionError> {
        let var = reference.strip_prefix("env:").unwrap_or(reference).trim();
        if var.is_empty() {
            return Err(ResolutionError {
                reference: reference.to_string(),
                reason: "empty environment variable name".to_string(),
            });
        }

        match (self.lookup)(var) {
            Some(value) if !value.is_empty() => Ok(ApiKey::from(value)),
            Some(_) => Err(ResolutionError {
                reference: reference.to_string(),
                reason: format!("environment variable '{}' is empty", var),
            }),
            None => Err(ResolutionError {
                reference: reference.to_string(),
                reason: format!("environment variable '{}' is not set", var),
            }),
        }
    }
}
