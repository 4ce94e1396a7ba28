//! Invocation adapter.
//!
//! Turns one [`ModelDescriptor`] plus a message list into a provider call.
//! The router only ever sees the [`Invoker`] trait; provider wire formats,
//! credentials, and same-model transient retries live here.

mod ollama;
mod openai;
pub mod retry;
pub mod secret;
mod stream;
pub mod types;

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::InvocationError;
use crate::pool::{ModelDescriptor, ProviderKind};
use retry::{format_attempts, retry_transient};
use secret::{ApiKey, SecretResolver};

pub use stream::WireFormat;
pub use types::{Completion, InvocationRequest, Message, Role, Usage};

/// Ordered content fragments from one model.
///
/// An `Err` item is always the last item.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, InvocationError>> + Send>>;

/// Something that can call a model.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Run a request to completion.
    async fn invoke(
        &self,
        model: &ModelDescriptor,
        request: &InvocationRequest,
    ) -> Result<Completion, InvocationError>;

    /// Open a streaming call.
    ///
    /// Returns once the provider has accepted the request; fragments arrive
    /// through the returned stream.
    async fn invoke_stream(
        &self,
        model: &ModelDescriptor,
        request: &InvocationRequest,
    ) -> Result<FragmentStream, InvocationError>;
}

/// [`Invoker`] that speaks HTTP to OpenAI-compatible and Ollama backends.
pub struct HttpInvoker {
    client: reqwest::Client,
    secrets: Arc<dyn SecretResolver>,
    provider_retries: u32,
}

impl HttpInvoker {
    /// Create an invoker with its own HTTP client.
    pub fn new(secrets: Arc<dyn SecretResolver>) -> Result<Self, InvocationError> {
        // No overall client timeout: streaming bodies are bounded per chunk instead.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client, secrets))
    }

    pub fn with_client(client: reqwest::Client, secrets: Arc<dyn SecretResolver>) -> Self {
        Self {
            client,
            secrets,
            provider_retries: 0,
        }
    }

    /// Same-model retries on 500/502/503/504 inside one router attempt.
    pub fn with_provider_retries(mut self, retries: u32) -> Self {
        self.provider_retries = retries;
        self
    }

    fn credential(&self, model: &ModelDescriptor) -> Result<Option<ApiKey>, InvocationError> {
        match &model.connection.credential {
            Some(reference) => Ok(Some(self.secrets.resolve(reference)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Invoker for HttpInvoker {
    async fn invoke(
        &self,
        model: &ModelDescriptor,
        request: &InvocationRequest,
    ) -> Result<Completion, InvocationError> {
        let key = self.credential(model)?;
        let key = key.as_ref();
        let client = &self.client;
        let mut attempts = Vec::new();

        tracing::debug!(
            model = %model.name,
            provider = %model.provider,
            backend_model = %model.backend_model,
            url = %model.base_url(),
            "Invoking model"
        );

        let result = retry_transient(&model.name, self.provider_retries, &mut attempts, move || async move {
            match model.provider {
                ProviderKind::OpenAi => openai::complete(client, model, key, request).await,
                ProviderKind::Ollama => ollama::complete(client, model, key, request).await,
            }
        })
        .await;

        log_recovery(model, &attempts, result.is_ok());
        result
    }

    async fn invoke_stream(
        &self,
        model: &ModelDescriptor,
        request: &InvocationRequest,
    ) -> Result<FragmentStream, InvocationError> {
        let key = self.credential(model)?;
        let key = key.as_ref();
        let client = &self.client;
        let mut attempts = Vec::new();

        tracing::debug!(
            model = %model.name,
            provider = %model.provider,
            backend_model = %model.backend_model,
            url = %model.base_url(),
            "Opening model stream"
        );

        let result = retry_transient(&model.name, self.provider_retries, &mut attempts, move || async move {
            match model.provider {
                ProviderKind::OpenAi => openai::open_stream(client, model, key, request).await,
                ProviderKind::Ollama => ollama::open_stream(client, model, key, request).await,
            }
        })
        .await;

        log_recovery(model, &attempts, result.is_ok());
        result
    }
}

fn log_recovery(model: &ModelDescriptor, attempts: &[retry::AttemptRecord], succeeded: bool) {
    if !succeeded {
        return;
    }
    if let Some(retries) = format_attempts(attempts) {
        tracing::debug!(model = %model.name, retries = %retries, "Recovered after transient errors");
    }
}

/// Pass through 2xx responses; turn anything else into [`InvocationError::Status`].
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, InvocationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(status = %status, body = %body, "Provider returned error");
    Err(InvocationError::Status {
        status: status.as_u16(),
        body,
    })
}
