//! OpenAI-compatible `/chat/completions` protocol.

use serde::Serialize;

use super::secret::ApiKey;
use super::stream::{fragment_stream, WireFormat};
use super::types::{Completion, InvocationRequest, Message, Usage};
use super::{check_status, FragmentStream};
use crate::error::InvocationError;
use crate::pool::ModelDescriptor;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

fn endpoint(model: &ModelDescriptor) -> String {
    format!("{}/chat/completions", model.base_url().trim_end_matches('/'))
}

fn build(
    client: &reqwest::Client,
    model: &ModelDescriptor,
    api_key: Option<&ApiKey>,
    request: &InvocationRequest,
    stream: bool,
) -> reqwest::RequestBuilder {
    let body = ChatRequest {
        model: &model.backend_model,
        messages: &request.messages,
        stream,
    };
    let mut builder = client.post(endpoint(model)).json(&body);
    if let Some(key) = api_key {
        builder = builder.bearer_auth(key.expose_secret());
    }
    builder
}

/// Extract token usage from a response body.
///
/// Returns `None` if the usage object is missing or incomplete.
fn extract_usage(response: &serde_json::Value) -> Option<Usage> {
    let usage = response.get("usage")?;
    let prompt_tokens = u32::try_from(usage.get("prompt_tokens")?.as_u64()?).ok()?;
    let completion_tokens = u32::try_from(usage.get("completion_tokens")?.as_u64()?).ok()?;
    Some(Usage {
        prompt_tokens,
        completion_tokens,
    })
}

/// Turn a non-streaming response body into a [`Completion`].
pub(crate) fn parse_completion(response: &serde_json::Value) -> Result<Completion, InvocationError> {
    if let Some(err) = response.get("error").filter(|e| !e.is_null()) {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(InvocationError::Provider(message));
    }

    let content = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            InvocationError::Malformed("missing choices[0].message.content".to_string())
        })?;

    Ok(Completion {
        content: content.to_string(),
        usage: extract_usage(response),
    })
}

pub(crate) async fn complete(
    client: &reqwest::Client,
    model: &ModelDescriptor,
    api_key: Option<&ApiKey>,
    request: &InvocationRequest,
) -> Result<Completion, InvocationError> {
    let call = async {
        let response = build(client, model, api_key, request, false).send().await?;
        let response = check_status(response).await?;
        let body: serde_json::Value = response.json().await?;
        parse_completion(&body)
    };

    tokio::time::timeout(request.timeout, call)
        .await
        .map_err(|_| InvocationError::Timeout(request.timeout))?
}

pub(crate) async fn open_stream(
    client: &reqwest::Client,
    model: &ModelDescriptor,
    api_key: Option<&ApiKey>,
    request: &InvocationRequest,
) -> Result<FragmentStream, InvocationError> {
    let response = tokio::time::timeout(
        request.timeout,
        build(client, model, api_key, request, true).send(),
    )
    .await
    .map_err(|_| InvocationError::Timeout(request.timeout))??;
    let response = check_status(response).await?;

    Ok(fragment_stream(
        response.bytes_stream(),
        WireFormat::Sse,
        request.timeout,
    ))
}
