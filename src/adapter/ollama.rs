//! Ollama `/api/chat` protocol.

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

fn build(
    client: &reqwest::Client,
    model: &ModelDescriptor,
    api_key: Option<&ApiKey>,
    request: &InvocationRequest,
    stream: bool,
) -> reqwest::RequestBuilder {
    let url = format!("{}/api/chat", model.base_url().trim_end_matches('/'));
    let body = ChatRequest {
        model: &model.backend_model,
        messages: &request.messages,
        stream,
    };
    let mut builder = client.post(url).json(&body);
    // Plain Ollama ignores auth, but reverse proxies in front of it may not.
    if let Some(key) = api_key {
        builder = builder.bearer_auth(key.expose_secret());
    }
    builder
}

pub(crate) fn parse_completion(response: &serde_json::Value) -> Result<Completion, InvocationError> {
    if let Some(err) = response.get("error").and_then(|e| e.as_str()) {
        return Err(InvocationError::Provider(err.to_string()));
    }

    let content = response
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| InvocationError::Malformed("missing message.content".to_string()))?;

    let count = |field: &str| {
        response
            .get(field)
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
    };
    let usage = match (count("prompt_eval_count"), count("eval_count")) {
        (Some(prompt), Some(completion)) => Some(Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
        }),
        _ => None,
    };

    Ok(Completion {
        content: content.to_string(),
        usage,
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
        WireFormat::Ndjson,
        request.timeout,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_completion_with_eval_counts() {
        let body = json!({
            "model": "llama3.1:8b",
            "message": {"role": "assistant", "content": "Hello"},
            "done": true,
            "prompt_eval_count": 26,
            "eval_count": 4
        });
        let completion = parse_completion(&body).unwrap();
        assert_eq!(completion.content, "Hello");
        assert_eq!(
            completion.usage,
            Some(Usage {
                prompt_tokens: 26,
                completion_tokens: 4
            })
        );
    }

    #[test]
    fn test_parse_completion_without_counts() {
        let body = json!({"message": {"role": "assistant", "content": "x"}, "done": true});
        assert_eq!(parse_completion(&body).unwrap().usage, None);
    }

    #[test]
    fn test_out_of_range_eval_count_dropped() {
        let body = json!({
            "message": {"role": "assistant", "content": "x"},
            "done": true,
            "prompt_eval_count": 5,
            "eval_count": 4_294_967_296u64
        });
        assert_eq!(parse_completion(&body).unwrap().usage, None);
    }

    #[test]
    fn test_parse_completion_error_string() {
        let body = json!({"error": "model 'nope' not found"});
        assert!(matches!(
            parse_completion(&body),
            Err(InvocationError::Provider(_))
        ));
    }
}
