//! Google Gemini over the `streamGenerateContent` SSE endpoint.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CompletionProvider, DeltaStream, PromptMessage, PromptRole, ProviderError, ProviderModel};

pub struct GeminiProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

fn build_request(messages: &[PromptMessage]) -> GenerateRequest<'_> {
    let system_parts: Vec<Part> = messages
        .iter()
        .filter(|m| m.role == PromptRole::System)
        .map(|m| Part { text: &m.content })
        .collect();

    let contents = messages
        .iter()
        .filter_map(|m| {
            let role = match m.role {
                PromptRole::System => return None,
                PromptRole::User => "user",
                PromptRole::Assistant => "model",
            };
            Some(Content {
                role: Some(role),
                parts: vec![Part { text: &m.content }],
            })
        })
        .collect();

    GenerateRequest {
        system_instruction: (!system_parts.is_empty()).then_some(Content {
            role: None,
            parts: system_parts,
        }),
        contents,
    }
}

/// Extracts the text carried by one SSE `data:` payload.
///
/// Returns `Ok(None)` for payloads without text (keep-alives, metadata-only
/// chunks, the `[DONE]` marker).
pub fn parse_sse_data(data: &str) -> Result<Option<String>, ProviderError> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::Stream(format!("malformed Gemini chunk: {e}: {data}")))?;

    if let Some(error) = value.get("error") {
        return Err(ProviderError::Api {
            status: error.get("code").and_then(Value::as_u64).unwrap_or(0) as u16,
            body: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown Gemini error")
                .to_owned(),
        });
    }

    let Some(candidate) = value
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
    else {
        if let Some(reason) = value.pointer("/promptFeedback/blockReason").and_then(Value::as_str) {
            return Err(ProviderError::Stream(format!("prompt blocked: {reason}")));
        }
        return Ok(None);
    };

    let text: String = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    Ok((!text.is_empty()).then_some(text))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    name: String,
    #[serde(default)]
    display_name: String,
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    async fn stream_completion(&self, model: &str, messages: &[PromptMessage]) -> Result<DeltaStream, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or(ProviderError::MissingApiKey)?;
        // Listed ids come back as `models/<id>`; both forms are accepted.
        let model = model.strip_prefix("models/").unwrap_or(model);
        let url = format!("{}/models/{model}:streamGenerateContent", self.base_url);

        tracing::debug!(model, messages = messages.len(), "opening Gemini stream");
        let response = self
            .client
            .post(&url)
            .query(&[("alt", "sse"), ("key", api_key)])
            .json(&build_request(messages))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status: status.as_u16(), body });
        }

        let deltas = response
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => return Some(Err(ProviderError::Stream(e.to_string()))),
                };
                parse_sse_data(&event.data).transpose()
            });

        Ok(Box::pin(deltas))
    }

    async fn list_models(&self, api_key: &str) -> Result<Vec<ProviderModel>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .query(&[("key", api_key), ("pageSize", "1000")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status: status.as_u16(), body });
        }

        let ModelList { models } = response.json().await?;
        Ok(models
            .into_iter()
            .map(|ModelEntry { name, display_name }| ProviderModel { id: name, name: display_name })
            .collect())
    }
}
