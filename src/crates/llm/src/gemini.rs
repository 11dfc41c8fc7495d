//! Google Gemini client.
//!
//! Implements [`ChatModel`] over the Gemini REST API: `generateContent` for
//! complete responses and `streamGenerateContent?alt=sse` for token-by-token
//! streaming. System messages map to the request's `systemInstruction`,
//! user/assistant messages to `user`/`model` roles.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use stategraph_core::MessageRole;

use crate::config::RemoteLlmConfig;
use crate::error::{LlmError, Result};
use crate::model::{ChatModel, ChatRequest, ChatResponse, ChatStream, StreamChunk, TokenUsage};

/// Gemini API client.
#[derive(Clone)]
pub struct GeminiClient {
    config: RemoteLlmConfig,
    client: Client,
}

impl GeminiClient {
    /// Create a client for the configured model.
    pub fn new(config: RemoteLlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(LlmError::Http)?;
        Ok(Self { config, client })
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        let mut contents = Vec::new();
        let mut system_instruction: Option<String> = None;

        for msg in &request.messages {
            match msg.role {
                MessageRole::System => {
                    // Gemini takes one system instruction; later ones append.
                    system_instruction = Some(match system_instruction.take() {
                        Some(existing) => format!("{existing}\n\n{}", msg.content),
                        None => msg.content.clone(),
                    });
                }
                MessageRole::User => contents.push(json!({
                    "role": "user",
                    "parts": [{"text": msg.content}],
                })),
                MessageRole::Assistant => contents.push(json!({
                    "role": "model",
                    "parts": [{"text": msg.content}],
                })),
            }
        }

        let mut body = json!({ "contents": contents });
        if let Some(instruction) = system_instruction {
            body["systemInstruction"] = json!({"parts": [{"text": instruction}]});
        }
        let mut generation_config = serde_json::Map::new();
        if let Some(temperature) = request.temperature {
            generation_config.insert("temperature".into(), json!(temperature));
        }
        if let Some(max) = request.max_output_tokens {
            generation_config.insert("maxOutputTokens".into(), json!(max));
        }
        if !generation_config.is_empty() {
            body["generationConfig"] = Value::Object(generation_config);
        }
        body
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/models/{}:{method}?key={}",
            self.config.base_url, self.config.model, self.config.api_key
        )
    }

    fn map_status(status: StatusCode, body: String) -> LlmError {
        match status {
            StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimitExceeded(body),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => LlmError::Timeout(body),
            s if s.is_server_error() => LlmError::ServiceUnavailable(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                LlmError::InvalidRequest(format!("authentication failed: {body}"))
            }
            _ => LlmError::ProviderError(format!("{status}: {body}")),
        }
    }

    fn parse_chunk(payload: &GeminiResponse) -> StreamChunk {
        let delta = payload
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        StreamChunk {
            delta,
            usage: payload.usage_metadata.as_ref().map(GeminiUsage::to_usage),
        }
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let response = self
            .client
            .post(self.endpoint("generateContent"))
            .json(&self.request_body(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, body));
        }

        let payload: GeminiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Serialization(e.to_string()))?;

        let candidate = payload
            .candidates
            .first()
            .ok_or_else(|| LlmError::InvalidResponse("no candidates in response".to_string()))?;
        let content = candidate
            .content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Ok(ChatResponse {
            content,
            usage: payload.usage_metadata.as_ref().map(GeminiUsage::to_usage),
            model: Some(self.config.model.clone()),
        })
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChatStream> {
        let response = self
            .client
            .post(self.endpoint("streamGenerateContent") + "&alt=sse")
            .json(&self.request_body(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, body));
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(LlmError::Http(e));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE frames are newline-delimited `data: {json}` lines.
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() || data == "[DONE]" {
                        continue;
                    }
                    match serde_json::from_str::<GeminiResponse>(data) {
                        Ok(payload) => yield Ok(Self::parse_chunk(&payload)),
                        Err(e) => yield Err(LlmError::Serialization(e.to_string())),
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Default, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u64,
}

impl GeminiUsage {
    fn to_usage(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_token_count,
            completion_tokens: self.candidates_token_count,
            total_tokens: self.total_token_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stategraph_core::ChatMessage;

    fn client() -> GeminiClient {
        GeminiClient::new(RemoteLlmConfig::new(
            "test-key",
            "https://example.invalid/v1beta",
            "gemini-pro",
        ))
        .unwrap()
    }

    #[test]
    fn system_messages_become_system_instruction() {
        let request = ChatRequest::new(vec![
            ChatMessage::system("You are a tutor."),
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello"),
        ])
        .with_temperature(0.3);

        let body = client().request_body(&request);
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "You are a tutor."
        );
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["generationConfig"]["temperature"], 0.3);
    }

    #[test]
    fn usage_metadata_parses() {
        let raw = r#"{
            "candidates": [{"content": {"parts": [{"text": "hi"}]}}],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 3, "totalTokenCount": 10}
        }"#;
        let payload: GeminiResponse = serde_json::from_str(raw).unwrap();
        let chunk = GeminiClient::parse_chunk(&payload);
        assert_eq!(chunk.delta, "hi");
        assert_eq!(chunk.usage.unwrap().total_tokens, 10);
    }
}
