//! Narrow provider factory interface: each provider implements exactly
//! the surface the unified client needs, nothing about channels, keys,
//! or retries leaks in (Design Note §9 "narrow factory interface").

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use gw_core::GatewayError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,
    /// Caller's upper bound on total tokens, used by the rate limiter's
    /// pre-emptive reservation (spec §4.7 "Rate limiting").
    #[serde(skip)]
    pub token_estimate: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// One chunk of a streamed generation (spec §4.7 "Streaming").
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Text(String),
    ToolCall(serde_json::Value),
    Error(String),
    Finish,
}

#[async_trait]
pub trait ProviderFactory: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn generate(&self, key: &str, request: &GenerateRequest) -> Result<GenerateResponse, GatewayError>;

    async fn stream(
        &self,
        key: &str,
        request: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, GatewayError>>, GatewayError>;
}

pub struct OpenAiFactory {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ProviderFactory for OpenAiFactory {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    async fn generate(&self, key: &str, request: &GenerateRequest) -> Result<GenerateResponse, GatewayError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key)
            .json(request)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| crate::classify::transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(crate::classify::http_status_error("openai", status.as_u16(), retry_after, &body));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| crate::classify::transport_error(&e))?;
        let text = body["choices"][0]["message"]["content"].as_str().unwrap_or_default().to_string();
        let prompt_tokens = body["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
        let completion_tokens = body["usage"]["completion_tokens"].as_u64().unwrap_or(0);
        Ok(GenerateResponse {
            text,
            prompt_tokens,
            completion_tokens,
        })
    }

    async fn stream(
        &self,
        key: &str,
        request: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, GatewayError>>, GatewayError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key)
            .json(&serde_json::json!({
                "model": request.model,
                "messages": request.messages,
                "stream": true,
            }))
            .send()
            .await
            .map_err(|e| crate::classify::transport_error(&e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(crate::classify::http_status_error("openai", status, None, &body));
        }

        let byte_stream = response.bytes_stream();
        let stream = byte_stream.map(|chunk| match chunk {
            Ok(bytes) => parse_sse_chunk(&bytes),
            Err(e) => StreamChunk::Error(e.to_string()),
        });
        Ok(stream.map(Ok).boxed())
    }
}

pub struct AnthropicFactory {
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ProviderFactory for AnthropicFactory {
    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    async fn generate(&self, key: &str, request: &GenerateRequest) -> Result<GenerateResponse, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(request)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| crate::classify::transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(crate::classify::http_status_error("anthropic", status.as_u16(), None, &body));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| crate::classify::transport_error(&e))?;
        let text = body["content"][0]["text"].as_str().unwrap_or_default().to_string();
        let prompt_tokens = body["usage"]["input_tokens"].as_u64().unwrap_or(0);
        let completion_tokens = body["usage"]["output_tokens"].as_u64().unwrap_or(0);
        Ok(GenerateResponse {
            text,
            prompt_tokens,
            completion_tokens,
        })
    }

    async fn stream(
        &self,
        key: &str,
        request: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, GatewayError>>, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(&serde_json::json!({
                "model": request.model,
                "messages": request.messages,
                "stream": true,
            }))
            .send()
            .await
            .map_err(|e| crate::classify::transport_error(&e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(crate::classify::http_status_error("anthropic", status, None, &body));
        }

        let byte_stream = response.bytes_stream();
        let stream = byte_stream.map(|chunk| match chunk {
            Ok(bytes) => parse_sse_chunk(&bytes),
            Err(e) => StreamChunk::Error(e.to_string()),
        });
        Ok(stream.map(Ok).boxed())
    }
}

fn parse_sse_chunk(bytes: &[u8]) -> StreamChunk {
    let text = String::from_utf8_lossy(bytes);
    for line in text.lines() {
        let Some(data) = line.strip_prefix("data: ") else { continue };
        if data.trim() == "[DONE]" {
            return StreamChunk::Finish;
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(data) {
            if let Some(delta) = value["choices"][0]["delta"]["content"].as_str() {
                return StreamChunk::Text(delta.to_string());
            }
            if let Some(tool_call) = value["choices"][0]["delta"]["tool_calls"].as_array().and_then(|a| a.first()) {
                return StreamChunk::ToolCall(tool_call.clone());
            }
        }
    }
    StreamChunk::Text(String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_chunk_text_delta() {
        let payload = b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n";
        let chunk = parse_sse_chunk(payload);
        assert!(matches!(chunk, StreamChunk::Text(ref t) if t == "hi"));
    }

    #[test]
    fn test_parse_sse_chunk_done_marker() {
        let payload = b"data: [DONE]\n\n";
        assert!(matches!(parse_sse_chunk(payload), StreamChunk::Finish));
    }

    #[test]
    fn test_provider_names() {
        assert_eq!(OpenAiFactory::new("https://api.openai.com/v1").provider_name(), "openai");
        assert_eq!(AnthropicFactory::new("https://api.anthropic.com").provider_name(), "anthropic");
    }
}
