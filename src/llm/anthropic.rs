use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::accumulator::{AnthropicStyleAccumulator, StreamAccumulator};
use crate::error::{AnalysisError, Result};
use crate::stream::sse::{SseEvent, SseReader};
use crate::transport::{HttpRequest, RetryingTransport};
use crate::types::{CompletionRequest, CompletionResponse, Role};

use super::LlmClient;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client for typed-event providers: the system prompt is a top-level field
/// rather than a leading message, auth rides on `x-api-key` instead of a
/// bearer token, and streaming chunks arrive as `content_block_*`/
/// `message_*` typed events rather than OpenAI-style deltas.
pub struct AnthropicClient {
    transport: RetryingTransport,
    base_url: String,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(transport: RetryingTransport, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { transport, base_url: base_url.into(), api_key: api_key.into() }
    }

    fn build_body(request: &CompletionRequest, model: &str) -> serde_json::Value {
        let mut messages = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            match message.role {
                Role::System => continue,
                Role::User => messages.push(json!({"role": "user", "content": message.content})),
                Role::Assistant => {
                    let mut blocks: Vec<serde_json::Value> = Vec::new();
                    if !message.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": message.content}));
                    }
                    for tc in &message.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": tc.arguments,
                        }));
                    }
                    messages.push(json!({"role": "assistant", "content": blocks}));
                }
                Role::Tool => {
                    messages.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": message.tool_call_id,
                            "content": message.content,
                        }]
                    }));
                }
            }
        }

        let tools: Vec<_> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();

        let mut body = json!({
            "model": model,
            "system": request.system_prompt,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": true,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        body
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    async fn generate_completion(
        &self,
        ctx: &CancellationToken,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        let body = Self::build_body(request, &request.model);
        let http_request = HttpRequest::post(format!("{}/v1/messages", self.base_url), serde_json::to_vec(&body)?)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json");

        let response = self.transport.execute(ctx, http_request).await?;
        let mut reader = SseReader::new(response.bytes_stream());
        let mut accumulator = AnthropicStyleAccumulator::default();

        loop {
            match reader.next_event().await? {
                Some(SseEvent::Data(payload)) => {
                    debug!(bytes = payload.len(), "anthropic chunk");
                    let frame: serde_json::Value = serde_json::from_str(&payload)
                        .map_err(|e| AnalysisError::Stream(format!("invalid chunk JSON: {e}")))?;
                    accumulator.handle_chunk(frame)?;
                    if accumulator.is_complete() {
                        break;
                    }
                }
                Some(SseEvent::Done) => break,
                None => {
                    if !accumulator.is_complete() {
                        return Err(AnalysisError::Stream("stream ended before message_stop arrived".to_string()));
                    }
                    break;
                }
            }
        }

        accumulator.build()
    }
}
