use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::accumulator::{OpenAiStyleAccumulator, StreamAccumulator};
use crate::error::{AnalysisError, Result};
use crate::stream::sse::{SseEvent, SseReader};
use crate::transport::{HttpRequest, RetryingTransport};
use crate::types::{CompletionRequest, CompletionResponse, Role};

use super::LlmClient;

/// Client for chat-completion-style providers: a single `/chat/completions`
/// endpoint, bearer-token auth, and delta-text-plus-indexed-tool-call-delta
/// streaming chunks.
pub struct OpenAiClient {
    transport: RetryingTransport,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(transport: RetryingTransport, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { transport, base_url: base_url.into(), api_key: api_key.into() }
    }

    fn build_body(request: &CompletionRequest, model: &str) -> serde_json::Value {
        let mut messages = vec![json!({"role": "system", "content": request.system_prompt})];
        for message in &request.messages {
            messages.push(match message.role {
                Role::System => json!({"role": "system", "content": message.content}),
                Role::User => json!({"role": "user", "content": message.content}),
                Role::Assistant => {
                    let mut value = json!({"role": "assistant", "content": message.content});
                    if !message.tool_calls.is_empty() {
                        let calls: Vec<_> = message
                            .tool_calls
                            .iter()
                            .map(|tc| {
                                json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.name,
                                        "arguments": serde_json::to_string(&tc.arguments).unwrap_or_default(),
                                    }
                                })
                            })
                            .collect();
                        value["tool_calls"] = json!(calls);
                    }
                    value
                }
                Role::Tool => json!({
                    "role": "tool",
                    "tool_call_id": message.tool_call_id,
                    "content": message.content,
                }),
            });
        }

        let tools: Vec<_> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": model,
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
impl LlmClient for OpenAiClient {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    async fn generate_completion(
        &self,
        ctx: &CancellationToken,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        let body = Self::build_body(request, &request.model);
        let http_request = HttpRequest::post(format!("{}/chat/completions", self.base_url), serde_json::to_vec(&body)?)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");

        let response = self.transport.execute(ctx, http_request).await?;
        let mut reader = SseReader::new(response.bytes_stream());
        let mut accumulator = OpenAiStyleAccumulator::default();

        loop {
            match reader.next_event().await? {
                Some(SseEvent::Data(payload)) => {
                    debug!(bytes = payload.len(), "openai chunk");
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
                        return Err(AnalysisError::Stream("stream ended before a finish reason arrived".to_string()));
                    }
                    break;
                }
            }
        }

        accumulator.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, ToolDefinition};

    #[test]
    fn builds_system_message_and_tool_schema() {
        let request = CompletionRequest {
            model: "gpt-test".to_string(),
            system_prompt: "You are helpful.".to_string(),
            messages: vec![Message::user("hi")],
            tools: vec![ToolDefinition {
                name: "read_file".to_string(),
                description: "reads a file".to_string(),
                parameters: json!({"type": "object"}),
            }],
            temperature: 0.0,
            max_tokens: 1024,
        };
        let body = OpenAiClient::build_body(&request, "gpt-test");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["tools"][0]["function"]["name"], "read_file");
        assert_eq!(body["stream"], true);
    }
}
