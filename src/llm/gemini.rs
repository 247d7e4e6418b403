use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::accumulator::{GeminiStyleAccumulator, StreamAccumulator};
use crate::error::{AnalysisError, Result};
use crate::stream::ndjson::NdjsonReader;
use crate::transport::{HttpRequest, RetryingTransport};
use crate::types::{CompletionRequest, CompletionResponse, Role};

use super::LlmClient;

/// Client for the NDJSON-streaming provider: no system-prompt field (encoded
/// as a leading user/model turn pair instead), the API key rides as a query
/// parameter rather than a header, and function results are addressed by
/// name via a `functionResponse` part rather than by id.
pub struct GeminiClient {
    transport: RetryingTransport,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(transport: RetryingTransport, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { transport, base_url: base_url.into(), api_key: api_key.into() }
    }

    fn model_path(model: &str) -> String {
        if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        }
    }

    fn build_body(request: &CompletionRequest) -> serde_json::Value {
        let mut contents = Vec::with_capacity(request.messages.len() + 2);
        if !request.system_prompt.is_empty() {
            contents.push(json!({"role": "user", "parts": [{"text": request.system_prompt}]}));
            contents.push(json!({"role": "model", "parts": [{"text": "Understood."}]}));
        }

        // Tool-call ids only exist within this process; Gemini correlates a
        // `functionResponse` to its call by function name, so we track the
        // name each id was issued under as we walk the conversation.
        let mut name_by_call_id: HashMap<&str, &str> = HashMap::new();

        for message in &request.messages {
            match message.role {
                Role::System => continue,
                Role::User => contents.push(json!({"role": "user", "parts": [{"text": message.content}]})),
                Role::Assistant => {
                    let mut parts: Vec<serde_json::Value> = Vec::new();
                    if !message.content.is_empty() {
                        parts.push(json!({"text": message.content}));
                    }
                    for tc in &message.tool_calls {
                        name_by_call_id.insert(&tc.id, &tc.name);
                        let mut part = json!({"functionCall": {"name": tc.name, "args": tc.arguments}});
                        // Re-emit the opaque per-part token the accumulator captured
                        // when this call first streamed in; never invent one.
                        if let Some(token) = &tc.provider_token {
                            part["functionCall"]["id"] = json!(token);
                        }
                        parts.push(part);
                    }
                    contents.push(json!({"role": "model", "parts": parts}));
                }
                Role::Tool => {
                    let name = message.tool_call_id.as_deref().and_then(|id| name_by_call_id.get(id).copied()).unwrap_or("");
                    contents.push(json!({
                        "role": "user",
                        "parts": [{
                            "functionResponse": {
                                "name": name,
                                "response": {"content": message.content},
                            }
                        }]
                    }));
                }
            }
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            },
        });

        if !request.tools.is_empty() {
            let declarations: Vec<_> = request
                .tools
                .iter()
                .map(|t| json!({"name": t.name, "description": t.description, "parameters": t.parameters}))
                .collect();
            body["tools"] = json!([{"functionDeclarations": declarations}]);
        }

        body
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn provider_name(&self) -> &'static str {
        "gemini"
    }

    async fn generate_completion(
        &self,
        ctx: &CancellationToken,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        let body = Self::build_body(request);
        let url = format!(
            "{}/v1beta/{}:streamGenerateContent?key={}",
            self.base_url,
            Self::model_path(&request.model),
            self.api_key,
        );
        let http_request = HttpRequest::post(url, serde_json::to_vec(&body)?).header("content-type", "application/json");

        let response = self.transport.execute(ctx, http_request).await?;
        let mut reader = NdjsonReader::new(response.bytes_stream());
        let mut accumulator = GeminiStyleAccumulator::default();

        loop {
            match reader.next_value().await? {
                Some(frame) => {
                    debug!("gemini chunk");
                    accumulator.handle_chunk(frame)?;
                    if accumulator.is_complete() {
                        break;
                    }
                }
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
