use std::collections::HashMap;

use super::StreamAccumulator;
use crate::error::{AnalysisError, Result};
use crate::types::{CompletionResponse, ToolCall, Usage};

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments_buf: String,
}

/// Accumulates delta-text-plus-indexed-tool-call-delta chunks, the framing
/// used by chat-completion-style streaming APIs: each chunk carries
/// `choices[0].delta` with optional text and an array of tool-call deltas
/// addressed by integer index, closed by a non-empty `finish_reason`.
#[derive(Debug, Default)]
pub struct OpenAiStyleAccumulator {
    content: String,
    tool_calls: Vec<PartialToolCall>,
    usage: Usage,
    complete: bool,
}

impl StreamAccumulator for OpenAiStyleAccumulator {
    fn handle_chunk(&mut self, frame: serde_json::Value) -> Result<()> {
        let Some(choice) = frame.get("choices").and_then(|c| c.get(0)) else {
            if let Some(usage) = frame.get("usage") {
                self.apply_usage(usage);
            }
            return Ok(());
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
                self.content.push_str(text);
            }
            if let Some(calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
                for call in calls {
                    let index = call.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                    while self.tool_calls.len() <= index {
                        self.tool_calls.push(PartialToolCall::default());
                    }
                    let entry = &mut self.tool_calls[index];
                    if let Some(id) = call.get("id").and_then(|v| v.as_str()) {
                        entry.id = Some(id.to_string());
                    }
                    if let Some(function) = call.get("function") {
                        if let Some(name) = function.get("name").and_then(|v| v.as_str()) {
                            if !name.is_empty() {
                                entry.name = Some(name.to_string());
                            }
                        }
                        if let Some(args) = function.get("arguments").and_then(|v| v.as_str()) {
                            entry.arguments_buf.push_str(args);
                        }
                    }
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
            if !reason.is_empty() {
                self.complete = true;
            }
        }

        if let Some(usage) = frame.get("usage") {
            self.apply_usage(usage);
        }

        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn build(self) -> Result<CompletionResponse> {
        let mut tool_calls = Vec::with_capacity(self.tool_calls.len());
        for (index, partial) in self.tool_calls.into_iter().enumerate() {
            let Some(name) = partial.name else { continue };
            let arguments: HashMap<String, serde_json::Value> = if partial.arguments_buf.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&partial.arguments_buf)
                    .map_err(|e| AnalysisError::Stream(format!("tool call {index} arguments: {e}")))?
            };
            tool_calls.push(ToolCall {
                id: partial.id.unwrap_or_else(|| format!("call_{index}")),
                name,
                arguments,
                provider_token: None,
            });
        }

        Ok(CompletionResponse { content: self.content, tool_calls, usage: self.usage })
    }
}

impl OpenAiStyleAccumulator {
    fn apply_usage(&mut self, usage: &serde_json::Value) {
        if let Some(v) = usage.get("prompt_tokens").and_then(|v| v.as_u64()) {
            self.usage.input_tokens = v as u32;
        }
        if let Some(v) = usage.get("completion_tokens").and_then(|v| v.as_u64()) {
            self.usage.output_tokens = v as u32;
        }
        if let Some(v) = usage.get("total_tokens").and_then(|v| v.as_u64()) {
            self.usage.total_tokens = v as u32;
        } else {
            self.usage.total_tokens = self.usage.input_tokens + self.usage.output_tokens;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accumulates_text_and_completes_on_finish_reason() {
        let mut acc = OpenAiStyleAccumulator::default();
        acc.handle_chunk(json!({"choices":[{"delta":{"content":"Hello, "}}]})).unwrap();
        acc.handle_chunk(json!({"choices":[{"delta":{"content":"world!"}}]})).unwrap();
        assert!(!acc.is_complete());
        acc.handle_chunk(json!({"choices":[{"delta":{},"finish_reason":"stop"}]})).unwrap();
        assert!(acc.is_complete());
        let resp = acc.build().unwrap();
        assert_eq!(resp.content, "Hello, world!");
        assert!(resp.tool_calls.is_empty());
    }

    #[test]
    fn assembles_indexed_tool_call_deltas() {
        let mut acc = OpenAiStyleAccumulator::default();
        acc.handle_chunk(json!({"choices":[{"delta":{"tool_calls":[
            {"index":0,"id":"call_1","function":{"name":"search_files","arguments":""}}
        ]}}]})).unwrap();
        acc.handle_chunk(json!({"choices":[{"delta":{"tool_calls":[
            {"index":0,"function":{"arguments":"{\"pattern\""}}
        ]}}]})).unwrap();
        acc.handle_chunk(json!({"choices":[{"delta":{"tool_calls":[
            {"index":0,"function":{"arguments":":\"TODO\"}"}}
        ]}}]})).unwrap();
        acc.handle_chunk(json!({"choices":[{"delta":{},"finish_reason":"tool_calls"}]})).unwrap();

        let resp = acc.build().unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "search_files");
        assert_eq!(resp.tool_calls[0].arguments["pattern"], "TODO");
    }

    #[test]
    fn malformed_arguments_fail_to_build() {
        let mut acc = OpenAiStyleAccumulator::default();
        acc.handle_chunk(json!({"choices":[{"delta":{"tool_calls":[
            {"index":0,"id":"call_1","function":{"name":"x","arguments":"{not json"}}
        ]}}]})).unwrap();
        assert!(acc.build().is_err());
    }
}
