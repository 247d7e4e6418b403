use std::collections::HashMap;

use super::StreamAccumulator;
use crate::error::{AnalysisError, Result};
use crate::types::{CompletionResponse, ToolCall, Usage};

/// Accumulates one complete JSON object per NDJSON line. Unlike the two
/// SSE-based providers, function calls here arrive whole in a single part —
/// there is no partial-argument accumulation, only text concatenation and a
/// terminal `finishReason`.
#[derive(Debug, Default)]
pub struct GeminiStyleAccumulator {
    content: String,
    tool_calls: Vec<ToolCall>,
    usage: Usage,
    complete: bool,
}

impl StreamAccumulator for GeminiStyleAccumulator {
    fn handle_chunk(&mut self, frame: serde_json::Value) -> Result<()> {
        if let Some(usage) = frame.get("usageMetadata") {
            self.usage = Usage {
                input_tokens: usage.get("promptTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                output_tokens: usage.get("candidatesTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                total_tokens: usage.get("totalTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            };
        }

        let Some(candidate) = frame.get("candidates").and_then(|c| c.get(0)) else {
            return Ok(());
        };

        if let Some(parts) = candidate.get("content").and_then(|c| c.get("parts")).and_then(|p| p.as_array()) {
            for (part_index, part) in parts.iter().enumerate() {
                if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                    self.content.push_str(text);
                }
                if let Some(call) = part.get("functionCall") {
                    let name = call.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    let arguments: HashMap<String, serde_json::Value> = call
                        .get("args")
                        .and_then(|v| v.as_object())
                        .cloned()
                        .unwrap_or_default()
                        .into_iter()
                        .collect();
                    // Gemini function calls carry no id of their own; the part's
                    // position is the only handle for round-tripping a
                    // `functionResponse` back to its originating call.
                    self.tool_calls.push(ToolCall {
                        id: format!("call_{}", self.tool_calls.len()),
                        name,
                        arguments,
                        provider_token: Some(part_index.to_string()),
                    });
                }
            }
        }

        if let Some(reason) = candidate.get("finishReason").and_then(|v| v.as_str()) {
            if reason == "SAFETY" {
                return Err(AnalysisError::Safety("response blocked by provider safety filter".to_string()));
            }
            if !reason.is_empty() {
                self.complete = true;
            }
        }

        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn build(self) -> Result<CompletionResponse> {
        Ok(CompletionResponse { content: self.content, tool_calls: self.tool_calls, usage: self.usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn concatenates_text_fragments_across_chunks() {
        let fragments = [
            "This is", " a large", " response", " split", " across", " multiple", " chunks.",
        ];
        let mut acc = GeminiStyleAccumulator::default();
        for (i, frag) in fragments.iter().enumerate() {
            let finish = if i == fragments.len() - 1 { json!("STOP") } else { serde_json::Value::Null };
            acc.handle_chunk(json!({
                "candidates": [{"content": {"parts": [{"text": frag}]}, "finishReason": finish}]
            }))
            .unwrap();
        }
        assert!(acc.is_complete());
        assert_eq!(acc.build().unwrap().content, "This is a large response split across multiple chunks.");
    }

    #[test]
    fn safety_finish_reason_is_an_error() {
        let mut acc = GeminiStyleAccumulator::default();
        let err = acc
            .handle_chunk(json!({"candidates":[{"content":{"parts":[]}, "finishReason":"SAFETY"}]}))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Safety(_)));
    }

    #[test]
    fn function_call_arrives_whole() {
        let mut acc = GeminiStyleAccumulator::default();
        acc.handle_chunk(json!({
            "candidates": [{
                "content": {"parts": [{"functionCall": {"name": "search_files", "args": {"pattern": "TODO"}}}]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        let resp = acc.build().unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].arguments["pattern"], "TODO");
    }
}
