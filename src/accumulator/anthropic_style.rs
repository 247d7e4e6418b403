use std::collections::HashMap;

use super::StreamAccumulator;
use crate::error::{AnalysisError, Result};
use crate::types::{CompletionResponse, ToolCall, Usage};

enum OpenBlock {
    Text,
    Tool { id: String, name: String, arguments_buf: String },
}

/// Accumulates typed-event chunks: `message_start`, `content_block_start`,
/// `content_block_delta`, `content_block_stop`, `message_delta`,
/// `message_stop`. Blocks are tracked by index so interleaved text and
/// tool-use blocks never cross-contaminate their buffers.
#[derive(Default)]
pub struct AnthropicStyleAccumulator {
    content: String,
    open_blocks: HashMap<u64, OpenBlock>,
    tool_calls: Vec<ToolCall>,
    usage: Usage,
    complete: bool,
}

impl Default for OpenBlock {
    fn default() -> Self {
        OpenBlock::Text
    }
}

impl StreamAccumulator for AnthropicStyleAccumulator {
    fn handle_chunk(&mut self, frame: serde_json::Value) -> Result<()> {
        match frame.get("type").and_then(|v| v.as_str()) {
            Some("content_block_start") => {
                let index = frame.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                let block = frame.get("content_block").cloned().unwrap_or_default();
                let open = match block.get("type").and_then(|v| v.as_str()) {
                    Some("tool_use") => OpenBlock::Tool {
                        id: block.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        name: block.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        arguments_buf: String::new(),
                    },
                    _ => OpenBlock::Text,
                };
                self.open_blocks.insert(index, open);
            }
            Some("content_block_delta") => {
                let index = frame.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                let delta = frame.get("delta").cloned().unwrap_or_default();
                if let Some(block) = self.open_blocks.get_mut(&index) {
                    match block {
                        OpenBlock::Text => {
                            if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                                self.content.push_str(text);
                            }
                        }
                        OpenBlock::Tool { arguments_buf, .. } => {
                            if let Some(partial) = delta.get("partial_json").and_then(|v| v.as_str()) {
                                arguments_buf.push_str(partial);
                            }
                        }
                    }
                }
            }
            Some("content_block_stop") => {
                let index = frame.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                if let Some(OpenBlock::Tool { id, name, arguments_buf }) = self.open_blocks.remove(&index) {
                    let arguments: HashMap<String, serde_json::Value> = if arguments_buf.trim().is_empty() {
                        HashMap::new()
                    } else {
                        serde_json::from_str(&arguments_buf)
                            .map_err(|e| AnalysisError::Stream(format!("tool use block {index} arguments: {e}")))?
                    };
                    self.tool_calls.push(ToolCall { id, name, arguments, provider_token: None });
                }
            }
            Some("message_delta") => {
                if let Some(usage) = frame.get("usage") {
                    if let Some(v) = usage.get("output_tokens").and_then(|v| v.as_u64()) {
                        self.usage.output_tokens = v as u32;
                        self.usage.total_tokens = self.usage.input_tokens + self.usage.output_tokens;
                    }
                }
                // `message_stop` usually follows, but a terminal stop reason here
                // is itself a completion signal per the provider's contract.
                if let Some(reason) = frame.get("delta").and_then(|d| d.get("stop_reason")).and_then(|v| v.as_str()) {
                    if !reason.is_empty() {
                        self.complete = true;
                    }
                }
            }
            Some("message_start") => {
                if let Some(usage) =
                    frame.get("message").and_then(|m| m.get("usage")).or_else(|| frame.get("usage"))
                {
                    if let Some(v) = usage.get("input_tokens").and_then(|v| v.as_u64()) {
                        self.usage.input_tokens = v as u32;
                    }
                }
            }
            Some("message_stop") => {
                self.complete = true;
            }
            _ => {}
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
    fn interleaves_text_and_tool_blocks() {
        let mut acc = AnthropicStyleAccumulator::default();
        acc.handle_chunk(json!({"type":"message_start","message":{"usage":{"input_tokens":10}}})).unwrap();
        acc.handle_chunk(json!({"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}})).unwrap();
        acc.handle_chunk(json!({"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Looking"}})).unwrap();
        acc.handle_chunk(json!({"type":"content_block_stop","index":0})).unwrap();
        acc.handle_chunk(json!({"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"read_file"}})).unwrap();
        acc.handle_chunk(json!({"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"file_path\":"}})).unwrap();
        acc.handle_chunk(json!({"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"main.rs\"}"}})).unwrap();
        acc.handle_chunk(json!({"type":"content_block_stop","index":1})).unwrap();
        acc.handle_chunk(json!({"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":5}})).unwrap();
        acc.handle_chunk(json!({"type":"message_stop"})).unwrap();

        assert!(acc.is_complete());
        let resp = acc.build().unwrap();
        assert_eq!(resp.content, "Looking");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "read_file");
        assert_eq!(resp.tool_calls[0].arguments["file_path"], "main.rs");
        assert_eq!(resp.usage.input_tokens, 10);
        assert_eq!(resp.usage.output_tokens, 5);
    }
}
