pub mod anthropic_style;
pub mod gemini_style;
pub mod openai_style;

pub use anthropic_style::AnthropicStyleAccumulator;
pub use gemini_style::GeminiStyleAccumulator;
pub use openai_style::OpenAiStyleAccumulator;

use crate::error::Result;
use crate::types::CompletionResponse;

/// A provider-specific streaming state machine. Every provider this crate
/// speaks to ultimately feeds JSON frames (parsed from either an SSE `data:`
/// payload or an NDJSON line) through the same three-operation contract, so
/// callers never need to know which wire framing produced them.
pub trait StreamAccumulator: Default {
    fn handle_chunk(&mut self, frame: serde_json::Value) -> Result<()>;
    fn is_complete(&self) -> bool;
    fn build(self) -> Result<CompletionResponse>;
}
