pub mod anthropic;
pub mod caching;
pub mod gemini;
pub mod mock;
pub mod openai;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::{CompletionRequest, CompletionResponse};

pub use anthropic::AnthropicClient;
pub use caching::CachingLlmClient;
pub use gemini::GeminiClient;
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;

/// One client per provider. Implementations own request shaping (including
/// where the system prompt goes, which differs per provider) and pair a
/// single streaming accumulator variant with the retrying transport.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider_name(&self) -> &'static str;

    fn supports_tools(&self) -> bool {
        true
    }

    async fn generate_completion(
        &self,
        ctx: &CancellationToken,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse>;
}
