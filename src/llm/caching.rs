use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::PersistentResponseCache;
use crate::error::Result;
use crate::types::{CompletionRequest, CompletionResponse};

use super::LlmClient;

/// Wraps any `LlmClient` with the response cache: a hit short-circuits the
/// call entirely, a miss delegates to `inner` and stores the result under
/// `ttl` before returning it.
pub struct CachingLlmClient {
    inner: Arc<dyn LlmClient>,
    cache: Arc<PersistentResponseCache>,
    ttl: Duration,
}

impl CachingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, cache: Arc<PersistentResponseCache>, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }
}

#[async_trait]
impl LlmClient for CachingLlmClient {
    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }

    fn supports_tools(&self) -> bool {
        self.inner.supports_tools()
    }

    async fn generate_completion(
        &self,
        ctx: &CancellationToken,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        if let Some((key, cached)) = self.cache.get(request) {
            debug!(key = %key, "response cache hit");
            return Ok(cached);
        }

        let response = self.inner.generate_completion(ctx, request).await?;
        let key = self.cache.put(request, response.clone(), self.ttl);
        debug!(key = %key, "response cache miss, stored result");
        Ok(response)
    }
}
