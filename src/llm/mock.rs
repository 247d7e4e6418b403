use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{AnalysisError, Result};
use crate::types::{CompletionRequest, CompletionResponse};

use super::LlmClient;

/// A canned-response client for agent and scheduler tests: each call pops
/// the next programmed response off the front of the queue and records the
/// request it was given, so tests can assert on both what was returned and
/// what was asked for.
pub struct MockLlmClient {
    responses: Mutex<Vec<Result<CompletionResponse>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmClient {
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self { responses: Mutex::new(responses.into_iter().map(Ok).collect()), requests: Mutex::new(Vec::new()) }
    }

    /// Builds a client whose queue may include programmed errors, so retry
    /// and error-propagation paths can be exercised without a real provider.
    pub fn with_results(responses: Vec<Result<CompletionResponse>>) -> Self {
        Self { responses: Mutex::new(responses), requests: Mutex::new(Vec::new()) }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request_for_call(&self, n: usize) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().get(n).cloned()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider_name(&self) -> &'static str {
        "mock"
    }

    async fn generate_completion(
        &self,
        _ctx: &CancellationToken,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(AnalysisError::Tool {
                name: "mock".to_string(),
                message: "no more programmed responses".to_string(),
            });
        }
        responses.remove(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "m".to_string(),
            system_prompt: "s".to_string(),
            messages: vec![Message::user("hi")],
            tools: vec![],
            temperature: 0.0,
            max_tokens: 10,
        }
    }

    #[tokio::test]
    async fn pops_responses_in_order_and_logs_requests() {
        let client = MockLlmClient::new(vec![
            CompletionResponse { content: "first".to_string(), ..Default::default() },
            CompletionResponse { content: "second".to_string(), ..Default::default() },
        ]);
        let ctx = CancellationToken::new();

        let first = client.generate_completion(&ctx, &request()).await.unwrap();
        let second = client.generate_completion(&ctx, &request()).await.unwrap();

        assert_eq!(first.content, "first");
        assert_eq!(second.content, "second");
        assert_eq!(client.call_count(), 2);
        assert_eq!(client.request_for_call(0).unwrap().model, "m");
    }

    #[tokio::test]
    async fn errors_when_queue_is_exhausted() {
        let client = MockLlmClient::new(vec![]);
        let ctx = CancellationToken::new();
        assert!(client.generate_completion(&ctx, &request()).await.is_err());
    }
}
