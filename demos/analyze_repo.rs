//! Runs one analysis pass over a repository using whichever provider has an
//! API key set in the environment.
//!
//! ```text
//! OPENAI_API_KEY=sk-... cargo run --example analyze_repo -- /path/to/repo
//! ```
//!
//! Falls back to a canned mock client (no network calls) when no provider
//! key is set, so the example still runs end-to-end in CI.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use codewright::config::{AnalysisConfig, HttpConfig};
use codewright::llm::{AnthropicClient, GeminiClient, LlmClient, MockLlmClient, OpenAiClient};
use codewright::transport::{ConnectionPool, RetryingTransport};
use codewright::{CompletionResponse, PromptProvider, Scheduler, StaticPromptProvider};
use tokio_util::sync::CancellationToken;

fn build_client(http: &HttpConfig) -> anyhow::Result<Arc<dyn LlmClient>> {
    let pool = ConnectionPool::new(http)?;

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        let transport = RetryingTransport::new(pool, http.clone());
        return Ok(Arc::new(OpenAiClient::new(transport, "https://api.openai.com", key)));
    }
    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        let transport = RetryingTransport::new(pool, http.clone());
        return Ok(Arc::new(AnthropicClient::new(transport, "https://api.anthropic.com", key)));
    }
    if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        let transport = RetryingTransport::new(pool, http.clone());
        return Ok(Arc::new(GeminiClient::new(transport, "https://generativelanguage.googleapis.com", key)));
    }

    eprintln!("no provider API key set (OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY); using a mock client");
    Ok(Arc::new(MockLlmClient::new(vec![CompletionResponse {
        content: "# Mock analysis\n\nNo provider key was configured, so this is placeholder output.".to_string(),
        ..Default::default()
    }])))
}

fn prompt_provider(agents: &[codewright::AgentDefinition]) -> Arc<dyn PromptProvider> {
    let mut provider = StaticPromptProvider::new();
    for agent in agents {
        provider = provider.with(
            &agent.prompt_name,
            format!(
                "You are the {} analysis agent for the repository rooted at {{{{repo_path}}}}. \
                 Use the available tools to inspect the codebase, then write a concise markdown report.",
                agent.name
            ),
        );
    }
    Arc::new(provider)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let repo_path = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));

    let config = AnalysisConfig {
        repo_path: repo_path.clone(),
        analysis_cache_path: repo_path.join(".ai").join("analysis_cache.json"),
        response_cache_path: repo_path.join(".ai").join("llm_cache.json"),
        response_cache_capacity: 256,
        response_cache_ttl: Duration::from_secs(24 * 3600),
        ..Default::default()
    };

    let client = build_client(&config.http)?;
    let agents = codewright::cache::default_agent_definitions();
    let prompts = prompt_provider(&agents);

    let scheduler = Scheduler::new(config, client, prompts);
    let result = scheduler.run(&CancellationToken::new()).await?;

    println!("succeeded: {:?}", result.successful);
    if !result.failed.is_empty() {
        println!("failed: {:?}", result.failed);
    }

    Ok(())
}
