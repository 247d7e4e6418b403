//! Codewright: a concurrent codebase analysis engine.
//!
//! Given a repository root, [`scheduler::Scheduler`] orchestrates a set of
//! [`AgentDefinition`]s, each of which drives an [`llm::LlmClient`] through
//! [`agent::Agent`]'s tool-calling loop to produce one markdown artifact.
//! Work is skipped when a file's identity hasn't changed since the last run
//! ([`cache::analysis_cache`]), model calls are cached on disk
//! ([`cache::response_cache`]), and every provider's streaming response is
//! normalized through [`accumulator::StreamAccumulator`] over a retrying,
//! connection-pooled transport ([`transport`]).

pub mod accumulator;
pub mod agent;
pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod llm;
pub mod prompts;
pub mod scheduler;
pub mod stream;
pub mod tools;
pub mod transport;
pub mod types;

pub use agent::Agent;
pub use cache::{AnalysisCache, ChangeReport, PersistentResponseCache};
pub use config::AnalysisConfig;
pub use error::{AnalysisError, Result};
pub use prompts::{PromptProvider, StaticPromptProvider};
pub use scheduler::Scheduler;
pub use tools::{Tool, ToolSet};
pub use types::{
    AgentDefinition, AnalysisResult, CompletionRequest, CompletionResponse, FileFingerprint,
    Message, Role, ToolCall, ToolDefinition, Usage,
};

/// Installs a bare `tracing_subscriber` once per test binary so `tracing`
/// output surfaces under `cargo test -- --nocapture` instead of vanishing for
/// lack of a subscriber. The crate itself never installs one outside tests:
/// formatting and sinks are the embedding binary's concern.
#[cfg(test)]
pub(crate) fn init_test_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}
