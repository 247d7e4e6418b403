use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single turn in a model conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Tool calls the assistant requested in this turn, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set when this message is the *result* of a tool call (`role == Tool`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), tool_calls: Vec::new(), tool_call_id: None }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_calls, tool_call_id: None }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A model-issued request to invoke a named tool.
///
/// `provider_token` round-trips an opaque, provider-supplied identifier for
/// the part that produced this call (required by the NDJSON-style provider to
/// correlate a follow-up `functionResponse` with its originating part). It is
/// never inspected, only carried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_token: Option<String>,
}

/// A tool definition advertised to the model alongside a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

/// A provider-neutral request to generate one completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A provider-neutral completion, built by a streaming accumulator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

/// One analysis agent: what it's called, which prompt it renders, which file
/// changes invalidate it, and which tools it is allowed to call.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub prompt_name: String,
    pub invalidation_patterns: Vec<String>,
    pub tools: Vec<String>,
}

/// A single file's identity as tracked by the fingerprint index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub hash: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
}

/// Outcome of one scheduler run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub successful: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl AnalysisResult {
    /// True when every attempted agent failed (and at least one ran).
    pub fn all_failed(&self) -> bool {
        self.successful.is_empty() && !self.failed.is_empty()
    }
}
