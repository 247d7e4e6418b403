use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::llm::LlmClient;
use crate::tools::Tool;
use crate::types::{CompletionRequest, Message, ToolDefinition};

/// One run of the tool-calling loop: a system prompt, an initial user
/// message, a scoped tool set, and a model client, iterated until the model
/// answers without requesting another tool call.
///
/// Tool calls within a single turn run sequentially, in the order the model
/// returned them — reproducibility over throughput, since a scheduler
/// already supplies the crate's parallelism across agents.
pub struct Agent {
    system_prompt: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    tools: Vec<Arc<dyn Tool>>,
    tool_definitions: Vec<ToolDefinition>,
}

impl Agent {
    pub fn new(system_prompt: impl Into<String>, model: impl Into<String>, temperature: f32, max_tokens: u32, tools: Vec<Arc<dyn Tool>>) -> Self {
        let tool_definitions = tools.iter().map(|t| t.definition()).collect();
        Self { system_prompt: system_prompt.into(), model: model.into(), temperature, max_tokens, tools, tool_definitions }
    }

    fn find_tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Runs the loop to completion against `client`, seeded with
    /// `user_prompt`. Returns the final assistant content as the artifact.
    /// A model failure aborts the run; a tool failure is reported back to
    /// the model as a tool message and the loop continues.
    pub async fn run(&self, ctx: &CancellationToken, client: &dyn LlmClient, user_prompt: &str) -> Result<String> {
        let mut history = vec![Message::user(user_prompt)];

        loop {
            if ctx.is_cancelled() {
                return Err(crate::error::AnalysisError::Cancelled);
            }

            let request = CompletionRequest {
                model: self.model.clone(),
                system_prompt: self.system_prompt.clone(),
                messages: history.clone(),
                tools: self.tool_definitions.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            };

            let response = client.generate_completion(ctx, &request).await?;
            history.push(Message::assistant(response.content.clone(), response.tool_calls.clone()));

            if response.tool_calls.is_empty() {
                return Ok(response.content);
            }

            for tool_call in &response.tool_calls {
                let result = match self.find_tool(&tool_call.name) {
                    Some(tool) => {
                        info!(tool = %tool_call.name, "running tool");
                        tool.execute(ctx, &tool_call.arguments).await
                    }
                    None => Err(crate::error::AnalysisError::Tool {
                        name: tool_call.name.clone(),
                        message: format!("unknown tool '{}'", tool_call.name),
                    }),
                };

                let content = match result {
                    Ok(value) => value.to_string(),
                    Err(e) => {
                        warn!(tool = %tool_call.name, error = %e, "tool call failed, reporting to model");
                        format!("{{\"error\": true, \"message\": {}}}", serde_json::Value::String(e.to_string()))
                    }
                };

                history.push(Message::tool_result(tool_call.id.clone(), content));
            }
        }
    }
}

/// A standalone helper mirroring `Agent::run`'s tool-lookup step, exposed so
/// callers needing just a single dispatch (outside a full loop) don't have
/// to duplicate the "unknown tool becomes an error result" rule.
pub async fn dispatch_tool_call(
    ctx: &CancellationToken,
    tools: &[Arc<dyn Tool>],
    name: &str,
    arguments: &HashMap<String, serde_json::Value>,
) -> Result<serde_json::Value> {
    match tools.iter().find(|t| t.name() == name) {
        Some(tool) => tool.execute(ctx, arguments).await,
        None => Err(crate::error::AnalysisError::Tool { name: name.to_string(), message: format!("unknown tool '{name}'") }),
    }
}
