pub mod read_file;
pub mod search_files;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::ToolDefinition;

pub use read_file::ReadFileTool;
pub use search_files::SearchFilesTool;

/// A named, cancellable operation over the repository. Tools never write
/// outside their declared outputs and never escape `repo_root`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> serde_json::Value;

    async fn execute(
        &self,
        ctx: &CancellationToken,
        args: &HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// A lookup table of the tools one agent may call, scoped to a repository
/// root shared by every tool instance.
#[derive(Clone)]
pub struct ToolSet {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// The two mandatory tools, rooted at `repo_root`.
    pub fn standard(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        let mut set = Self::new();
        set.register(Arc::new(ReadFileTool::new(repo_root.clone())));
        set.register(Arc::new(SearchFilesTool::new(repo_root)));
        set
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Restricted to the given allow-list, in the order it is given.
    pub fn scoped(&self, names: &[String]) -> Vec<Arc<dyn Tool>> {
        names.iter().filter_map(|n| self.tools.get(n).cloned()).collect()
    }

    pub fn definitions(&self, names: &[String]) -> Vec<ToolDefinition> {
        self.scoped(names).iter().map(|t| t.definition()).collect()
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves a caller-supplied relative path against `repo_root`, rejecting
/// any path that would escape the root via `..` or an absolute component.
pub(crate) fn resolve_within_root(repo_root: &std::path::Path, relative: &str) -> Result<PathBuf> {
    use crate::error::AnalysisError;

    let candidate = std::path::Path::new(relative);
    if candidate.is_absolute() || candidate.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(AnalysisError::Tool {
            name: "path".to_string(),
            message: format!("path '{relative}' escapes the repository root"),
        });
    }
    Ok(repo_root.join(candidate))
}
