use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use ignore::WalkBuilder;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::{AnalysisError, Result};

use super::{resolve_within_root, Tool};

const MAX_LINE_LEN: usize = 300;
const MAX_TOTAL_BYTES: usize = 64 * 1024;

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "svg", "pdf", "zip", "tar", "gz", "tgz",
    "7z", "rar", "exe", "dll", "so", "dylib", "bin", "wasm", "class", "jar", "woff", "woff2",
    "ttf", "otf", "mp3", "mp4", "mov", "avi", "wav", "lock",
];

/// Substring search over a repository subtree, honoring gitignore-style
/// exclusions and skipping known-binary extensions.
pub struct SearchFilesTool {
    repo_root: PathBuf,
}

impl SearchFilesTool {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self { repo_root: repo_root.into() }
    }

    fn is_binary(path: &std::path::Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| BINARY_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &'static str {
        "search_files"
    }

    fn description(&self) -> &'static str {
        "Search repository files for a plain-text pattern, returning matching lines."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Non-empty substring to search for."},
                "path": {"type": "string", "description": "Repository-relative subtree to search. Defaults to the repository root."},
                "extensions": {"type": "array", "items": {"type": "string"}, "description": "Restrict matches to these file extensions."}
            },
            "required": ["pattern"]
        })
    }

    async fn execute(
        &self,
        ctx: &CancellationToken,
        args: &HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value> {
        if ctx.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        let pattern = args
            .get("pattern")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AnalysisError::Tool { name: self.name().to_string(), message: "'pattern' must be a non-empty string".to_string() })?
            .to_string();

        let subtree_arg = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let extensions: Option<Vec<String>> = args
            .get("extensions")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(|s| s.to_lowercase())).collect());

        let scoped_root = resolve_within_root(&self.repo_root, subtree_arg)?;
        if !scoped_root.exists() {
            return Ok(json!({
                "matches_count": 0,
                "results": Vec::<String>::new(),
                "message": format!("path '{subtree_arg}' does not exist"),
            }));
        }

        let repo_root = self.repo_root.clone();
        let (results, truncated) = tokio::task::spawn_blocking(move || {
            let mut results = Vec::new();
            let mut total_bytes = 0usize;
            let mut truncated = false;

            let walker = WalkBuilder::new(&scoped_root).hidden(false).git_ignore(true).git_global(false).build();

            'walk: for entry in walker {
                let Ok(entry) = entry else { continue };
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                if Self::is_binary(path) {
                    continue;
                }
                if let Some(exts) = &extensions {
                    let ext = path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase());
                    if !ext.map(|e| exts.contains(&e)).unwrap_or(false) {
                        continue;
                    }
                }

                let Ok(contents) = std::fs::read_to_string(path) else { continue };
                let rel = path.strip_prefix(&repo_root).unwrap_or(path).display().to_string();

                for (idx, line) in contents.lines().enumerate() {
                    if !line.contains(&pattern) {
                        continue;
                    }
                    let mut trimmed = line.trim().to_string();
                    if trimmed.len() > MAX_LINE_LEN {
                        trimmed.truncate(MAX_LINE_LEN);
                        trimmed.push_str("...");
                    }
                    let entry_line = format!("{rel}:{}: {trimmed}", idx + 1);
                    total_bytes += entry_line.len();
                    if total_bytes > MAX_TOTAL_BYTES {
                        truncated = true;
                        break 'walk;
                    }
                    results.push(entry_line);
                }
            }

            (results, truncated)
        })
        .await
        .map_err(|e| AnalysisError::Tool { name: "search_files".to_string(), message: format!("search task panicked: {e}") })?;

        let mut response = json!({
            "matches_count": results.len(),
            "results": results,
        });
        if truncated {
            response["warning"] = json!("results truncated: total output exceeded the size cap");
        }

        Ok(response)
    }
}
