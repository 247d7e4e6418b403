use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::{AnalysisError, Result};

use super::{resolve_within_root, Tool};

/// Reads a slice of a repository file. Arguments: `file_path` (required),
/// `line_number` (1-based, optional), `line_count` (optional). Defaults to
/// the whole file. Accepts both numeric and string-typed line numbers since
/// models are inconsistent about quoting integers.
pub struct ReadFileTool {
    repo_root: PathBuf,
}

impl ReadFileTool {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self { repo_root: repo_root.into() }
    }
}

fn tolerant_u64(value: &serde_json::Value, field: &str) -> Result<Option<u64>> {
    match value.get(field) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| AnalysisError::Tool { name: "read_file".to_string(), message: format!("'{field}' must be a positive integer") }),
        Some(serde_json::Value::String(s)) => s
            .parse::<u64>()
            .map(Some)
            .map_err(|_| AnalysisError::Tool { name: "read_file".to_string(), message: format!("'{field}' must be a positive integer") }),
        Some(_) => Err(AnalysisError::Tool { name: "read_file".to_string(), message: format!("'{field}' must be a number or numeric string") }),
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a slice of a file in the repository, returned as an array of lines."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Repository-relative path of the file to read."},
                "line_number": {"type": "integer", "minimum": 1, "description": "First line to read, 1-based. Defaults to 1."},
                "line_count": {"type": "integer", "minimum": 1, "description": "Number of lines to read. Defaults to the rest of the file."}
            },
            "required": ["file_path"]
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

        let file_path = args
            .get("file_path")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AnalysisError::Tool { name: self.name().to_string(), message: "missing or invalid 'file_path'".to_string() })?;

        let whole = serde_json::Value::Object(args.clone().into_iter().collect());
        let line_number = tolerant_u64(&whole, "line_number")?.unwrap_or(1).max(1);
        let line_count = tolerant_u64(&whole, "line_count")?;

        let path = resolve_within_root(&self.repo_root, file_path)?;

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(json!({"error": true, "message": format!("file not found: {file_path}")}));
            }
            Err(e) => return Err(AnalysisError::Io(e)),
        };

        let lines: Vec<&str> = if contents.is_empty() {
            Vec::new()
        } else {
            contents.lines().collect()
        };

        if lines.is_empty() {
            return Ok(json!({"content": Vec::<String>::new(), "start_line": 0, "end_line": 0}));
        }

        let start_idx = ((line_number - 1) as usize).min(lines.len());
        let end_idx = match line_count {
            Some(count) => (start_idx + count as usize).min(lines.len()),
            None => lines.len(),
        };

        let slice: Vec<&str> = lines[start_idx..end_idx].to_vec();
        let start_line = if slice.is_empty() { 0 } else { start_idx + 1 };
        let end_line = if slice.is_empty() { 0 } else { end_idx };

        Ok(json!({
            "content": slice,
            "start_line": start_line,
            "end_line": end_line,
        }))
    }
}
