//! File read tool — read file contents with path validation and an
//! output ceiling.

use async_trait::async_trait;
use ironloop_core::{SideEffect, Tool, ToolError};
use tokio_util::sync::CancellationToken;

/// Reads larger than this come back as an error suggesting offset/limit.
const MAX_OUTPUT_CHARS: usize = 48_000;

/// Path prefixes never served, regardless of configuration.
const DEFAULT_FORBIDDEN: &[&str] = &["/etc/shadow", "/proc", "/sys"];

pub struct FileReadTool {
    /// Forbidden path prefixes beyond the built-in set.
    forbidden_paths: Vec<String>,
}

impl FileReadTool {
    pub fn new() -> Self {
        Self {
            forbidden_paths: Vec::new(),
        }
    }

    pub fn with_forbidden_paths(forbidden_paths: Vec<String>) -> Self {
        Self { forbidden_paths }
    }

    fn is_path_allowed(&self, path: &str) -> bool {
        if path.contains("..") {
            return false;
        }
        !DEFAULT_FORBIDDEN
            .iter()
            .map(|p| p.to_string())
            .chain(self.forbidden_paths.iter().cloned())
            .any(|prefix| path.starts_with(&prefix))
    }
}

impl Default for FileReadTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. For large files, pass line_offset and line_limit to read a slice."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
                },
                "line_offset": {
                    "type": "integer",
                    "description": "First line to return (0-based, default 0)"
                },
                "line_limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return"
                }
            },
            "required": ["path"]
        })
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::ReadOnly
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;

        if !self.is_path_allowed(path) {
            return Err(ToolError::ExecutionFailed {
                tool_name: "read_file".into(),
                reason: format!("path '{path}' is not allowed"),
            });
        }

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ToolError::ExecutionFailed {
                tool_name: "read_file".into(),
                reason: format!("failed to read '{path}': {e}"),
            }
        })?;

        let offset = arguments["line_offset"].as_u64().unwrap_or(0) as usize;
        let limit = arguments["line_limit"].as_u64().map(|n| n as usize);

        let sliced: String = match limit {
            Some(limit) => content
                .lines()
                .skip(offset)
                .take(limit)
                .collect::<Vec<_>>()
                .join("\n"),
            None if offset > 0 => content.lines().skip(offset).collect::<Vec<_>>().join("\n"),
            None => content,
        };

        if sliced.len() > MAX_OUTPUT_CHARS {
            return Err(ToolError::ExecutionFailed {
                tool_name: "read_file".into(),
                reason: format!(
                    "output too large ({} chars, limit {}). Re-read with line_offset/line_limit",
                    sliced.len(),
                    MAX_OUTPUT_CHARS
                ),
            });
        }

        Ok(sliced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn tool_definition() {
        let tool = FileReadTool::new();
        assert_eq!(tool.name(), "read_file");
        assert_eq!(tool.side_effect(), SideEffect::ReadOnly);
        let schema = tool.parameters_schema();
        assert_eq!(schema["required"], serde_json::json!(["path"]));
    }

    #[tokio::test]
    async fn read_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("test.txt");
        let mut f = std::fs::File::create(&file_path).unwrap();
        writeln!(f, "Hello, world!").unwrap();

        let tool = FileReadTool::new();
        let result = tool
            .execute(
                serde_json::json!({"path": file_path.to_str().unwrap()}),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.contains("Hello, world!"));
    }

    #[tokio::test]
    async fn read_slice_with_offset_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("lines.txt");
        std::fs::write(&file_path, "a\nb\nc\nd\ne\n").unwrap();

        let tool = FileReadTool::new();
        let result = tool
            .execute(
                serde_json::json!({
                    "path": file_path.to_str().unwrap(),
                    "line_offset": 1,
                    "line_limit": 2
                }),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result, "b\nc");
    }

    #[tokio::test]
    async fn read_nonexistent_file() {
        let tool = FileReadTool::new();
        let result = tool
            .execute(
                serde_json::json!({"path": "/tmp/ironloop_test_nonexistent_12345.txt"}),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(ToolError::ExecutionFailed { .. })));
    }

    #[tokio::test]
    async fn path_traversal_blocked() {
        let tool = FileReadTool::new();
        let result = tool
            .execute(
                serde_json::json!({"path": "../../../etc/passwd"}),
                CancellationToken::new(),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn oversized_output_guides_pagination() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("big.txt");
        std::fs::write(&file_path, "x".repeat(MAX_OUTPUT_CHARS + 1)).unwrap();

        let tool = FileReadTool::new();
        let err = tool
            .execute(
                serde_json::json!({"path": file_path.to_str().unwrap()}),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("line_offset"));
    }
}
