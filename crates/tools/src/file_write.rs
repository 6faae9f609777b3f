//! File write tool — create or overwrite files with path validation.

use async_trait::async_trait;
use ironloop_core::{SideEffect, Tool, ToolError};
use tokio_util::sync::CancellationToken;

/// Path prefixes never written, regardless of configuration.
const DEFAULT_FORBIDDEN: &[&str] = &["/etc", "/proc", "/sys", "/boot"];

pub struct FileWriteTool {
    forbidden_paths: Vec<String>,
}

impl FileWriteTool {
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

impl Default for FileWriteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it (and parent directories) if needed. Overwrites existing content."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::ReadWrite
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;

        if !self.is_path_allowed(path) {
            return Err(ToolError::ExecutionFailed {
                tool_name: "write_file".into(),
                reason: format!("path '{path}' is not allowed"),
            });
        }

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ToolError::ExecutionFailed {
                        tool_name: "write_file".into(),
                        reason: format!("failed to create parent directories: {e}"),
                    }
                })?;
            }
        }

        tokio::fs::write(path, content)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "write_file".into(),
                reason: format!("failed to write '{path}': {e}"),
            })?;

        Ok(format!("Wrote {} bytes to {path}", content.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("sub").join("out.txt");

        let tool = FileWriteTool::new();
        let result = tool
            .execute(
                serde_json::json!({
                    "path": file_path.to_str().unwrap(),
                    "content": "written content"
                }),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.contains("15 bytes"));
        assert_eq!(
            std::fs::read_to_string(&file_path).unwrap(),
            "written content"
        );
    }

    #[tokio::test]
    async fn forbidden_path_blocked() {
        let tool = FileWriteTool::new();
        let result = tool
            .execute(
                serde_json::json!({"path": "/etc/evil.conf", "content": "x"}),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(ToolError::ExecutionFailed { .. })));
    }

    #[tokio::test]
    async fn missing_content_argument() {
        let tool = FileWriteTool::new();
        let result = tool
            .execute(
                serde_json::json!({"path": "/tmp/x.txt"}),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }
}
