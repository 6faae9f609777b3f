//! Shell tool — execute system commands.
//!
//! Supports command allowlisting and cooperative cancellation: when the
//! cancel token trips mid-run the child process is killed and the tool
//! returns promptly.

use async_trait::async_trait;
use ironloop_core::{SideEffect, Tool, ToolError};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Results larger than this come back as an error asking for a narrower
/// command.
const MAX_OUTPUT_CHARS: usize = 32_000;

/// Execute shell commands with safety constraints.
pub struct ShellTool {
    /// If non-empty, only these commands are allowed.
    allowed_commands: Vec<String>,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>) -> Self {
        Self { allowed_commands }
    }

    fn is_command_allowed(&self, command: &str) -> bool {
        if self.allowed_commands.is_empty() {
            return true; // No allowlist = all commands allowed
        }

        let base_cmd = command.split_whitespace().next().unwrap_or("").trim();
        self.allowed_commands.iter().any(|a| a == base_cmd)
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout/stderr. Use this for running programs, checking files, git operations, etc."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::ReadWrite
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        let command = arguments["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;

        if !self.is_command_allowed(command) {
            return Err(ToolError::ExecutionFailed {
                tool_name: "shell".into(),
                reason: format!(
                    "Command '{}' not in allowlist",
                    command.split_whitespace().next().unwrap_or("")
                ),
            });
        }

        debug!(command = %command, "Executing shell command");

        let mut child = if cfg!(target_os = "windows") {
            Command::new("cmd")
                .args(["/C", command])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
        } else {
            Command::new("sh")
                .args(["-c", command])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
        }
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "shell".into(),
            reason: e.to_string(),
        })?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(ToolError::Cancelled("shell".into()));
            }
            status = child.wait() => status,
        }
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "shell".into(),
            reason: e.to_string(),
        })?;

        let stdout_bytes = stdout_task.await.unwrap_or_default();
        let stderr_bytes = stderr_task.await.unwrap_or_default();

        let stdout = String::from_utf8_lossy(&stdout_bytes).to_string();
        let stderr = String::from_utf8_lossy(&stderr_bytes).to_string();
        let success = status.success();

        let result_text = if success {
            if stderr.is_empty() {
                stdout
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            }
        } else {
            let code = status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            format!("[exit code: {code}]\n{stdout}\n{stderr}")
        };

        if result_text.len() > MAX_OUTPUT_CHARS {
            return Err(ToolError::ExecutionFailed {
                tool_name: "shell".into(),
                reason: format!(
                    "output too large ({} chars, limit {}). Pipe through head/tail/grep to narrow it",
                    result_text.len(),
                    MAX_OUTPUT_CHARS
                ),
            });
        }

        Ok(result_text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn allowlist_check() {
        let tool = ShellTool::new(vec!["ls".into(), "cat".into(), "git".into()]);
        assert!(tool.is_command_allowed("ls -la"));
        assert!(tool.is_command_allowed("git status"));
        assert!(!tool.is_command_allowed("rm -rf /"));
        assert!(!tool.is_command_allowed("sudo something"));
    }

    #[test]
    fn empty_allowlist_allows_all() {
        let tool = ShellTool::new(vec![]);
        assert!(tool.is_command_allowed("anything goes"));
    }

    #[tokio::test]
    async fn execute_echo() {
        let tool = ShellTool::new(vec![]);
        let result = tool
            .execute(
                serde_json::json!({"command": "echo hello"}),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.contains("hello"));
    }

    #[tokio::test]
    async fn blocked_command() {
        let tool = ShellTool::new(vec!["ls".into()]);
        let result = tool
            .execute(
                serde_json::json!({"command": "rm -rf /"}),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(ToolError::ExecutionFailed { .. })));
    }

    #[tokio::test]
    async fn failed_command_reports_exit_code() {
        let tool = ShellTool::new(vec![]);
        let result = tool
            .execute(
                serde_json::json!({"command": "sh -c 'exit 3'"}),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.contains("exit code: 3"));
    }

    #[tokio::test]
    async fn cancellation_kills_long_running_command() {
        let tool = ShellTool::new(vec![]);
        let cancel = CancellationToken::new();
        let trip = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trip.cancel();
        });

        let start = std::time::Instant::now();
        let result = tool
            .execute(serde_json::json!({"command": "sleep 30"}), cancel)
            .await;

        assert!(matches!(result, Err(ToolError::Cancelled(_))));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
