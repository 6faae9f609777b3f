//! Tool executor — resolves, validates, times out, and contains tool
//! calls.
//!
//! Every failure a tool can produce is folded into a
//! [`ToolCallResult`] whose content starts with `Error:` and names the
//! taxonomy kind, so the model can see what went wrong and recover.
//! Nothing a tool does — not even a panic — propagates into the loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ironloop_core::{
    validate_arguments, ToolCallRequest, ToolCallResult, ToolError, ToolRegistry, ToolStatus,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Dispatches tool calls against a registry.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    default_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute one tool call under timeout and cancellation.
    ///
    /// 1. Unknown name → `error/unknown_tool`
    /// 2. Schema mismatch → `error/invalid_arguments`
    /// 3. Deadline exceeded → `timeout` (the tool's work is cancelled)
    /// 4. Cancellation trip → `cancelled`
    /// 5. Panic in the tool body → `error/tool_crashed`
    pub async fn execute(
        &self,
        call: &ToolCallRequest,
        cancel: CancellationToken,
    ) -> ToolCallResult {
        let start = Instant::now();

        let Some(tool) = self.registry.get(&call.name) else {
            return self.result(
                call,
                ToolStatus::Error,
                format!("Error: unknown_tool: no tool named '{}' is registered", call.name),
                start,
            );
        };

        let arguments: serde_json::Value = match serde_json::from_str(&call.arguments) {
            Ok(value) => value,
            Err(e) => {
                return self.result(
                    call,
                    ToolStatus::Error,
                    format!("Error: invalid_arguments: arguments are not valid JSON ({e})"),
                    start,
                );
            }
        };

        if let Err(e) = validate_arguments(&tool.parameters_schema(), &arguments) {
            return self.result(
                call,
                ToolStatus::Error,
                format!("Error: invalid_arguments: {e}"),
                start,
            );
        }

        let timeout = tool.timeout().unwrap_or(self.default_timeout);
        debug!(tool = %call.name, timeout_secs = timeout.as_secs(), "Dispatching tool call");

        // Run in a spawned task so a panicking tool unwinds there, not in
        // the loop.
        let tool_cancel = cancel.child_token();
        let task_cancel = tool_cancel.clone();
        let mut handle = tokio::spawn(async move { tool.execute(arguments, task_cancel).await });

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                tool_cancel.cancel();
                // Give the tool its cancel window, then drop it.
                let _ = tokio::time::timeout(Duration::from_secs(5), &mut handle).await;
                return self.result(
                    call,
                    ToolStatus::Cancelled,
                    "Error: cancelled: tool execution was cancelled".into(),
                    start,
                );
            }
            outcome = tokio::time::timeout(timeout, &mut handle) => outcome,
        };

        match outcome {
            Err(_elapsed) => {
                tool_cancel.cancel();
                handle.abort();
                warn!(tool = %call.name, timeout_secs = timeout.as_secs(), "Tool call timed out");
                self.result(
                    call,
                    ToolStatus::Timeout,
                    format!(
                        "Error: timeout: tool '{}' exceeded its {}s deadline",
                        call.name,
                        timeout.as_secs()
                    ),
                    start,
                )
            }
            Ok(Err(join_err)) if join_err.is_panic() => {
                warn!(tool = %call.name, "Tool panicked");
                self.result(
                    call,
                    ToolStatus::Error,
                    format!("Error: tool_crashed: tool '{}' panicked during execution", call.name),
                    start,
                )
            }
            Ok(Err(join_err)) => self.result(
                call,
                ToolStatus::Cancelled,
                format!("Error: cancelled: tool task aborted ({join_err})"),
                start,
            ),
            Ok(Ok(Ok(output))) => self.result(call, ToolStatus::Ok, output, start),
            Ok(Ok(Err(tool_err))) => {
                let (status, content) = match &tool_err {
                    ToolError::Cancelled(_) => (
                        ToolStatus::Cancelled,
                        "Error: cancelled: tool execution was cancelled".to_string(),
                    ),
                    ToolError::Timeout { tool_name, timeout_secs } => (
                        ToolStatus::Timeout,
                        format!("Error: timeout: tool '{tool_name}' exceeded its {timeout_secs}s deadline"),
                    ),
                    ToolError::InvalidArguments(msg) => {
                        (ToolStatus::Error, format!("Error: invalid_arguments: {msg}"))
                    }
                    ToolError::Crashed { tool_name, reason } => (
                        ToolStatus::Error,
                        format!("Error: tool_crashed: '{tool_name}' — {reason}"),
                    ),
                    ToolError::NotFound(name) => (
                        ToolStatus::Error,
                        format!("Error: unknown_tool: no tool named '{name}' is registered"),
                    ),
                    ToolError::ExecutionFailed { reason, .. } => {
                        (ToolStatus::Error, format!("Error: {reason}"))
                    }
                };
                self.result(call, status, content, start)
            }
        }
    }

    fn result(
        &self,
        call: &ToolCallRequest,
        status: ToolStatus,
        content: String,
        start: Instant,
    ) -> ToolCallResult {
        ToolCallResult {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status,
            content,
            duration: start.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ironloop_core::{SideEffect, Tool};

    struct SleepyTool;

    #[async_trait]
    impl Tool for SleepyTool {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "Sleeps for a long time"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        fn side_effect(&self) -> SideEffect {
            SideEffect::ReadOnly
        }
        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(50))
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
            cancel: CancellationToken,
        ) -> Result<String, ToolError> {
            tokio::select! {
                _ = cancel.cancelled() => Err(ToolError::Cancelled("sleepy".into())),
                _ = tokio::time::sleep(Duration::from_secs(60)) => Ok("woke up".into()),
            }
        }
    }

    /// Sleeps under the executor's default timeout; honors cancel.
    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Sleeps with no timeout override"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        fn side_effect(&self) -> SideEffect {
            SideEffect::ReadOnly
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
            cancel: CancellationToken,
        ) -> Result<String, ToolError> {
            tokio::select! {
                _ = cancel.cancelled() => Err(ToolError::Cancelled("slow".into())),
                _ = tokio::time::sleep(Duration::from_secs(60)) => Ok("woke up".into()),
            }
        }
    }

    struct PanickyTool;

    #[async_trait]
    impl Tool for PanickyTool {
        fn name(&self) -> &str {
            "panicky"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        fn side_effect(&self) -> SideEffect {
            SideEffect::ReadOnly
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
            _cancel: CancellationToken,
        ) -> Result<String, ToolError> {
            panic!("tool blew up");
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
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
            Ok(arguments["text"].as_str().unwrap_or("").to_string())
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(SleepyTool));
        registry.register(Arc::new(SlowTool));
        registry.register(Arc::new(PanickyTool));
        ToolExecutor::new(Arc::new(registry), Duration::from_secs(10))
    }

    fn call(name: &str, args: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: format!("call_{name}"),
            name: name.into(),
            arguments: args.into(),
        }
    }

    #[tokio::test]
    async fn successful_execution() {
        let result = executor()
            .execute(&call("echo", r#"{"text":"hi"}"#), CancellationToken::new())
            .await;
        assert_eq!(result.status, ToolStatus::Ok);
        assert_eq!(result.content, "hi");
        assert_eq!(result.call_id, "call_echo");
    }

    #[tokio::test]
    async fn unknown_tool_named_in_error() {
        let result = executor()
            .execute(&call("mytool", "{}"), CancellationToken::new())
            .await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.content.starts_with("Error:"));
        assert!(result.content.contains("unknown_tool"));
        assert!(result.content.contains("mytool"));
    }

    #[tokio::test]
    async fn invalid_json_arguments() {
        let result = executor()
            .execute(&call("echo", "not json"), CancellationToken::new())
            .await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.content.contains("invalid_arguments"));
    }

    #[tokio::test]
    async fn schema_mismatch() {
        let result = executor()
            .execute(&call("echo", r#"{"text": 42}"#), CancellationToken::new())
            .await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.content.contains("invalid_arguments"));
    }

    #[tokio::test]
    async fn missing_required_argument() {
        let result = executor()
            .execute(&call("echo", "{}"), CancellationToken::new())
            .await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.content.contains("invalid_arguments"));
        assert!(result.content.contains("text"));
    }

    #[tokio::test]
    async fn per_tool_timeout_override() {
        let result = executor()
            .execute(&call("sleepy", "{}"), CancellationToken::new())
            .await;
        assert_eq!(result.status, ToolStatus::Timeout);
        assert!(result.content.contains("timeout"));
    }

    #[tokio::test]
    async fn panic_contained_as_tool_crashed() {
        let result = executor()
            .execute(&call("panicky", "{}"), CancellationToken::new())
            .await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.content.contains("tool_crashed"));
    }

    #[tokio::test]
    async fn cancellation_mid_execution() {
        let exec = executor();
        let cancel = CancellationToken::new();
        let trip = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trip.cancel();
        });

        // The slow tool runs under the 10s default timeout; the cancel
        // trip at 20ms must win.
        let start = Instant::now();
        let result = exec.execute(&call("slow", "{}"), cancel).await;
        assert_eq!(result.status, ToolStatus::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
