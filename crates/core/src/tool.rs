//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what let the agent act in the world: run shell commands,
//! read and write files, fetch URLs, spawn sub-agents. Each tool declares
//! a JSON-Schema parameter contract and a side-effect class; the executor
//! validates arguments against the schema before dispatch, and the
//! sub-agent spawner filters registries by side-effect class.
//!
//! Per the tool ABI, failures a model can recover from are returned as
//! `Error: ...` text rather than thrown — only the executor converts
//! [`ToolError`] values into that text.

use crate::error::ToolError;
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Side-effect class of a tool, used for sub-agent tool filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    /// Only observes state (file reads, searches)
    ReadOnly,
    /// Mutates local state (file writes, shell)
    ReadWrite,
    /// Talks to the network
    Network,
    /// Spawns child agent loops
    SpawnsSubAgent,
}

/// The core Tool trait.
///
/// Each tool implements this trait and is registered in the
/// [`ToolRegistry`] at startup. The registry is never mutated afterwards.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "shell", "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Side-effect class, used when filtering tool sets for sub-agents.
    fn side_effect(&self) -> SideEffect;

    /// Per-tool timeout override. `None` means the executor's global
    /// default applies.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Execute the tool with validated arguments.
    ///
    /// Implementations must honor `cancel`: when it trips mid-execution
    /// they should stop promptly and return [`ToolError::Cancelled`].
    async fn execute(
        &self,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> std::result::Result<String, ToolError>;

    /// Convert this tool into a definition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Outcome status of a single tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Error,
    Timeout,
    Cancelled,
}

/// The result of dispatching one tool call.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    /// The call ID this result answers
    pub call_id: String,

    /// Name of the tool that ran (or was requested)
    pub tool_name: String,

    /// Outcome status
    pub status: ToolStatus,

    /// Payload text. For non-`Ok` statuses this begins with `Error:` and
    /// names the failure kind so the model can recover.
    pub content: String,

    /// Wall-clock duration of the call
    pub duration: Duration,
}

impl ToolCallResult {
    /// Whether the call completed successfully.
    pub fn is_ok(&self) -> bool {
        self.status == ToolStatus::Ok
    }
}

/// Validate arguments against a tool's JSON Schema.
///
/// This is the shared, schema-driven check used by the executor for every
/// tool: all `required` properties must be present, and any property whose
/// schema declares a primitive `type` must match it. Tools still defend
/// against semantic problems themselves; this catches shape mismatches
/// before dispatch.
pub fn validate_arguments(
    schema: &serde_json::Value,
    arguments: &serde_json::Value,
) -> std::result::Result<(), ToolError> {
    let obj = match arguments.as_object() {
        Some(obj) => obj,
        None => {
            return Err(ToolError::InvalidArguments(
                "arguments must be a JSON object".into(),
            ))
        }
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !obj.contains_key(key) {
                return Err(ToolError::InvalidArguments(format!(
                    "missing required argument '{key}'"
                )));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (key, value) in obj {
            let Some(prop_schema) = props.get(key) else {
                continue; // Unknown keys are tolerated, matching provider behavior
            };
            let Some(expected) = prop_schema.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            let matches = match expected {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "integer" => value.is_i64() || value.is_u64(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                "null" => value.is_null(),
                _ => true,
            };
            if !matches {
                return Err(ToolError::InvalidArguments(format!(
                    "argument '{key}' must be of type {expected}"
                )));
            }
        }
    }

    Ok(())
}

/// A registry of available tools.
///
/// Built once at startup and treated as immutable thereafter. Tools are
/// held behind `Arc` so filtered views ([`ToolRegistry::subset`]) handed
/// to sub-agents share the same implementations.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Get all tool definitions (for sending to the LLM), sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Build a filtered view containing only tools the predicate accepts.
    /// Implementations are shared, not cloned.
    pub fn subset(&self, keep: impl Fn(&dyn Tool) -> bool) -> ToolRegistry {
        let tools = self
            .tools
            .iter()
            .filter(|(_, t)| keep(t.as_ref()))
            .map(|(name, t)| (name.clone(), t.clone()))
            .collect();
        ToolRegistry { tools }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
