//! Built-in tool implementations for ironloop.
//!
//! Tools give the agent the ability to interact with the world: run
//! shell commands, read/write files, fetch URLs, do math. Each tool
//! declares a side-effect class the sub-agent spawner uses when
//! filtering tool sets, and each is responsible for its own output size
//! discipline — results that would blow the context come back as
//! `Error:` text steering the model toward narrower queries.

pub mod calculator;
pub mod file_read;
pub mod file_write;
pub mod http_request;
pub mod shell;

use ironloop_core::ToolRegistry;
use std::sync::Arc;

/// Create a registry with all built-in tools.
///
/// Security defaults: the shell allowlist admits only common safe
/// commands; file tools refuse a handful of sensitive path prefixes.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let safe_commands = vec![
        "ls".into(),
        "cat".into(),
        "head".into(),
        "tail".into(),
        "echo".into(),
        "pwd".into(),
        "date".into(),
        "whoami".into(),
        "wc".into(),
        "grep".into(),
        "find".into(),
        "which".into(),
        "git".into(),
        "cargo".into(),
        "rustc".into(),
        "python".into(),
        "sleep".into(),
    ];
    registry.register(Arc::new(shell::ShellTool::new(safe_commands)));
    registry.register(Arc::new(file_read::FileReadTool::new()));
    registry.register(Arc::new(file_write::FileWriteTool::new()));
    registry.register(Arc::new(calculator::CalculatorTool));
    registry.register(Arc::new(http_request::HttpRequestTool::new()));
    registry
}
