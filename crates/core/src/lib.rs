//! Core domain types for the ironloop agent runtime.
//!
//! Everything here is shared vocabulary between the memory, provider,
//! tool, and agent crates:
//!
//! - [`Message`] / [`Role`] — one turn in a conversation
//! - [`Tool`] / [`ToolRegistry`] — schema-typed async capabilities
//! - [`Provider`] — the LLM backend abstraction
//! - [`Error`] and its bounded-context sub-errors

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

pub use error::{Error, FatalError, MemoryError, ProviderError, Result, ToolError};
pub use message::{Message, Role, ToolCallRequest};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use tool::{validate_arguments, SideEffect, Tool, ToolCallResult, ToolRegistry, ToolStatus};
