//! Error types for the ironloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded context
//! has its own error enum; tool-level failures and loop-level fatals are
//! kept in separate sum types so a tool error can never cross the boundary
//! into a fatal by accident.

use thiserror::Error;

/// The top-level error type for ironloop operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether a retry wrapper should try this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Network(_)
                | ProviderError::Timeout(_)
                | ProviderError::ApiError {
                    status_code: 500..=599,
                    ..
                }
        )
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Tool cancelled: {0}")]
    Cancelled(String),

    #[error("Tool crashed: {tool_name} — {reason}")]
    Crashed { tool_name: String, reason: String },

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Ambiguous session prefix '{prefix}': {matches} matches")]
    AmbiguousPrefix { prefix: String, matches: usize },

    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Loop-level fatal outcomes. At the task boundary the runtime controller
/// produces either a string result or one of these — never both.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("Task cancelled")]
    Cancelled,

    #[error("Provider failed after retries: {0}")]
    Provider(#[source] ProviderError),

    #[error("Unrecoverable runtime error: {0}")]
    Internal(String),
}
