//! Shared scripted providers for loop tests.
//!
//! Test support, compiled into the library so integration tests can use
//! it too.

use async_trait::async_trait;
use ironloop_core::{
    Message, Provider, ProviderError, ProviderRequest, ProviderResponse, ToolCallRequest, Usage,
};
use std::sync::{Arc, Mutex};

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue.
/// Panics if more calls are made than responses provided.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    calls: Mutex<usize>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            calls: Mutex::new(0),
        })
    }

    /// A provider that returns one text response.
    pub fn single_text(text: &str) -> Arc<Self> {
        Self::new(vec![text_response(text)])
    }

    /// A provider whose every call fails with the given error.
    pub fn failing_with(error: ProviderError) -> Arc<Self> {
        Self::with_script(vec![Err(error)])
    }

    /// A provider following an explicit success/failure script.
    pub fn with_script(script: Vec<Result<ProviderResponse, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(script),
            calls: Mutex::new(0),
        })
    }

    /// Number of `complete` calls made so far.
    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(
        &self,
        _request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut calls = self.calls.lock().unwrap();
        let mut responses = self.responses.lock().unwrap();

        if responses.is_empty() {
            panic!("SequentialMockProvider: no more responses (call #{})", *calls + 1);
        }

        *calls += 1;
        responses.remove(0)
    }
}

/// A provider that blocks until cancelled; for interrupt tests.
pub struct HangingProvider;

#[async_trait]
impl Provider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn complete(
        &self,
        _request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Err(ProviderError::Timeout("unreachable".into()))
    }
}

/// Create a plain text response (no tool calls).
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            input_tokens: 10,
            output_tokens: 5,
        }),
        model: "mock-model".into(),
    }
}

/// Create a response with tool calls and optional thought content.
pub fn tool_call_response(thought: &str, tool_calls: Vec<ToolCallRequest>) -> ProviderResponse {
    let content = if thought.is_empty() {
        None
    } else {
        Some(thought.to_string())
    };
    ProviderResponse {
        message: Message::assistant_with_tools(content, tool_calls),
        usage: Some(Usage {
            input_tokens: 10,
            output_tokens: 5,
        }),
        model: "mock-model".into(),
    }
}

/// Helper to create a tool call request.
pub fn make_tool_call(id: &str, name: &str, arguments: &str) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}
