//! The inner ReAct loop — Think, Act, Observe.
//!
//! Each iteration builds context, awaits the provider, and either
//! returns the assistant's text (no tool calls) or dispatches every
//! requested call serially in declared order and loops. Tool-level
//! failures come back as `Error:` tool results and the loop continues so
//! the model can recover; only cancellation and post-retry provider
//! failures unwind as fatals.

use std::sync::Arc;

use ironloop_core::{
    FatalError, Message, Provider, ProviderError, ProviderRequest, Usage,
};
use ironloop_memory::MemoryManager;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::executor::ToolExecutor;

/// Result text when the loop runs out of iterations.
pub const MAX_ITERATIONS_MARKER: &str = "Maximum iterations reached without completion.";

/// The inner Think–Act–Observe loop.
#[derive(Clone)]
pub struct ReactLoop {
    provider: Arc<dyn Provider>,
    model: String,
    executor: Arc<ToolExecutor>,
    max_iterations: u32,
    max_tokens: Option<u32>,
    reasoning_effort: Option<String>,
}

impl ReactLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        executor: Arc<ToolExecutor>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            executor,
            max_iterations: 1000,
            max_tokens: None,
            reasoning_effort: None,
        }
    }

    /// Set the maximum number of loop iterations.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the default max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Pass a reasoning-effort hint through to the provider.
    pub fn with_reasoning_effort(mut self, effort: Option<String>) -> Self {
        self.reasoning_effort = effort;
        self
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    /// Run against shared memory: context comes from the memory manager
    /// and every turn is published back through it.
    pub async fn run(
        &self,
        memory: &MemoryManager,
        cancel: CancellationToken,
    ) -> Result<String, FatalError> {
        let tool_defs = self.executor.registry().definitions();
        memory.set_tool_schemas(&tool_defs).await;
        self.run_with(LoopContext::Shared(memory), cancel).await
    }

    /// Run against a detached local transcript. Sub-agents use this so
    /// they never share the parent's buffer; `seed` is their context
    /// snapshot.
    pub async fn run_detached(
        &self,
        seed: Vec<Message>,
        cancel: CancellationToken,
    ) -> Result<String, FatalError> {
        self.run_with(LoopContext::Detached(seed), cancel).await
    }

    async fn run_with(
        &self,
        mut context: LoopContext<'_>,
        cancel: CancellationToken,
    ) -> Result<String, FatalError> {
        let tool_defs = self.executor.registry().definitions();

        for iteration in 1..=self.max_iterations {
            if cancel.is_cancelled() {
                return Err(FatalError::Cancelled);
            }

            debug!(iteration, max = self.max_iterations, "Loop iteration");

            let request = ProviderRequest {
                model: self.model.clone(),
                messages: context.snapshot().await,
                max_tokens: self.max_tokens,
                tools: tool_defs.clone(),
                reasoning_effort: self.reasoning_effort.clone(),
            };

            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(FatalError::Cancelled),
                response = self.provider.complete(request) => response,
            }
            .map_err(|e| match e {
                ProviderError::Cancelled => FatalError::Cancelled,
                other => FatalError::Provider(other),
            })?;

            let usage = response.usage;
            let message = response.message;

            // No tool calls: this is the final answer. A response with
            // neither text nor calls terminates with an empty string.
            if message.tool_calls.is_empty() {
                let answer = message.text().to_string();
                context.push(message, usage).await;
                info!(iteration, "Loop complete");
                return Ok(answer);
            }

            let calls = message.tool_calls.clone();
            context.push(message, usage).await;

            for call in &calls {
                let result = self.executor.execute(call, cancel.child_token()).await;
                debug!(
                    tool = %result.tool_name,
                    status = ?result.status,
                    duration_ms = result.duration.as_millis() as u64,
                    "Tool call finished"
                );
                context
                    .push(
                        Message::tool_result(&result.call_id, &result.tool_name, &result.content),
                        None,
                    )
                    .await;

                // A cancelled tool under a tripped task token means the
                // whole run is unwinding.
                if cancel.is_cancelled() {
                    return Err(FatalError::Cancelled);
                }
            }
        }

        warn!(max = self.max_iterations, "Max iterations reached");
        Ok(MAX_ITERATIONS_MARKER.to_string())
    }
}

/// Where the loop reads and publishes its turns.
enum LoopContext<'a> {
    /// The shared memory manager (main agent).
    Shared(&'a MemoryManager),
    /// A private transcript (sub-agents).
    Detached(Vec<Message>),
}

impl LoopContext<'_> {
    async fn snapshot(&self) -> Vec<Message> {
        match self {
            LoopContext::Shared(memory) => memory.get_context_for_llm().await,
            LoopContext::Detached(messages) => messages.clone(),
        }
    }

    async fn push(&mut self, message: Message, usage: Option<Usage>) {
        match self {
            LoopContext::Shared(memory) => memory.add_message(message, usage).await,
            LoopContext::Detached(messages) => messages.push(message),
        }
    }
}
