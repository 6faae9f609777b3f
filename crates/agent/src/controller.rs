//! The runtime controller — session lifecycle and cancellation.
//!
//! Owns the per-task cancellation token and propagates it into the
//! loops, the executor, and every sub-agent. After any unwind the
//! controller rolls back partial tool exchanges so the next emitted
//! context is well-formed, then persists the session. At the task
//! boundary it produces either a string result or a typed
//! [`FatalError`] — never both.

use std::sync::Arc;

use ironloop_core::{FatalError, Message};
use ironloop_memory::MemoryManager;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::react::ReactLoop;
use crate::verifier::{Verifier, VerifierLoop};

/// The system prompt installed on a session's first turn.
pub const SYSTEM_PROMPT: &str = "You are a capable AI assistant that uses tools to accomplish \
tasks efficiently and reliably.

Follow a Think-Act-Observe pattern for each request: analyze what is needed and pick the best \
tool, execute it, check the result, then either continue with more tool calls or provide your \
final answer directly.

Guidelines:
- Think before acting; use the most efficient tool for each operation.
- For complex tasks that need research first, gather context with explore_context before \
making changes.
- For three or more independent subtasks, use parallel_execute with explicit dependencies.
- Never read several large files in one step; narrow your queries instead.
- When you have enough information, answer directly without further tool calls.";

/// Drives a task from submission to result.
pub struct RuntimeController {
    memory: Arc<MemoryManager>,
    react: ReactLoop,
    verifier: Option<(Arc<dyn Verifier>, u32)>,
    cancel: CancellationToken,
}

impl RuntimeController {
    pub fn new(memory: Arc<MemoryManager>, react: ReactLoop) -> Self {
        Self {
            memory,
            react,
            verifier: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Enable the outer verification loop (single-task runs only).
    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>, max_iterations: u32) -> Self {
        self.verifier = Some((verifier, max_iterations));
        self
    }

    /// Share an externally created cancellation token (so the provider
    /// retry stack and the controller observe the same trip).
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The task-scoped cancellation token. A keyboard interrupt trips
    /// this; every loop, tool, and sub-agent observes it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Trip cancellation for the current task.
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.cancel.cancel();
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    /// Run one task to completion.
    ///
    /// `verify` selects the outer verification loop when one is
    /// configured; interactive turns pass `false`.
    pub async fn run_task(&self, task: &str, verify: bool) -> Result<String, FatalError> {
        if !self.memory.has_system_messages().await {
            self.memory
                .add_message(Message::system(SYSTEM_PROMPT), None)
                .await;
        }
        self.memory.add_message(Message::user(task), None).await;

        let outcome = match (&self.verifier, verify) {
            (Some((verifier, max)), true) => {
                let outer = VerifierLoop::new(self.react.clone(), verifier.clone(), *max);
                outer.run(task, &self.memory, self.cancel.clone()).await
            }
            _ => self.react.run(&self.memory, self.cancel.clone()).await,
        };

        match outcome {
            Ok(result) => {
                self.persist().await;
                Ok(result)
            }
            Err(fatal) => {
                // Interrupt-safety: no partial exchange survives an unwind.
                self.memory.rollback_incomplete_exchange().await;
                self.persist().await;
                Err(fatal)
            }
        }
    }

    async fn persist(&self) {
        if let Err(e) = self.memory.save().await {
            warn!(error = %e, "Session save failed, continuing");
        }
    }
}
