//! The outer verification loop.
//!
//! After the inner loop produces an answer, a pluggable [`Verifier`]
//! judges whether the original task is actually satisfied. On an
//! incomplete verdict the reason is injected into memory as a synthetic
//! user message and the inner loop re-enters with that corrective
//! feedback. The loop is bounded; the final iteration returns its result
//! unconditionally, without consulting the verifier.

use std::sync::Arc;

use async_trait::async_trait;
use ironloop_core::{FatalError, Message, Provider, ProviderError, ProviderRequest};
use ironloop_memory::MemoryManager;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::react::ReactLoop;

/// A verification verdict.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub complete: bool,
    pub reason: String,
}

/// Judges whether a result satisfies a task.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        task: &str,
        result: &str,
        iteration: u32,
        previous: &[Verdict],
    ) -> Result<Verdict, ProviderError>;
}

const VERIFIER_SYSTEM_PROMPT: &str = "You are a task-completion verifier.";

const VERIFIER_PROMPT: &str = "You are a strict verification assistant. Determine whether an \
AI agent's answer fully and correctly completes the user's original task.

<task>
{task}
</task>

<agent_answer>
{result}
</agent_answer>

{previous_context}
Judge strictly, but do not redo the work yourself. If the task is a \
one-time request, judge whether the answer is correct and complete. If \
the task requires multiple steps and only some were done, respond \
INCOMPLETE with specific feedback on what remains.

Respond with EXACTLY one of:
- COMPLETE: <brief reason why the task is satisfied>
- INCOMPLETE: <specific feedback on what is missing or wrong>

Do NOT restate the answer. Only judge it.";

/// Default verifier — a lightweight LLM call with no tools and a small
/// output cap.
pub struct LlmVerifier {
    provider: Arc<dyn Provider>,
    model: String,
}

impl LlmVerifier {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Verifier for LlmVerifier {
    async fn verify(
        &self,
        task: &str,
        result: &str,
        iteration: u32,
        previous: &[Verdict],
    ) -> Result<Verdict, ProviderError> {
        let previous_context = if previous.is_empty() {
            String::new()
        } else {
            let lines: Vec<String> = previous
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let status = if v.complete { "complete" } else { "incomplete" };
                    format!("  Attempt {}: {} ({})", i + 1, status, v.reason)
                })
                .collect();
            format!("Previous verification attempts:\n{}\n\n", lines.join("\n"))
        };

        // Truncate the result to keep verification cheap
        let result_excerpt: String = result.chars().take(4000).collect();

        let prompt = VERIFIER_PROMPT
            .replace("{task}", task)
            .replace("{result}", &result_excerpt)
            .replace("{previous_context}", &previous_context);

        let request = ProviderRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(VERIFIER_SYSTEM_PROMPT),
                Message::user(prompt),
            ],
            max_tokens: Some(512),
            tools: Vec::new(),
            reasoning_effort: None,
        };

        let response = self.provider.complete(request).await?;
        let text = response.message.text().trim().to_string();
        debug!(iteration, verdict = %text, "Verification response");

        let complete = text.to_uppercase().starts_with("COMPLETE");
        let reason = text
            .split_once(':')
            .map(|(_, r)| r.trim().to_string())
            .unwrap_or(text);

        Ok(Verdict { complete, reason })
    }
}

/// The bounded outer loop wrapping the inner ReAct loop.
pub struct VerifierLoop {
    react: ReactLoop,
    verifier: Arc<dyn Verifier>,
    max_iterations: u32,
}

impl VerifierLoop {
    pub fn new(react: ReactLoop, verifier: Arc<dyn Verifier>, max_iterations: u32) -> Self {
        Self {
            react,
            verifier,
            max_iterations: max_iterations.max(1),
        }
    }

    /// Run the inner loop to completion, re-entering with feedback while
    /// the verifier reports the task incomplete.
    pub async fn run(
        &self,
        task: &str,
        memory: &MemoryManager,
        cancel: CancellationToken,
    ) -> Result<String, FatalError> {
        let mut previous: Vec<Verdict> = Vec::new();

        for iteration in 1..=self.max_iterations {
            let result = self.react.run(memory, cancel.clone()).await?;

            // The last iteration returns unconditionally.
            if iteration == self.max_iterations {
                return Ok(result);
            }

            let verdict = match self
                .verifier
                .verify(task, &result, iteration, &previous)
                .await
            {
                Ok(verdict) => verdict,
                Err(e) => {
                    // A broken verifier must not sink a finished task.
                    warn!(error = %e, "Verifier failed, accepting result as-is");
                    return Ok(result);
                }
            };

            if verdict.complete {
                info!(iteration, "Verification passed");
                return Ok(result);
            }

            info!(iteration, reason = %verdict.reason, "Verification incomplete, re-entering loop");
            memory
                .add_message(
                    Message::user(format!(
                        "The previous answer did not fully complete the task. \
                         Verifier feedback: {}. Address this and finish the task.",
                        verdict.reason
                    )),
                    None,
                )
                .await;
            previous.push(verdict);
        }

        unreachable!("loop returns on the final iteration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ToolExecutor;
    use crate::test_helpers::*;
    use ironloop_core::ToolRegistry;
    use ironloop_memory::{MemoryConfig, MemoryManager, SessionStore};
    use std::sync::Mutex;
    use std::time::Duration;

    struct StubVerifier {
        verdicts: Mutex<Vec<Verdict>>,
        calls: Mutex<u32>,
    }

    impl StubVerifier {
        fn new(verdicts: Vec<Verdict>) -> Arc<Self> {
            Arc::new(Self {
                verdicts: Mutex::new(verdicts),
                calls: Mutex::new(0),
            })
        }

        fn call_count(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Verifier for StubVerifier {
        async fn verify(
            &self,
            _task: &str,
            _result: &str,
            _iteration: u32,
            _previous: &[Verdict],
        ) -> Result<Verdict, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.verdicts.lock().unwrap().remove(0))
        }
    }

    fn react_with(provider: Arc<SequentialMockProvider>) -> ReactLoop {
        let executor = Arc::new(ToolExecutor::new(
            Arc::new(ToolRegistry::new()),
            Duration::from_secs(10),
        ));
        ReactLoop::new(provider, "mock", executor)
    }

    fn memory(provider: Arc<dyn Provider>) -> (tempfile::TempDir, MemoryManager) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"));
        let manager = MemoryManager::new(provider, "mock", store, MemoryConfig::default());
        (dir, manager)
    }

    #[tokio::test]
    async fn passes_on_first_attempt() {
        let provider = SequentialMockProvider::single_text("The answer is 42.");
        let (_dir, mem) = memory(provider.clone());
        mem.add_message(Message::user("What is the answer?"), None)
            .await;

        let verifier = StubVerifier::new(vec![Verdict {
            complete: true,
            reason: "Correct".into(),
        }]);
        let outer = VerifierLoop::new(react_with(provider), verifier.clone(), 3);

        let result = outer
            .run("What is the answer?", &mem, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, "The answer is 42.");
        assert_eq!(verifier.call_count(), 1);
    }

    #[tokio::test]
    async fn retries_then_passes() {
        let provider = SequentialMockProvider::new(vec![
            text_response("Incomplete answer"),
            text_response("Complete answer with details"),
        ]);
        let (_dir, mem) = memory(provider.clone());
        mem.add_message(Message::user("Explain X"), None).await;

        let verifier = StubVerifier::new(vec![
            Verdict {
                complete: false,
                reason: "Missing details".into(),
            },
            Verdict {
                complete: true,
                reason: "Now complete".into(),
            },
        ]);
        let outer = VerifierLoop::new(react_with(provider), verifier.clone(), 3);

        let result = outer
            .run("Explain X", &mem, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, "Complete answer with details");
        assert_eq!(verifier.call_count(), 2);

        // Feedback landed in memory as a user message
        let context = mem.get_context_for_llm().await;
        assert!(context
            .iter()
            .any(|m| m.role == ironloop_core::Role::User
                && m.text().contains("Missing details")));
    }

    #[tokio::test]
    async fn last_iteration_skips_verification() {
        let provider = SequentialMockProvider::new(vec![
            text_response("first"),
            text_response("second"),
            text_response("third"),
        ]);
        let (_dir, mem) = memory(provider.clone());
        mem.add_message(Message::user("Do something"), None).await;

        // Always incomplete; the third iteration must skip the verifier
        let verifier = StubVerifier::new(vec![
            Verdict {
                complete: false,
                reason: "nope".into(),
            },
            Verdict {
                complete: false,
                reason: "still nope".into(),
            },
            Verdict {
                complete: false,
                reason: "unreachable".into(),
            },
        ]);
        let outer = VerifierLoop::new(react_with(provider), verifier.clone(), 3);

        let result = outer
            .run("Do something", &mem, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, "third");
        assert_eq!(verifier.call_count(), 2);
    }

    #[tokio::test]
    async fn broken_verifier_accepts_result() {
        struct BrokenVerifier;

        #[async_trait]
        impl Verifier for BrokenVerifier {
            async fn verify(
                &self,
                _task: &str,
                _result: &str,
                _iteration: u32,
                _previous: &[Verdict],
            ) -> Result<Verdict, ProviderError> {
                Err(ProviderError::Network("verifier down".into()))
            }
        }

        let provider = SequentialMockProvider::single_text("answer");
        let (_dir, mem) = memory(provider.clone());
        mem.add_message(Message::user("task"), None).await;

        let outer = VerifierLoop::new(react_with(provider), Arc::new(BrokenVerifier), 3);
        let result = outer
            .run("task", &mem, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, "answer");
    }

    #[tokio::test]
    async fn llm_verifier_parses_complete() {
        let provider =
            SequentialMockProvider::single_text("COMPLETE: The answer correctly solves the task.");
        let verifier = LlmVerifier::new(provider, "mock");

        let verdict = verifier.verify("Calculate 1+1", "2", 1, &[]).await.unwrap();
        assert!(verdict.complete);
        assert!(verdict.reason.contains("correctly solves"));
    }

    #[tokio::test]
    async fn llm_verifier_parses_incomplete() {
        let provider =
            SequentialMockProvider::single_text("INCOMPLETE: The answer does not show the work.");
        let verifier = LlmVerifier::new(provider, "mock");

        let verdict = verifier
            .verify("Show your work for 1+1", "2", 1, &[])
            .await
            .unwrap();
        assert!(!verdict.complete);
        assert!(verdict.reason.contains("does not show"));
    }
}
