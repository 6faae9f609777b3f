//! LLM-driven compression of old conversation turns.
//!
//! The compressor folds a prefix of old messages (and the previous
//! summary, when one exists) into a single new [`CompressedSummary`].
//! The summarization call uses no tools, a short system prompt, and a
//! bounded output cap. When the call fails or returns nothing, the
//! caller keeps the originals.

use chrono::Utc;
use ironloop_core::{Message, MemoryError, Provider, ProviderRequest, Role};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::counter::TokenCounter;
use crate::types::CompressedSummary;

/// How old messages are folded away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStrategy {
    /// Summarize everything in the compressed range (default).
    SlidingWindow,
    /// Keep important messages verbatim inside the summary — tool
    /// exchanges, errors, explicit user directives — and summarize the
    /// rest.
    Selective,
    /// Drop the range without summarizing. Zero LLM cost.
    Deletion,
}

const COMPRESSION_SYSTEM_PROMPT: &str = "You are a memory compression system. \
You summarize conversation history for an AI agent so it can keep working \
with a smaller context.";

const COMPRESSION_PROMPT: &str = "Summarize the following conversation messages while preserving:
1. Key decisions and outcomes
2. Important facts, data, and findings
3. Tool usage patterns and results that may still matter
4. User intent, goals, and open sub-goals
5. Critical context needed for future interactions

{messages}

Provide a concise but comprehensive summary. Be specific and include \
concrete details. Target length: about {target_tokens} tokens.";

/// Compresses conversation history via the provider.
pub struct Compressor {
    provider: Arc<dyn Provider>,
    model: String,
}

impl Compressor {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// The model used for summarization calls.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Fold `old_messages` (plus the prior summary, when present) into a
    /// new summary.
    ///
    /// On LLM failure or empty output this returns
    /// [`MemoryError::CompressionFailed`] and the caller keeps the
    /// originals.
    pub async fn compress(
        &self,
        old_messages: &[Message],
        prior_summary: Option<&CompressedSummary>,
        strategy: CompressionStrategy,
        target_tokens: usize,
        counter: &TokenCounter,
    ) -> Result<CompressedSummary, MemoryError> {
        if old_messages.is_empty() {
            return Err(MemoryError::CompressionFailed(
                "no messages to compress".into(),
            ));
        }

        let original_tokens = counter.count_all(old_messages)
            + prior_summary.map_or(0, |s| s.compressed_tokens);

        let summary_text = match strategy {
            CompressionStrategy::SlidingWindow => {
                self.summarize(old_messages, prior_summary, target_tokens)
                    .await?
            }
            CompressionStrategy::Selective => {
                self.compress_selective(old_messages, prior_summary, target_tokens)
                    .await?
            }
            CompressionStrategy::Deletion => String::new(),
        };

        let compressed_tokens = if summary_text.is_empty() {
            0
        } else {
            counter.count(&Message::assistant(summary_text.clone()))
        };

        let summary = CompressedSummary {
            summary_text,
            original_message_count: old_messages.len()
                + prior_summary.map_or(0, |s| s.original_message_count),
            original_tokens,
            compressed_tokens,
            strategy,
            created_at: Utc::now(),
        };

        info!(
            strategy = ?strategy,
            messages = old_messages.len(),
            original_tokens,
            compressed_tokens,
            "Compression complete"
        );

        Ok(summary)
    }

    /// Auto-select a strategy based on message characteristics.
    pub fn select_strategy(messages: &[Message]) -> CompressionStrategy {
        let has_tool_exchange = messages
            .iter()
            .any(|m| m.has_tool_calls() || m.role == Role::Tool);

        if has_tool_exchange {
            CompressionStrategy::Selective
        } else if messages.len() < 5 {
            CompressionStrategy::Deletion
        } else {
            CompressionStrategy::SlidingWindow
        }
    }

    async fn summarize(
        &self,
        messages: &[Message],
        prior_summary: Option<&CompressedSummary>,
        target_tokens: usize,
    ) -> Result<String, MemoryError> {
        let formatted = format_for_summary(messages, prior_summary);
        let prompt = COMPRESSION_PROMPT
            .replace("{messages}", &formatted)
            .replace("{target_tokens}", &target_tokens.to_string());

        let request = ProviderRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(COMPRESSION_SYSTEM_PROMPT),
                Message::user(prompt),
            ],
            max_tokens: Some((target_tokens * 2).max(256) as u32),
            tools: Vec::new(),
            reasoning_effort: None,
        };

        let response = self.provider.complete(request).await.map_err(|e| {
            warn!(error = %e, "Compression LLM call failed");
            MemoryError::CompressionFailed(e.to_string())
        })?;

        let text = response.message.text().trim().to_string();
        if text.is_empty() {
            return Err(MemoryError::CompressionFailed(
                "summarizer returned empty output".into(),
            ));
        }
        Ok(text)
    }

    async fn compress_selective(
        &self,
        messages: &[Message],
        prior_summary: Option<&CompressedSummary>,
        target_tokens: usize,
    ) -> Result<String, MemoryError> {
        let (preserved, to_summarize) = partition_important(messages);
        debug!(
            preserved = preserved.len(),
            summarized = to_summarize.len(),
            "Selective compression partition"
        );

        let mut parts = Vec::new();

        if !to_summarize.is_empty() {
            parts.push(
                self.summarize(&to_summarize, prior_summary, target_tokens)
                    .await?,
            );
        } else if let Some(prior) = prior_summary {
            parts.push(prior.summary_text.clone());
        }

        if !preserved.is_empty() {
            let rendered: Vec<String> = preserved
                .iter()
                .map(|m| render_message_line(m))
                .collect();
            parts.push(format!("Preserved context:\n{}", rendered.join("\n")));
        }

        Ok(parts.join("\n\n"))
    }
}

/// Messages worth keeping verbatim under the selective strategy.
fn partition_important(messages: &[Message]) -> (Vec<Message>, Vec<Message>) {
    let mut preserved = Vec::new();
    let mut rest = Vec::new();
    for msg in messages {
        let important = msg.has_tool_calls()
            || msg.role == Role::Tool
            || msg.role == Role::User
            || msg.text().starts_with("Error:");
        if important {
            preserved.push(msg.clone());
        } else {
            rest.push(msg.clone());
        }
    }
    (preserved, rest)
}

/// Align a desired compression split point so no tool-call/tool-result
/// pair is cut in half.
///
/// `messages[..split]` is the range to compress. If the boundary lands on
/// tool turns whose assistant partner sits in the prefix, the split moves
/// backwards until the whole exchange stays on the kept side (both or
/// neither, never one of each).
pub fn aligned_split_point(messages: &[Message], desired: usize) -> usize {
    let mut split = desired.min(messages.len());

    // The kept side must not start with tool results answering a call
    // from the compressed side. Stepping back past every leading tool
    // turn also pulls the assistant turn that issued the calls onto the
    // kept side, so the exchange stays whole.
    while split > 0 && messages.get(split).map(|m| m.role) == Some(Role::Tool) {
        split -= 1;
    }

    split
}

fn format_for_summary(messages: &[Message], prior_summary: Option<&CompressedSummary>) -> String {
    let mut out = String::new();

    if let Some(prior) = prior_summary {
        out.push_str(&format!(
            "Summary of even earlier conversation ({} messages):\n{}\n\n",
            prior.original_message_count, prior.summary_text
        ));
    }

    out.push_str(&format!(
        "Messages to compress ({} messages):\n\n",
        messages.len()
    ));
    for (i, msg) in messages.iter().enumerate() {
        out.push_str(&format!(
            "[{}] {}\n\n",
            i + 1,
            render_message_line(msg)
        ));
    }
    out
}

fn render_message_line(msg: &Message) -> String {
    let role = msg.role.to_string().to_uppercase();
    let mut line = format!("{role}: {}", msg.text());
    for tc in &msg.tool_calls {
        line.push_str(&format!(" [tool call: {}({})]", tc.name, tc.arguments));
    }
    if let Some(name) = &msg.tool_name {
        line.push_str(&format!(" [result of {name}]"));
    }
    line
}
