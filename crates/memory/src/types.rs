//! Persisted memory value objects: sessions, summaries, and stats.

use chrono::{DateTime, Utc};
use ironloop_core::Message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::compressor::CompressionStrategy;

/// A single synthetic summary produced by the compressor.
///
/// A session holds at most one active summary; each new compression
/// rewrites it, folding the previous summary in as input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedSummary {
    /// The LLM-written summary text
    pub summary_text: String,

    /// How many messages were folded into this summary (cumulative)
    pub original_message_count: usize,

    /// Token estimate of the folded messages
    pub original_tokens: usize,

    /// Token estimate of the summary itself
    pub compressed_tokens: usize,

    /// Which strategy produced it
    pub strategy: CompressionStrategy,

    /// When it was produced
    pub created_at: DateTime<Utc>,
}

impl CompressedSummary {
    /// Tokens saved relative to the originals.
    pub fn token_savings(&self) -> usize {
        self.original_tokens.saturating_sub(self.compressed_tokens)
    }

    /// Render the summary as an assistant context message.
    pub fn as_context_message(&self) -> Message {
        Message::assistant(format!(
            "[Conversation summary — {} earlier messages compressed]\n{}",
            self.original_message_count, self.summary_text
        ))
    }
}

/// Denormalized per-session counters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub compression_count: u32,
}

/// The persisted state of a run.
///
/// Serialized to `session.yaml` inside a `YYYY-MM-DD_<uuid[:8]>/`
/// directory. Field order matches the on-disk layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Optional human metadata (description, tags)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,

    #[serde(default)]
    pub system_messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<CompressedSummary>,

    #[serde(default)]
    pub messages: Vec<Message>,

    #[serde(default)]
    pub stats: SessionStats,
}

impl Session {
    /// Create a new empty session with a fresh UUID.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            metadata: BTreeMap::new(),
            system_messages: Vec::new(),
            summary: None,
            messages: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    /// Directory name this session lives in: `YYYY-MM-DD_<uuid[:8]>`.
    pub fn dir_name(&self) -> String {
        let date = self.created_at.format("%Y-%m-%d");
        let short: String = self.id.simple().to_string().chars().take(8).collect();
        format!("{date}_{short}")
    }

    /// First user message, truncated, for listings.
    pub fn preview(&self) -> String {
        self.messages
            .iter()
            .find(|m| m.role == ironloop_core::Role::User)
            .map(|m| m.text().chars().take(100).collect())
            .unwrap_or_default()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_name_format() {
        let session = Session::new();
        let name = session.dir_name();
        // e.g. "2025-01-31_a1b2c3d4"
        assert_eq!(name.len(), 10 + 1 + 8);
        assert_eq!(&name[4..5], "-");
        assert_eq!(&name[10..11], "_");
    }

    #[test]
    fn preview_takes_first_user_message() {
        let mut session = Session::new();
        session.messages.push(Message::assistant("greeting"));
        session.messages.push(Message::user("find the bug in parser.rs"));
        session.messages.push(Message::user("second question"));
        assert_eq!(session.preview(), "find the bug in parser.rs");
    }

    #[test]
    fn summary_savings() {
        let summary = CompressedSummary {
            summary_text: "did things".into(),
            original_message_count: 10,
            original_tokens: 4000,
            compressed_tokens: 900,
            strategy: CompressionStrategy::SlidingWindow,
            created_at: Utc::now(),
        };
        assert_eq!(summary.token_savings(), 3100);
        let msg = summary.as_context_message();
        assert!(msg.text().contains("10 earlier messages"));
        assert!(msg.text().contains("did things"));
    }

    #[test]
    fn session_yaml_roundtrip() {
        let mut session = Session::new();
        session.system_messages.push(Message::system("rules"));
        session.messages.push(Message::user("task"));
        session.messages.push(Message::assistant("done"));
        session.stats.total_input_tokens = 120;

        let yaml = serde_yaml::to_string(&session).unwrap();
        let back: Session = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, session);
    }
}
