//! The memory manager — single entry point for conversation state.
//!
//! Orchestrates the short-term buffer, the compressor, the token
//! accountant, and the session store. All mutation happens behind one
//! async write-lock so concurrent sub-agents publishing to the same
//! session never interleave a partial update.

use std::sync::Arc;

use ironloop_core::{MemoryError, Message, Provider, Role, ToolDefinition, Usage};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::compressor::{aligned_split_point, Compressor};
use crate::counter::TokenCounter;
use crate::short_term::ShortTermBuffer;
use crate::store::SessionStore;
use crate::tracker::UsageTracker;
use crate::types::{Session, SessionStats};

/// Memory tuning knobs, mapped from the runtime settings.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Whether automatic compression runs at all
    pub enabled: bool,
    /// Stored-token level that arms compression
    pub compression_threshold: usize,
    /// Buffer capacity in messages
    pub short_term_size: usize,
    /// Recent messages preserved verbatim through a compression pass
    pub short_term_min_size: usize,
    /// Target compressed-size ratio
    pub compression_ratio: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            compression_threshold: 60_000,
            short_term_size: 100,
            short_term_min_size: 6,
            compression_ratio: 0.3,
        }
    }
}

/// A snapshot of memory statistics for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryStats {
    pub current_tokens: usize,
    pub message_count: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub compression_count: u32,
    pub compression_savings: u64,
}

struct Inner {
    session: Session,
    buffer: ShortTermBuffer,
    tracker: UsageTracker,
    /// Estimated tokens of everything that would be emitted as context
    current_tokens: usize,
    /// Overhead of the currently registered tool schemas
    tool_schema_tokens: usize,
}

/// Central memory manager with built-in persistence.
pub struct MemoryManager {
    inner: Mutex<Inner>,
    store: SessionStore,
    compressor: Compressor,
    counter: TokenCounter,
    config: MemoryConfig,
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager").finish_non_exhaustive()
    }
}

impl MemoryManager {
    /// Create a manager for a fresh session.
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        store: SessionStore,
        config: MemoryConfig,
    ) -> Self {
        let buffer = ShortTermBuffer::new(config.short_term_size, config.short_term_min_size);
        Self {
            inner: Mutex::new(Inner {
                session: Session::new(),
                buffer,
                tracker: UsageTracker::new(),
                current_tokens: 0,
                tool_schema_tokens: 0,
            }),
            store,
            compressor: Compressor::new(provider, model),
            counter: TokenCounter::new(),
            config,
        }
    }

    /// Restore a manager from a saved session, resolved by UUID prefix
    /// (or the literal `latest`).
    pub async fn from_session(
        reference: &str,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        store: SessionStore,
        config: MemoryConfig,
    ) -> Result<Self, MemoryError> {
        let id = if reference == "latest" {
            store
                .find_latest()
                .await?
                .ok_or_else(|| MemoryError::SessionNotFound("latest".into()))?
        } else {
            store.find_by_prefix(reference).await?
        };
        let session = store.load(id).await?;

        let manager = Self::new(provider, model, store, config);
        {
            let mut inner = manager.inner.lock().await;
            let mut buffer = ShortTermBuffer::new(
                manager.config.short_term_size,
                manager.config.short_term_min_size,
            );
            for msg in &session.messages {
                buffer.append(msg.clone());
            }
            inner.tracker.restore(
                session.stats.total_input_tokens,
                session.stats.total_output_tokens,
                session.stats.total_cost_usd,
            );
            inner.buffer = buffer;
            inner.session = session;
            inner.current_tokens = manager.recalculate(&*inner);
        }

        info!(session_id = %id, "Session restored");
        Ok(manager)
    }

    /// The session UUID this manager publishes to.
    pub async fn session_id(&self) -> Uuid {
        self.inner.lock().await.session.id
    }

    /// Append a message and trigger compression when thresholds trip.
    ///
    /// `actual_usage` carries the provider-reported token usage for
    /// assistant turns; user and tool turns are counted on the next
    /// request.
    pub async fn add_message(&self, message: Message, actual_usage: Option<Usage>) {
        let mut inner = self.inner.lock().await;

        if let Some(usage) = actual_usage {
            let model = self.compressor_model();
            inner
                .tracker
                .record(usage.input_tokens, usage.output_tokens, &model);
        }

        if message.role == Role::System {
            inner.session.system_messages.push(message);
            inner.current_tokens = self.recalculate(&*inner);
            return;
        }

        let mut message = message;
        message.token_count = Some(self.counter.count(&message));
        inner.buffer.append(message);
        inner.current_tokens = self.recalculate(&*inner);

        debug!(
            stored_tokens = inner.current_tokens,
            messages = inner.buffer.count(),
            "Memory state after append"
        );

        if self.should_compress(&*inner) {
            if let Err(e) = self.compress_locked(&mut *inner).await {
                warn!(error = %e, "Compression failed, keeping original messages");
            }
        }
    }

    /// Whether the last `add_message` call left compression armed.
    fn should_compress(&self, inner: &Inner) -> bool {
        self.config.enabled
            && inner.current_tokens > self.config.compression_threshold
            && inner.buffer.count() > self.config.short_term_size
    }

    /// Ordered context for the next LLM request:
    /// `[system..., summary-as-assistant?, buffered messages...]`.
    ///
    /// The emitted sequence always ends at an assistant turn without
    /// pending tool calls or at a complete tool exchange — a trailing
    /// partial exchange (left by an interrupted run that has not yet
    /// been rolled back) is excluded defensively.
    pub async fn get_context_for_llm(&self) -> Vec<Message> {
        let inner = self.inner.lock().await;

        let mut context = inner.session.system_messages.clone();
        if let Some(summary) = &inner.session.summary {
            if !summary.summary_text.is_empty() {
                context.push(summary.as_context_message());
            }
        }

        let mut buffered = inner.buffer.all();
        truncate_to_well_formed(&mut buffered);
        context.extend(buffered);
        context
    }

    /// Record the active tool schemas so their overhead counts toward
    /// the compression threshold.
    pub async fn set_tool_schemas(&self, schemas: &[ToolDefinition]) {
        let overhead = self.counter.count_tool_schemas(schemas);
        let mut inner = self.inner.lock().await;
        inner.tool_schema_tokens = overhead;
        inner.current_tokens = self.recalculate(&*inner);
    }

    /// Persist a snapshot through the session store. Idempotent;
    /// persistence failures are non-fatal for in-memory operation.
    pub async fn save(&self) -> Result<(), MemoryError> {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            if inner.buffer.count() == 0 && inner.session.system_messages.is_empty() {
                debug!("Skipping save: nothing to persist");
                return Ok(());
            }
            inner.session.messages = inner.buffer.all();
            inner.session.updated_at = chrono::Utc::now();
            inner.session.stats = SessionStats {
                total_input_tokens: inner.tracker.total_input_tokens(),
                total_output_tokens: inner.tracker.total_output_tokens(),
                total_cost_usd: inner.tracker.total_cost_usd(),
                compression_count: inner.session.stats.compression_count,
            };
            inner.session.clone()
        };

        match self.store.save(&snapshot).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Session persistence failed, continuing in memory");
                Err(e)
            }
        }
    }

    /// Current memory statistics.
    pub async fn stats(&self) -> MemoryStats {
        let inner = self.inner.lock().await;
        MemoryStats {
            current_tokens: inner.current_tokens,
            message_count: inner.buffer.count(),
            total_input_tokens: inner.tracker.total_input_tokens(),
            total_output_tokens: inner.tracker.total_output_tokens(),
            total_cost_usd: inner.tracker.total_cost_usd(),
            compression_count: inner.session.stats.compression_count,
            compression_savings: inner.tracker.compression_savings(),
        }
    }

    /// Force a compression pass regardless of thresholds (`/compact`).
    pub async fn force_compress(&self) -> Result<(), MemoryError> {
        let mut inner = self.inner.lock().await;
        self.compress_locked(&mut *inner).await
    }

    /// Remove a trailing assistant turn whose tool calls are not fully
    /// answered, plus any partial tool turns for it. Called after an
    /// interrupted run so the next context is well-formed.
    pub async fn rollback_incomplete_exchange(&self) {
        let mut inner = self.inner.lock().await;
        let messages = inner.buffer.all();
        let well_formed_len = well_formed_length(&messages);
        let excess = messages.len() - well_formed_len;
        if excess > 0 {
            let removed = inner.buffer.remove_last(excess);
            info!(
                removed = removed.len(),
                "Rolled back incomplete tool exchange"
            );
            inner.current_tokens = self.recalculate(&*inner);
        }
    }

    /// Drop all conversational state, keeping the session identity
    /// (`/clear`).
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.buffer.clear();
        inner.session.messages.clear();
        inner.session.summary = None;
        inner.current_tokens = self.recalculate(&*inner);
    }

    /// Whether there are any system messages yet (first-turn detection).
    pub async fn has_system_messages(&self) -> bool {
        !self.inner.lock().await.session.system_messages.is_empty()
    }

    // ── Internals ─────────────────────────────────────────────────────

    async fn compress_locked(&self, inner: &mut Inner) -> Result<(), MemoryError> {
        let keep = self
            .config
            .short_term_min_size
            .min(self.config.short_term_size);
        let messages = inner.buffer.all();
        let desired = messages.len().saturating_sub(keep);
        let split = aligned_split_point(&messages, desired);
        if split == 0 {
            return Err(MemoryError::CompressionFailed(
                "nothing to compress after pair alignment".into(),
            ));
        }

        let old = inner.buffer.drain_prefix(split);
        let strategy = Compressor::select_strategy(&old);
        let target = ((inner.current_tokens as f64 * self.config.compression_ratio) as usize)
            .max(500);

        info!(
            strategy = ?strategy,
            compressing = old.len(),
            keeping = inner.buffer.count(),
            "Triggering compression"
        );

        let prior = inner.session.summary.clone();
        match self
            .compressor
            .compress(&old, prior.as_ref(), strategy, target, &self.counter)
            .await
        {
            Ok(summary) => {
                inner
                    .tracker
                    .add_compression_savings(summary.token_savings() as u64);
                inner
                    .tracker
                    .add_compression_cost(summary.compressed_tokens as u64);
                inner.session.summary = Some(summary);
                inner.session.stats.compression_count += 1;
                inner.current_tokens = self.recalculate(inner);
                Ok(())
            }
            Err(e) => {
                inner.buffer.restore_prefix(old);
                inner.current_tokens = self.recalculate(inner);
                Err(e)
            }
        }
    }

    fn recalculate(&self, inner: &Inner) -> usize {
        let mut total = inner.tool_schema_tokens;
        for msg in &inner.session.system_messages {
            total += self.counter.count(msg);
        }
        if let Some(summary) = &inner.session.summary {
            if !summary.summary_text.is_empty() {
                total += self.counter.count(&summary.as_context_message());
            }
        }
        for msg in inner.buffer.iter() {
            total += self.counter.count(msg);
        }
        total
    }

    fn compressor_model(&self) -> String {
        self.compressor.model().to_string()
    }
}

/// Length of the longest well-formed prefix: every assistant turn with N
/// tool calls is followed by exactly its N tool results before anything
/// else.
fn well_formed_length(messages: &[Message]) -> usize {
    let mut i = 0;
    let mut good = 0;
    while i < messages.len() {
        let msg = &messages[i];
        if msg.has_tool_calls() {
            let expected: Vec<&str> = msg.tool_calls.iter().map(|tc| tc.id.as_str()).collect();
            let mut j = i + 1;
            let mut answered = 0;
            while j < messages.len()
                && messages[j].role == Role::Tool
                && answered < expected.len()
                && messages[j].tool_call_id.as_deref() == Some(expected[answered])
            {
                answered += 1;
                j += 1;
            }
            if answered < expected.len() {
                // Partial exchange; everything before this assistant turn
                // is the well-formed prefix.
                return good;
            }
            i = j;
        } else {
            i += 1;
        }
        good = i;
    }
    good
}

/// Drop a trailing partial exchange without mutating stored state.
fn truncate_to_well_formed(messages: &mut Vec<Message>) {
    let len = well_formed_length(messages);
    messages.truncate(len);
}
