//! Token estimation with content-hash caching.
//!
//! Counts are estimates driving compression decisions and display only
//! (~5–15% error is fine); they never gate correctness and make no
//! network calls. The same message always yields the same count within a
//! process — results are cached by a hash over role, content, tool calls,
//! and tool linkage fields.

use ironloop_core::{Message, ToolDefinition};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

/// Structure overhead per message (role, framing) in characters.
const MESSAGE_OVERHEAD_CHARS: usize = 20;

/// Structure overhead per tool call block (id, name, framing).
const TOOL_CALL_OVERHEAD_CHARS: usize = 30;

/// Mixed prose and JSON average out near 3.5 characters per token.
const CHARS_PER_TOKEN: f64 = 3.5;

/// Deterministic, cached token estimator.
pub struct TokenCounter {
    message_cache: Mutex<HashMap<u64, usize>>,
    schema_cache: Mutex<HashMap<u64, usize>>,
}

impl TokenCounter {
    pub fn new() -> Self {
        Self {
            message_cache: Mutex::new(HashMap::new()),
            schema_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Estimate the token count of one message.
    pub fn count(&self, message: &Message) -> usize {
        let key = Self::cache_key(message);
        if let Some(cached) = self.message_cache.lock().unwrap().get(&key) {
            return *cached;
        }

        let mut chars = MESSAGE_OVERHEAD_CHARS + message.text().len();
        for tc in &message.tool_calls {
            chars += TOOL_CALL_OVERHEAD_CHARS + tc.name.len() + tc.arguments.len();
        }
        if let Some(id) = &message.tool_call_id {
            chars += id.len();
        }
        if let Some(name) = &message.tool_name {
            chars += name.len();
        }

        let count = estimate_from_chars(chars);
        self.message_cache.lock().unwrap().insert(key, count);
        count
    }

    /// Estimate the token count of a slice of messages.
    pub fn count_all(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count(m)).sum()
    }

    /// Estimate the overhead of attaching a tool-schema set to a request.
    ///
    /// Computed as the sizing difference between a probe message with the
    /// schemas attached and the bare probe, cached once per tool-set
    /// fingerprint.
    pub fn count_tool_schemas(&self, schemas: &[ToolDefinition]) -> usize {
        if schemas.is_empty() {
            return 0;
        }

        let serialized = serde_json::to_string(schemas).unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        serialized.hash(&mut hasher);
        let key = hasher.finish();

        if let Some(cached) = self.schema_cache.lock().unwrap().get(&key) {
            return *cached;
        }

        let probe = Message::user("probe");
        let bare = estimate_from_chars(MESSAGE_OVERHEAD_CHARS + probe.text().len());
        let with_tools =
            estimate_from_chars(MESSAGE_OVERHEAD_CHARS + probe.text().len() + serialized.len());
        let count = with_tools.saturating_sub(bare);

        self.schema_cache.lock().unwrap().insert(key, count);
        count
    }

    /// Clear all caches.
    pub fn reset(&self) {
        self.message_cache.lock().unwrap().clear();
        self.schema_cache.lock().unwrap().clear();
    }

    fn cache_key(message: &Message) -> u64 {
        let mut hasher = DefaultHasher::new();
        message.role.to_string().hash(&mut hasher);
        message.text().hash(&mut hasher);
        for tc in &message.tool_calls {
            tc.id.hash(&mut hasher);
            tc.name.hash(&mut hasher);
            tc.arguments.hash(&mut hasher);
        }
        message.tool_call_id.hash(&mut hasher);
        message.tool_name.hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

fn estimate_from_chars(chars: usize) -> usize {
    ((chars as f64 / CHARS_PER_TOKEN) as usize).max(1)
}
