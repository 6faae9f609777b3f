//! Short-term memory: the sliding window of verbatim recent turns.

use ironloop_core::Message;
use std::collections::VecDeque;

/// A bounded, ordered window of recent messages.
///
/// The buffer itself never evicts — the memory manager compresses the
/// prefix away before capacity pressure can drop a message, and
/// [`ShortTermBuffer::drain_prefix`] refuses to go below the `min_size`
/// floor.
pub struct ShortTermBuffer {
    messages: VecDeque<Message>,
    max_size: usize,
    min_size: usize,
}

impl ShortTermBuffer {
    pub fn new(max_size: usize, min_size: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(max_size),
            max_size,
            min_size: min_size.min(max_size),
        }
    }

    /// Append a message at the end of the window.
    pub fn append(&mut self, message: Message) {
        self.messages.push_back(message);
    }

    /// Remove and return up to `n` messages from the front, never leaving
    /// fewer than `min_size` behind.
    pub fn drain_prefix(&mut self, n: usize) -> Vec<Message> {
        let drainable = self.messages.len().saturating_sub(self.min_size);
        let take = n.min(drainable);
        self.messages.drain(..take).collect()
    }

    /// Re-insert messages at the front, oldest first. Used to restore the
    /// originals when a compression pass fails.
    pub fn restore_prefix(&mut self, messages: Vec<Message>) {
        for msg in messages.into_iter().rev() {
            self.messages.push_front(msg);
        }
    }

    /// All messages, oldest to newest.
    pub fn all(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    /// Borrowing iterator, oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Current message count.
    pub fn count(&self) -> usize {
        self.messages.len()
    }

    /// Whether the window is at or over capacity.
    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.max_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// Remove and return the most recent `n` messages, newest last.
    pub fn remove_last(&mut self, n: usize) -> Vec<Message> {
        let take = n.min(self.messages.len());
        let at = self.messages.len() - take;
        self.messages.drain(at..).collect()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
