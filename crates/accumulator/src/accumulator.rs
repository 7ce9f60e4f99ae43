//! Bounded per-chat FIFO buffers of pending text fragments.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use {
    catmandu_common::types::ChatId, catmandu_config::AccumulatorConfig, tracing::debug,
};

type Buffer = Arc<Mutex<VecDeque<String>>>;

/// In-memory accumulator keyed by chat.
///
/// The outer map lock is only held long enough to look up or insert a
/// chat's buffer; all reads and writes of the messages themselves happen
/// under that chat's own mutex, so chats never contend with each other.
/// Empty buffers are dropped from the map by [`Accumulator::all_chat_ids`],
/// but only when no caller holds a handle to them, so an `add` that already
/// looked its buffer up never writes into a detached one.
pub struct Accumulator {
    buffers: RwLock<HashMap<ChatId, Buffer>>,
    max_messages: usize,
    max_message_length: usize,
}

impl Accumulator {
    pub fn new(max_messages: usize, max_message_length: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            max_messages,
            max_message_length,
        }
    }

    pub fn from_config(config: &AccumulatorConfig) -> Self {
        Self::new(config.max_messages, config.max_message_length)
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    /// Store `text` for `chat_id`.
    ///
    /// Whitespace-only input is ignored and returns `None`. Otherwise the text
    /// is truncated to `max_message_length` characters, appended, and the
    /// oldest messages are evicted while the buffer exceeds `max_messages`.
    /// Returns the number of messages held afterwards.
    ///
    /// With `max_messages == 0` the message is appended and immediately
    /// evicted, so nothing is ever retained. With `max_message_length == 0`
    /// the message is dropped before it reaches the buffer.
    pub fn add(&self, chat_id: ChatId, text: &str) -> Option<usize> {
        if text.trim().is_empty() {
            debug!(chat_id = %chat_id, "skipping empty message");
            return None;
        }
        if self.max_message_length == 0 {
            debug!(chat_id = %chat_id, "skipping message due to zero max length");
            return None;
        }

        let stored = truncate_chars(text, self.max_message_length);
        if stored.len() < text.len() {
            debug!(
                chat_id = %chat_id,
                max_length = self.max_message_length,
                "truncated message to max length"
            );
        }

        let buffer = self.buffer_or_insert(chat_id);
        let mut messages = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        messages.push_back(stored.to_string());

        let mut evicted = 0usize;
        while messages.len() > self.max_messages {
            messages.pop_front();
            evicted += 1;
        }

        debug!(
            chat_id = %chat_id,
            message_count = messages.len(),
            evicted,
            "message added to accumulator"
        );
        Some(messages.len())
    }

    /// Copy of the chat's messages in arrival order.
    pub fn get_all(&self, chat_id: ChatId) -> Vec<String> {
        self.existing(chat_id)
            .map(|buffer| {
                buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Return every message and empty the buffer under a single lock
    /// acquisition.
    pub fn take_all(&self, chat_id: ChatId) -> Vec<String> {
        let Some(buffer) = self.existing(chat_id) else {
            return Vec::new();
        };
        let taken: Vec<String> = buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        debug!(chat_id = %chat_id, message_count = taken.len(), "took all messages");
        taken
    }

    /// Empty the chat's buffer, returning how many messages were removed.
    pub fn clear(&self, chat_id: ChatId) -> usize {
        let Some(buffer) = self.existing(chat_id) else {
            return 0;
        };
        let mut messages = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = messages.len();
        messages.clear();
        debug!(chat_id = %chat_id, cleared_count = removed, "cleared chat messages");
        removed
    }

    pub fn count(&self, chat_id: ChatId) -> usize {
        self.existing(chat_id)
            .map(|buffer| buffer.lock().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0)
    }

    /// Number of chats currently holding at least one message.
    pub fn total_chats(&self) -> usize {
        self.all_chat_ids().len()
    }

    /// Chats currently holding at least one message, in ascending id order.
    ///
    /// Also forgets chats whose buffers are empty and unused.
    pub fn all_chat_ids(&self) -> Vec<ChatId> {
        let mut map = self.buffers.write().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        map.retain(|_, buffer| {
            Arc::strong_count(buffer) > 1
                || !buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_empty()
        });
        if map.len() < before {
            debug!(pruned = before - map.len(), "dropped empty chat buffers");
        }

        let mut ids: Vec<ChatId> = map
            .iter()
            .filter(|(_, b)| !b.lock().unwrap_or_else(PoisonError::into_inner).is_empty())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    #[cfg(test)]
    fn allocated_chats(&self) -> usize {
        self.buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn existing(&self, chat_id: ChatId) -> Option<Buffer> {
        self.buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&chat_id)
            .cloned()
    }

    fn buffer_or_insert(&self, chat_id: ChatId) -> Buffer {
        if let Some(buffer) = self.existing(chat_id) {
            return buffer;
        }
        let mut map = self.buffers.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(chat_id).or_default())
    }
}

/// Longest prefix of `text` holding at most `max` characters.
pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
