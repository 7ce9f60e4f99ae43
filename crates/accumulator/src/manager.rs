//! User-facing policy on top of [`Accumulator`]: feedback, extraction and
//! rendering of the accumulated messages.

use std::sync::Arc;

use {catmandu_common::types::ChatId, catmandu_config::AccumulatorConfig, tracing::info};

use crate::accumulator::{Accumulator, truncate_chars};

/// Characters of each message shown by [`AccumulatorManager::list`].
pub const DISPLAY_PREVIEW_CHARS: usize = 100;

pub struct AccumulatorManager {
    accumulator: Arc<Accumulator>,
    feedback_enabled: bool,
}

impl AccumulatorManager {
    pub fn new(accumulator: Arc<Accumulator>, feedback_enabled: bool) -> Self {
        Self {
            accumulator,
            feedback_enabled,
        }
    }

    pub fn from_config(config: &AccumulatorConfig) -> Self {
        Self::new(
            Arc::new(Accumulator::from_config(config)),
            config.feedback_enabled,
        )
    }

    pub fn accumulator(&self) -> &Arc<Accumulator> {
        &self.accumulator
    }

    pub fn feedback_enabled(&self) -> bool {
        self.feedback_enabled
    }

    /// Store a plain message and, when feedback is on, confirm it.
    ///
    /// No confirmation is produced when nothing ended up stored (blank input,
    /// zero limits).
    pub fn process_message(&self, chat_id: ChatId, text: &str) -> Option<String> {
        let held = self.accumulator.add(chat_id, text);
        if !self.feedback_enabled {
            return None;
        }
        match held {
            Some(count) if count > 0 => Some(format!(
                "📝 Message stored. You now have {} ready for your next command.",
                plural(count, "message")
            )),
            _ => None,
        }
    }

    /// Take every accumulated message for use as command parameters.
    pub fn extract_and_clear(&self, chat_id: ChatId) -> Vec<String> {
        let params = self.accumulator.take_all(chat_id);
        info!(
            chat_id = %chat_id,
            parameter_count = params.len(),
            "extracted parameters for command execution"
        );
        params
    }

    pub fn status(&self, chat_id: ChatId) -> String {
        match self.accumulator.count(chat_id) {
            0 => "📭 No messages accumulated. Send some messages and then use a command!".into(),
            n => format!(
                "📝 You have {} accumulated and ready for your next command.",
                plural(n, "message")
            ),
        }
    }

    /// Numbered listing of the buffer, each entry cut to
    /// [`DISPLAY_PREVIEW_CHARS`] characters.
    pub fn list(&self, chat_id: ChatId) -> String {
        let messages = self.accumulator.get_all(chat_id);
        if messages.is_empty() {
            return "📭 No messages accumulated.".into();
        }

        let mut out = format!("📝 Your accumulated messages ({} total):", messages.len());
        for (i, message) in messages.iter().enumerate() {
            let preview = truncate_chars(message, DISPLAY_PREVIEW_CHARS);
            let ellipsis = if preview.len() < message.len() {
                "..."
            } else {
                ""
            };
            out.push_str(&format!("\n{}. {preview}{ellipsis}", i + 1));
        }
        out
    }

    pub fn clear(&self, chat_id: ChatId) -> String {
        let cleared = self.accumulator.clear(chat_id);
        if cleared == 0 {
            return "📭 No messages to clear - your accumulator is already empty.".into();
        }
        info!(chat_id = %chat_id, cleared_count = cleared, "manually cleared accumulator");
        format!("🗑️ Cleared {}.", plural(cleared, "accumulated message"))
    }

    /// Summary across all chats, for operators.
    pub fn global_status(&self) -> String {
        let chat_ids = self.accumulator.all_chat_ids();
        if chat_ids.is_empty() {
            return "📊 Global Status: No active chat accumulators.".into();
        }
        let total: usize = chat_ids
            .iter()
            .map(|id| self.accumulator.count(*id))
            .sum();
        format!(
            "📊 Global Status: {} with {} total.",
            plural(chat_ids.len(), "active chat"),
            plural(total, "accumulated message")
        )
    }
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}
