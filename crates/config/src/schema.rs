/// Config schema types (accumulator, handler discovery, retry policy, chat log).
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatmanduConfig {
    pub accumulator: AccumulatorConfig,
    pub handlers: HandlersConfig,
    pub retry: RetryConfig,
    pub chat_log: ChatLogConfig,
}

/// Limits and feedback policy for the per-chat message accumulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorConfig {
    /// Messages kept per chat; older ones are evicted first. `0` retains nothing.
    pub max_messages: usize,
    /// Characters kept per stored message.
    pub max_message_length: usize,
    /// Reply with a confirmation after each stored message.
    pub feedback_enabled: bool,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            max_messages: 100,
            max_message_length: 1000,
            feedback_enabled: true,
        }
    }
}

/// Where handler manifests are discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlersConfig {
    /// Directory scanned for handler manifests. Relative paths resolve
    /// against the working directory.
    pub dir: PathBuf,
    /// File name of the manifest inside each handler directory.
    pub manifest_name: String,
}

impl Default for HandlersConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cattackles"),
            manifest_name: "cattackle.toml".into(),
        }
    }
}

/// Backoff applied between invocation attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base delay in milliseconds; attempt `n` sleeps `base * 2^n`.
    pub backoff_base_ms: u64,
}

impl RetryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 500,
        }
    }
}

/// Daily JSONL record of chat interactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatLogConfig {
    pub enabled: bool,
    /// One `YYYY-MM-DD.jsonl` file per day is written here.
    pub dir: PathBuf,
}

impl Default for ChatLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("logs/chats"),
        }
    }
}
