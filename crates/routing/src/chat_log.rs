//! Append-only record of chat interactions, one JSONL file per local day.

use std::{
    io,
    path::{Path, PathBuf},
};

use {
    catmandu_common::{ChatId, InboundMessage},
    chrono::{Local, NaiveDate},
    serde::Serialize,
    tokio::{fs, io::AsyncWriteExt},
};

/// Characters of message text kept in `text_preview`.
const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Command,
    Message,
}

/// One line of the chat log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatLogEntry {
    pub timestamp: String,
    pub chat_id: ChatId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    pub participant_name: String,
    pub message_type: MessageKind,
    pub text_length: usize,
    pub text_preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(rename = "cattackle_name", skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_length: Option<usize>,
    #[serde(skip)]
    day: NaiveDate,
}

impl ChatLogEntry {
    pub fn new(message: &InboundMessage, kind: MessageKind) -> Self {
        let now = Local::now();
        Self {
            timestamp: now.to_rfc3339(),
            chat_id: message.chat_id,
            user_id: message.sender.id,
            participant_name: message.sender.display_name(),
            message_type: kind,
            text_length: message.text.chars().count(),
            text_preview: preview(&message.text),
            command: None,
            handler: None,
            response_length: None,
            day: now.date_naive(),
        }
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    pub fn response(mut self, reply: &str) -> Self {
        self.response_length = Some(reply.chars().count());
        self
    }
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Writes [`ChatLogEntry`] lines under a directory.
#[derive(Debug, Clone)]
pub struct ChatLogger {
    dir: PathBuf,
}

impl ChatLogger {
    /// Creates `dir` if it does not exist yet.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.jsonl", day.format("%Y-%m-%d")))
    }

    /// Append `entry` to the file of the day it was created.
    pub async fn record(&self, entry: &ChatLogEntry) -> io::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(entry.day))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
