//! Chat-facing value types exchanged between the front-end and the core.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Identifier of a chat on the front-end platform.
///
/// Telegram chat ids are signed (groups are negative), so this wraps `i64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChatId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl FromStr for ChatId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| Error::InvalidChatId(s.to_string()))
    }
}

/// The user who sent an inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl Sender {
    pub fn with_username(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Default::default()
        }
    }

    /// Identity forwarded to handlers. Only the username qualifies; empty
    /// usernames count as absent.
    pub fn identity(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }

    /// Human-readable name for logs: `@username`, else first/last name.
    pub fn display_name(&self) -> String {
        if let Some(username) = self.identity() {
            return format!("@{username}");
        }
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            _ => "Unknown".into(),
        }
    }
}

/// One unit of inbound text, either typed or produced by transcription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    #[serde(default)]
    pub sender: Sender,
    pub text: String,
}

impl InboundMessage {
    pub fn new(chat_id: impl Into<ChatId>, sender: Sender, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            sender,
            text: text.into(),
        }
    }
}

/// Text to deliver back to a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundReply {
    pub chat_id: ChatId,
    pub text: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_parses_negative_group_ids() {
        assert_eq!("-100123".parse::<ChatId>().unwrap(), ChatId(-100123));
        assert_eq!(" 42 ".parse::<ChatId>().unwrap(), ChatId(42));
    }

    #[test]
    fn chat_id_rejects_garbage() {
        let err = "abc".parse::<ChatId>().unwrap_err();
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn chat_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&ChatId(123)).unwrap();
        assert_eq!(json, "123");
    }

    #[test]
    fn sender_identity_ignores_empty_username() {
        let sender = Sender::with_username("");
        assert_eq!(sender.identity(), None);
        assert_eq!(Sender::with_username("alice").identity(), Some("alice"));
    }

    #[test]
    fn sender_display_name_fallbacks() {
        assert_eq!(Sender::with_username("bob").display_name(), "@bob");
        let named = Sender {
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            ..Default::default()
        };
        assert_eq!(named.display_name(), "Ada Lovelace");
        assert_eq!(Sender::default().display_name(), "Unknown");
    }
}
