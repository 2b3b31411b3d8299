use serde::{Deserialize, Serialize};

use super::ids::{ChatId, MessageId, UserId};

/// Title used when a chat is created from blank input.
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// Storage-local message role, decoupled from the chat layer's role enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRole {
    User,
    Bot,
}

impl MessageRole {
    pub const fn as_stored(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Bot => "bot",
        }
    }

    /// Only the exact `bot` marker maps to [`MessageRole::Bot`]; anything else was typed by a person.
    pub fn from_stored(raw: &str) -> Self {
        if raw == "bot" { Self::Bot } else { Self::User }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    pub id: ChatId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChat {
    pub title: String,
}

impl NewChat {
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        let title = if title.trim().is_empty() {
            DEFAULT_CHAT_TITLE.to_string()
        } else {
            title.trim().to_string()
        };
        Self { title }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub role: MessageRole,
    pub content: String,
    pub image_url: Option<String>,
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub image_url: Option<String>,
    pub prompt: Option<String>,
}

impl NewMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image_url: None,
            prompt: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Bot, content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: UserId,
    pub name: String,
    pub image_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileUpsert {
    pub id: UserId,
    pub name: String,
    pub image_url: String,
}

/// Optional columns are written as empty strings and read back as `None`.
pub(crate) fn optional_column(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}
