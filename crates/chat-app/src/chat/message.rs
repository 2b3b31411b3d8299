use parley_llm::{ProviderMessage, Role as ProviderRole};
use parley_storage::{MessageRecord, MessageRole};

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Bot,
}

impl From<MessageRole> for Role {
    fn from(role: MessageRole) -> Self {
        match role {
            MessageRole::User => Self::User,
            MessageRole::Bot => Self::Bot,
        }
    }
}

impl From<Role> for MessageRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => Self::User,
            Role::Bot => Self::Bot,
        }
    }
}

impl From<Role> for ProviderRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => Self::User,
            Role::Bot => Self::Assistant,
        }
    }
}

/// One entry of the in-memory conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub image_url: Option<String>,
    pub prompt: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image_url: None,
            prompt: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Empty bot message that stream fragments are appended to.
    pub fn bot_placeholder() -> Self {
        Self::new(Role::Bot, String::new())
    }

    /// Earlier turns sent as context; empty ones are skipped.
    pub fn to_provider_message(&self) -> Option<ProviderMessage> {
        if self.content.trim().is_empty() {
            return None;
        }
        Some(ProviderMessage::new(self.role.into(), self.content.clone()))
    }
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            role: record.role.into(),
            content: record.content,
            image_url: record.image_url,
            prompt: record.prompt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_messages_are_sent_as_assistant_turns() {
        let message = Message::new(Role::Bot, "Sure.");
        let provider = message.to_provider_message().expect("non-empty");
        assert_eq!(provider.role, ProviderRole::Assistant);
        assert_eq!(provider.content, "Sure.");
    }

    #[test]
    fn blank_messages_are_not_sent() {
        assert!(Message::bot_placeholder().to_provider_message().is_none());
        assert!(Message::user("  ").to_provider_message().is_none());
    }
}
