use std::collections::{BTreeMap, HashMap};

use tokio::sync::Mutex;

use super::error::{NotFoundSnafu, StorageResult};
use super::ids::{ChatId, MessageId, UserId};
use super::types::{
    ChatRecord, MessageRecord, NewChat, NewMessage, ProfileRecord, ProfileUpsert, optional_column,
};
use super::{BoxFuture, ChatStore, MessageStore, ProfileStore};

#[derive(Debug, Default)]
struct MemoryState {
    chats: BTreeMap<ChatId, ChatRecord>,
    messages: Vec<MessageRecord>,
    profiles: HashMap<UserId, ProfileRecord>,
    next_chat_id: i64,
    next_message_id: i64,
}

/// In-process tables with the same contract as the REST backend.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChatStore for MemoryStorage {
    fn add_chat<'a>(&'a self, input: NewChat) -> BoxFuture<'a, StorageResult<ChatRecord>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.next_chat_id += 1;
            let chat = ChatRecord {
                id: ChatId::new(state.next_chat_id),
                title: input.title,
            };
            state.chats.insert(chat.id, chat.clone());
            Ok(chat)
        })
    }

    fn get_chats<'a>(&'a self) -> BoxFuture<'a, StorageResult<Vec<ChatRecord>>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.chats.values().cloned().collect())
        })
    }

    fn rename_chat<'a>(
        &'a self,
        chat_id: ChatId,
        title: String,
    ) -> BoxFuture<'a, StorageResult<ChatRecord>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let Some(chat) = state.chats.get_mut(&chat_id) else {
                return NotFoundSnafu {
                    stage: "memory-rename-chat",
                    entity: "chat",
                    id: chat_id.to_string(),
                }
                .fail();
            };
            chat.title = title;
            Ok(chat.clone())
        })
    }

    fn delete_chat<'a>(&'a self, chat_id: ChatId) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.chats.remove(&chat_id);
            // Mirrors the cascading foreign key on `messages.chat_id`.
            state.messages.retain(|message| message.chat_id != chat_id);
            Ok(())
        })
    }
}

impl MessageStore for MemoryStorage {
    fn get_messages<'a>(
        &'a self,
        chat_id: ChatId,
    ) -> BoxFuture<'a, StorageResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .messages
                .iter()
                .filter(|message| message.chat_id == chat_id)
                .cloned()
                .collect())
        })
    }

    fn add_message<'a>(
        &'a self,
        chat_id: ChatId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if !state.chats.contains_key(&chat_id) {
                return NotFoundSnafu {
                    stage: "memory-add-message",
                    entity: "chat",
                    id: chat_id.to_string(),
                }
                .fail();
            }

            state.next_message_id += 1;
            let message = MessageRecord {
                id: MessageId::new(state.next_message_id),
                chat_id,
                role: input.role,
                content: input.content,
                image_url: optional_column(input.image_url),
                prompt: optional_column(input.prompt),
            };
            state.messages.push(message.clone());
            Ok(message)
        })
    }
}

impl ProfileStore for MemoryStorage {
    fn get_profile<'a>(
        &'a self,
        user_id: UserId,
    ) -> BoxFuture<'a, StorageResult<Option<ProfileRecord>>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.profiles.get(&user_id).cloned())
        })
    }

    fn upsert_profile<'a>(
        &'a self,
        input: ProfileUpsert,
    ) -> BoxFuture<'a, StorageResult<ProfileRecord>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let profile = ProfileRecord {
                id: input.id,
                name: input.name,
                image_url: input.image_url,
            };
            state.profiles.insert(profile.id, profile.clone());
            Ok(profile)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::types::MessageRole;

    #[tokio::test]
    async fn messages_come_back_in_insertion_order_per_chat() {
        let storage = MemoryStorage::new();
        let first = storage.add_chat(NewChat::new("first")).await.expect("chat");
        let second = storage.add_chat(NewChat::new("second")).await.expect("chat");

        storage
            .add_message(first.id, NewMessage::user("question"))
            .await
            .expect("user message");
        storage
            .add_message(second.id, NewMessage::user("elsewhere"))
            .await
            .expect("other chat");
        storage
            .add_message(first.id, NewMessage::bot("answer"))
            .await
            .expect("bot message");

        let messages = storage.get_messages(first.id).await.expect("messages");
        let summary = messages
            .iter()
            .map(|message| (message.role, message.content.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![(MessageRole::User, "question"), (MessageRole::Bot, "answer")]
        );
    }

    #[tokio::test]
    async fn deleting_a_chat_drops_its_messages() {
        let storage = MemoryStorage::new();
        let chat = storage.add_chat(NewChat::new("doomed")).await.expect("chat");
        storage
            .add_message(chat.id, NewMessage::user("bye"))
            .await
            .expect("message");

        storage.delete_chat(chat.id).await.expect("delete");

        assert!(storage.get_chats().await.expect("chats").is_empty());
        assert!(storage.get_messages(chat.id).await.expect("messages").is_empty());
        assert!(matches!(
            storage.add_message(chat.id, NewMessage::user("late")).await,
            Err(StorageError::NotFound { entity: "chat", .. })
        ));
    }

    #[tokio::test]
    async fn rename_of_missing_chat_is_not_found() {
        let storage = MemoryStorage::new();
        let result = storage.rename_chat(ChatId::new(9), "renamed".to_string()).await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }
}
