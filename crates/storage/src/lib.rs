use std::future::Future;
use std::pin::Pin;

pub mod auth;
pub mod client;
pub mod error;
pub mod ids;
pub mod memory;
pub mod postgrest;
pub mod types;

#[cfg(test)]
mod test_server;

pub use auth::{AuthBackend, AuthEvent, AuthSession, AuthUser, SignUpOutcome, SupabaseAuth};
pub use client::{BackendClient, BackendConfig};
pub use error::{AuthError, AuthResult, StorageError, StorageResult};
pub use ids::{ChatId, MessageId, UserId};
pub use memory::MemoryStorage;
pub use postgrest::PostgrestStorage;
pub use types::{
    ChatRecord, DEFAULT_CHAT_TITLE, MessageRecord, MessageRole, NewChat, NewMessage,
    ProfileRecord, ProfileUpsert,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait ChatStore: Send + Sync {
    fn add_chat<'a>(&'a self, input: NewChat) -> BoxFuture<'a, StorageResult<ChatRecord>>;
    fn get_chats<'a>(&'a self) -> BoxFuture<'a, StorageResult<Vec<ChatRecord>>>;
    fn rename_chat<'a>(
        &'a self,
        chat_id: ChatId,
        title: String,
    ) -> BoxFuture<'a, StorageResult<ChatRecord>>;
    fn delete_chat<'a>(&'a self, chat_id: ChatId) -> BoxFuture<'a, StorageResult<()>>;
}

pub trait MessageStore: Send + Sync {
    /// Returns the chat's messages in insertion order.
    fn get_messages<'a>(&'a self, chat_id: ChatId)
    -> BoxFuture<'a, StorageResult<Vec<MessageRecord>>>;
    fn add_message<'a>(
        &'a self,
        chat_id: ChatId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>>;
}

pub trait ProfileStore: Send + Sync {
    /// A user without a profile row yields `Ok(None)`.
    fn get_profile<'a>(
        &'a self,
        user_id: UserId,
    ) -> BoxFuture<'a, StorageResult<Option<ProfileRecord>>>;
    fn upsert_profile<'a>(
        &'a self,
        input: ProfileUpsert,
    ) -> BoxFuture<'a, StorageResult<ProfileRecord>>;
}

pub trait Storage: ChatStore + MessageStore + ProfileStore {}

impl<T> Storage for T where T: ChatStore + MessageStore + ProfileStore {}
