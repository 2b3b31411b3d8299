use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};

use super::client::BackendClient;
use super::error::{
    DecodeRowsSnafu, EmptyRepresentationSnafu, NotFoundSnafu, RequestSnafu, StatusSnafu,
    StorageResult, backend_error_message,
};
use super::ids::{ChatId, MessageId, UserId};
use super::types::{
    ChatRecord, MessageRecord, MessageRole, NewChat, NewMessage, ProfileRecord, ProfileUpsert,
    optional_column,
};
use super::{BoxFuture, ChatStore, MessageStore, ProfileStore};

pub const CHATS_TABLE: &str = "chats";
pub const MESSAGES_TABLE: &str = "messages";
pub const USER_TABLE: &str = "user";

const PREFER_REPRESENTATION: &str = "return=representation";
const PREFER_UPSERT: &str = "resolution=merge-duplicates,return=representation";

#[derive(Debug, Deserialize)]
struct ChatRow {
    id: i64,
    #[serde(default)]
    title: Option<String>,
}

impl ChatRow {
    fn into_record(self) -> ChatRecord {
        ChatRecord {
            id: ChatId::new(self.id),
            title: self.title.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageRow {
    id: i64,
    chat_id: i64,
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, rename = "imageUrl")]
    image_url: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

impl MessageRow {
    fn into_record(self) -> MessageRecord {
        MessageRecord {
            id: MessageId::new(self.id),
            chat_id: ChatId::new(self.chat_id),
            role: MessageRole::from_stored(&self.role),
            content: self.content.unwrap_or_default(),
            image_url: optional_column(self.image_url),
            prompt: optional_column(self.prompt),
        }
    }
}

#[derive(Debug, Serialize)]
struct MessageInsert<'a> {
    chat_id: i64,
    content: &'a str,
    role: &'static str,
    #[serde(rename = "imageUrl")]
    image_url: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
struct UserRow {
    id: UserId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
}

impl UserRow {
    fn into_record(self) -> ProfileRecord {
        ProfileRecord {
            id: self.id,
            name: self.name.unwrap_or_default(),
            image_url: self.image_url.unwrap_or_default(),
        }
    }
}

/// Table access over the backend's REST dialect (`column=eq.value` filters).
#[derive(Debug, Clone)]
pub struct PostgrestStorage {
    client: BackendClient,
}

impl PostgrestStorage {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    fn table_request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, &self.client.config().rest_url(table))
    }

    async fn send_rows<T>(
        stage: &'static str,
        table: &'static str,
        builder: RequestBuilder,
    ) -> StorageResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let body = Self::send(stage, table, builder).await?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&body).context(DecodeRowsSnafu { stage, table })
    }

    async fn send(
        stage: &'static str,
        table: &'static str,
        builder: RequestBuilder,
    ) -> StorageResult<String> {
        let response = builder
            .send()
            .await
            .context(RequestSnafu { stage, table })?;
        let status = response.status();
        let body = response.text().await.context(RequestSnafu { stage, table })?;

        if !status.is_success() {
            tracing::warn!(
                table,
                stage,
                status = status.as_u16(),
                "backend rejected table request"
            );
            return StatusSnafu {
                stage,
                table,
                status: status.as_u16(),
                message: backend_error_message(status.as_u16(), &body),
            }
            .fail();
        }

        Ok(body)
    }

    fn first_row<T>(rows: Vec<T>, stage: &'static str, table: &'static str) -> StorageResult<T> {
        rows.into_iter()
            .next()
            .context(EmptyRepresentationSnafu { stage, table })
    }
}

impl ChatStore for PostgrestStorage {
    fn add_chat<'a>(&'a self, input: NewChat) -> BoxFuture<'a, StorageResult<ChatRecord>> {
        Box::pin(async move {
            let builder = self
                .table_request(Method::POST, CHATS_TABLE)
                .query(&[("select", "id,title")])
                .header("Prefer", PREFER_REPRESENTATION)
                .json(&serde_json::json!({ "title": input.title }));

            let rows = Self::send_rows::<ChatRow>("add-chat", CHATS_TABLE, builder).await?;
            let chat = Self::first_row(rows, "add-chat-representation", CHATS_TABLE)?.into_record();
            tracing::debug!(chat_id = %chat.id, "created chat");
            Ok(chat)
        })
    }

    fn get_chats<'a>(&'a self) -> BoxFuture<'a, StorageResult<Vec<ChatRecord>>> {
        Box::pin(async move {
            let builder = self
                .table_request(Method::GET, CHATS_TABLE)
                .query(&[("select", "*"), ("order", "id.asc")]);

            let rows = Self::send_rows::<ChatRow>("get-chats", CHATS_TABLE, builder).await?;
            Ok(rows.into_iter().map(ChatRow::into_record).collect())
        })
    }

    fn rename_chat<'a>(
        &'a self,
        chat_id: ChatId,
        title: String,
    ) -> BoxFuture<'a, StorageResult<ChatRecord>> {
        Box::pin(async move {
            let builder = self
                .table_request(Method::PATCH, CHATS_TABLE)
                .query(&[("id", format!("eq.{chat_id}"))])
                .header("Prefer", PREFER_REPRESENTATION)
                .json(&serde_json::json!({ "title": title }));

            let rows = Self::send_rows::<ChatRow>("rename-chat", CHATS_TABLE, builder).await?;
            rows.into_iter()
                .next()
                .map(ChatRow::into_record)
                .context(NotFoundSnafu {
                    stage: "rename-chat-representation",
                    entity: "chat",
                    id: chat_id.to_string(),
                })
        })
    }

    fn delete_chat<'a>(&'a self, chat_id: ChatId) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            let builder = self
                .table_request(Method::DELETE, CHATS_TABLE)
                .query(&[("id", format!("eq.{chat_id}"))]);

            Self::send("delete-chat", CHATS_TABLE, builder).await?;
            tracing::debug!(chat_id = %chat_id, "deleted chat");
            Ok(())
        })
    }
}

impl MessageStore for PostgrestStorage {
    fn get_messages<'a>(
        &'a self,
        chat_id: ChatId,
    ) -> BoxFuture<'a, StorageResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            let builder = self.table_request(Method::GET, MESSAGES_TABLE).query(&[
                ("select", "*".to_string()),
                ("chat_id", format!("eq.{chat_id}")),
                ("order", "id.asc".to_string()),
            ]);

            let rows =
                Self::send_rows::<MessageRow>("get-messages", MESSAGES_TABLE, builder).await?;
            tracing::debug!(chat_id = %chat_id, message_count = rows.len(), "loaded messages");
            Ok(rows.into_iter().map(MessageRow::into_record).collect())
        })
    }

    fn add_message<'a>(
        &'a self,
        chat_id: ChatId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>> {
        Box::pin(async move {
            let insert = MessageInsert {
                chat_id: chat_id.0,
                content: &input.content,
                role: input.role.as_stored(),
                image_url: input.image_url.as_deref().unwrap_or_default(),
                prompt: input.prompt.as_deref().unwrap_or_default(),
            };
            let builder = self
                .table_request(Method::POST, MESSAGES_TABLE)
                .header("Prefer", PREFER_REPRESENTATION)
                .json(&insert);

            let rows =
                Self::send_rows::<MessageRow>("add-message", MESSAGES_TABLE, builder).await?;
            Ok(Self::first_row(rows, "add-message-representation", MESSAGES_TABLE)?.into_record())
        })
    }
}

impl ProfileStore for PostgrestStorage {
    fn get_profile<'a>(
        &'a self,
        user_id: UserId,
    ) -> BoxFuture<'a, StorageResult<Option<ProfileRecord>>> {
        Box::pin(async move {
            let builder = self.table_request(Method::GET, USER_TABLE).query(&[
                ("select", "id,name,image_url".to_string()),
                ("id", format!("eq.{user_id}")),
            ]);

            let rows = Self::send_rows::<UserRow>("get-profile", USER_TABLE, builder).await?;
            Ok(rows.into_iter().next().map(UserRow::into_record))
        })
    }

    fn upsert_profile<'a>(
        &'a self,
        input: ProfileUpsert,
    ) -> BoxFuture<'a, StorageResult<ProfileRecord>> {
        Box::pin(async move {
            let row = UserRow {
                id: input.id,
                name: Some(input.name),
                image_url: Some(input.image_url),
            };
            let builder = self
                .table_request(Method::POST, USER_TABLE)
                .header("Prefer", PREFER_UPSERT)
                .json(&row);

            let rows = Self::send_rows::<UserRow>("upsert-profile", USER_TABLE, builder).await?;
            Ok(Self::first_row(rows, "upsert-profile-representation", USER_TABLE)?.into_record())
        })
    }
}
