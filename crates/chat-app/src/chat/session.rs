use std::sync::Arc;

use parley_llm::{
    LlmProvider, ProviderEventStream, ProviderMessage, ProviderStreamHandle, StreamEvent,
    StreamRequest,
};
use parley_storage::{ChatId, MessageRecord, NewChat, NewMessage, Storage};
use snafu::ResultExt;

use super::message::Message;
use super::reducer::{Reduction, apply_event};
use crate::error::{AppError, AppResult, StorageSnafu, StreamSnafu};

/// One open conversation: the message list plus the stores it syncs with.
pub struct ChatSession {
    storage: Arc<dyn Storage>,
    provider: Arc<dyn LlmProvider>,
    model_id: String,
    chat_id: Option<ChatId>,
    messages: Vec<Message>,
}

impl ChatSession {
    pub fn new(
        storage: Arc<dyn Storage>,
        provider: Arc<dyn LlmProvider>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            provider,
            model_id: model_id.into(),
            chat_id: None,
            messages: Vec::new(),
        }
    }

    pub fn chat_id(&self) -> Option<ChatId> {
        self.chat_id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub async fn open(&mut self, chat_id: ChatId) -> AppResult<()> {
        let records = self
            .storage
            .get_messages(chat_id)
            .await
            .context(StorageSnafu {
                stage: "load-messages",
            })?;
        tracing::debug!(chat_id = %chat_id, message_count = records.len(), "chat opened");

        self.chat_id = Some(chat_id);
        self.messages = records.into_iter().map(Message::from).collect();
        Ok(())
    }

    /// Records the user's turn and starts the completion for it.
    ///
    /// The first turn of a new conversation creates the chat, titled with the
    /// text. The text is stored and sent as typed; blank input is ignored and
    /// yields `None`.
    pub async fn submit(&mut self, text: &str) -> AppResult<Option<ProviderStreamHandle>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let chat_id = match self.chat_id {
            Some(chat_id) => chat_id,
            None => {
                let chat = self
                    .storage
                    .add_chat(NewChat::new(text))
                    .await
                    .context(StorageSnafu {
                        stage: "create-chat",
                    })?;
                tracing::info!(chat_id = %chat.id, "chat created");
                self.chat_id = Some(chat.id);
                chat.id
            }
        };

        self.storage
            .add_message(chat_id, NewMessage::user(text))
            .await
            .context(StorageSnafu {
                stage: "persist-user-message",
            })?;

        let mut history = self
            .messages
            .iter()
            .filter_map(Message::to_provider_message)
            .collect::<Vec<ProviderMessage>>();
        let prompt = Message::user(text);
        history.extend(prompt.to_provider_message());

        self.messages.push(prompt);
        self.messages.push(Message::bot_placeholder());

        let request = StreamRequest::new(self.model_id.clone(), history);
        match self.provider.stream_chat(request) {
            Ok(handle) => Ok(Some(handle)),
            Err(source) => {
                self.messages.pop();
                Err(AppError::Provider {
                    stage: "start-stream",
                    source,
                })
            }
        }
    }

    /// Feeds stream events into the message list until a terminal event.
    ///
    /// On completion the bot message is stored and returned.
    pub async fn drive<F>(
        &mut self,
        stream: &mut ProviderEventStream,
        mut on_fragment: F,
    ) -> AppResult<Option<MessageRecord>>
    where
        F: FnMut(&str),
    {
        while let Some(event) = stream.recv().await {
            if let StreamEvent::Fragment(fragment) = &event {
                on_fragment(fragment);
            }

            match apply_event(&mut self.messages, event) {
                Reduction::Continue => {}
                Reduction::Persist { content } => return self.persist_reply(content).await,
                Reduction::Finished => return Ok(None),
                Reduction::Failed { message } => {
                    tracing::warn!(chat_id = ?self.chat_id, error = %message, "stream failed");
                    return StreamSnafu {
                        stage: "drive-stream",
                        message,
                    }
                    .fail();
                }
            }
        }

        tracing::warn!(chat_id = ?self.chat_id, "stream closed without a terminal event");
        Ok(None)
    }

    /// Submits `text` and drives its completion on the current runtime.
    pub async fn send<F>(&mut self, text: &str, on_fragment: F) -> AppResult<Option<MessageRecord>>
    where
        F: FnMut(&str),
    {
        let Some(ProviderStreamHandle { mut stream, worker }) = self.submit(text).await? else {
            return Ok(None);
        };
        tokio::spawn(worker);
        self.drive(&mut stream, on_fragment).await
    }

    async fn persist_reply(&self, content: String) -> AppResult<Option<MessageRecord>> {
        let Some(chat_id) = self.chat_id else {
            tracing::warn!("completed reply has no chat to be stored in");
            return Ok(None);
        };

        let record = self
            .storage
            .add_message(chat_id, NewMessage::bot(content))
            .await
            .context(StorageSnafu {
                stage: "persist-bot-message",
            })?;
        tracing::debug!(chat_id = %chat_id, message_id = %record.id, "reply stored");
        Ok(Some(record))
    }
}
