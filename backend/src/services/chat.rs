use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use uuid::Uuid;

use super::subscription::Subscription;
use crate::constants::{has_content, MAX_MESSAGE_CHARS};
use crate::db::Store;
use crate::error::{CoreError, CoreResult};
use crate::models::{ChangeEvent, ChatSession, Message, NewMessage, ParticipantPair, Record};

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn Store>,
}

impl ChatService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Explicit "start chat" between the caller and another user. Returns the
    /// existing chat when the pair already has one.
    pub async fn start_chat(&self, caller: Uuid, other: Uuid) -> CoreResult<ChatSession> {
        let (chat, _) = self.get_or_create(caller, other).await?;
        Ok(chat)
    }

    /// Idempotent on the unordered pair; the flag tells whether this call
    /// created the chat.
    pub async fn get_or_create(&self, a: Uuid, b: Uuid) -> CoreResult<(ChatSession, bool)> {
        let pair = ParticipantPair::new(a, b)?;
        let names = [
            self.display_name(pair.low()).await?,
            self.display_name(pair.high()).await?,
        ];

        let (chat, created) = self.store.get_or_create_chat(pair, names, Utc::now()).await?;
        if created {
            info!("Created chat {} for {} and {}", chat.id, pair.low(), pair.high());
        }
        Ok((chat, created))
    }

    async fn display_name(&self, user_id: Uuid) -> CoreResult<String> {
        self.store
            .get_profile(user_id)
            .await?
            .map(|p| p.name)
            .ok_or_else(|| CoreError::not_found(format!("profile {}", user_id)))
    }

    /// The chat, provided `caller` is one of its participants.
    pub async fn get_chat(&self, caller: Uuid, chat_id: Uuid) -> CoreResult<ChatSession> {
        let chat = self
            .store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("chat {}", chat_id)))?;

        if !chat.is_participant(caller) {
            return Err(CoreError::authorization(format!(
                "{} is not a participant of chat {}",
                caller, chat_id
            )));
        }
        Ok(chat)
    }

    pub async fn list_chats(&self, caller: Uuid) -> CoreResult<Vec<ChatSession>> {
        self.store.list_chats_for(caller).await
    }

    /// Appends a message. The text is only borrowed: on any failure it is
    /// still the caller's to retry with. Nothing is retried here.
    pub async fn send(&self, chat_id: Uuid, sender_id: Uuid, text: &str) -> CoreResult<Message> {
        let chat = self.get_chat(sender_id, chat_id).await?;

        if !has_content(text) {
            return Err(CoreError::validation("message text must not be empty"));
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(CoreError::validation(format!(
                "message exceeds {} characters",
                MAX_MESSAGE_CHARS
            )));
        }

        let sender_name = chat.name_of(sender_id).unwrap_or_default();
        let new_message = NewMessage { chat_id, sender_id, sender_name, text };

        match self.store.append_message(new_message, Utc::now()).await {
            Ok(message) => Ok(message),
            Err(e) => {
                if e.is_retryable() {
                    warn!("Send to chat {} failed, text left with caller: {}", chat_id, e);
                }
                Err(e)
            }
        }
    }

    /// Full ordered message history, oldest first.
    pub async fn history(&self, caller: Uuid, chat_id: Uuid) -> CoreResult<Vec<Message>> {
        self.get_chat(caller, chat_id).await?;
        self.store.messages_after(chat_id, None).await
    }

    /// Messages appended to the chat from now on, in chat order.
    pub async fn subscribe(&self, caller: Uuid, chat_id: Uuid) -> CoreResult<Subscription<Message>> {
        self.get_chat(caller, chat_id).await?;
        // Listen first so nothing after the baseline can slip past.
        let rx = self.store.changes();
        let baseline = self.store.latest_message_seq(chat_id).await?;
        Ok(self.message_stream(rx, chat_id, baseline))
    }

    /// History plus a live stream that picks up exactly where the history
    /// ends. This is what a client opening a chat screen wants.
    pub async fn open(
        &self,
        caller: Uuid,
        chat_id: Uuid,
    ) -> CoreResult<(Vec<Message>, Subscription<Message>)> {
        self.get_chat(caller, chat_id).await?;
        let rx = self.store.changes();
        let history = self.store.messages_after(chat_id, None).await?;
        let baseline = history.iter().map(|m| m.seq).max();
        Ok((history, self.message_stream(rx, chat_id, baseline)))
    }

    /// Delivers messages with `seq` above the last one delivered. When the
    /// receiver lags, the gap is refilled from the store, so delivery is
    /// at-least-once and never skips.
    fn message_stream(
        &self,
        mut rx: broadcast::Receiver<ChangeEvent>,
        chat_id: Uuid,
        baseline: Option<i64>,
    ) -> Subscription<Message> {
        let store = self.store.clone();

        Subscription::new(async_stream::stream! {
            let mut last_seq = baseline;
            loop {
                match rx.recv().await {
                    Ok(ChangeEvent { record: Record::Message(message), .. }) => {
                        if message.chat_id == chat_id && last_seq.is_none_or(|s| message.seq > s) {
                            last_seq = Some(message.seq);
                            yield Ok(message);
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Chat {} subscriber lagged by {} events, refilling", chat_id, skipped);
                        match store.messages_after(chat_id, last_seq).await {
                            Ok(missed) => {
                                for message in missed {
                                    last_seq = Some(message.seq);
                                    yield Ok(message);
                                }
                            }
                            Err(e) => {
                                yield Err(e);
                                break;
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
