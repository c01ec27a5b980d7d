use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{chats, profiles, requests, ChangeFeed, Store};
use crate::constants::CHANGE_FEED_CAPACITY;
use crate::error::CoreResult;
use crate::models::{
    ChangeEvent, ChatSession, Message, NewMessage, ParticipantPair, PresencePatch, Profile,
    ProfileFilter, Record, RequestFilter, RequestStatus, SupportRequest,
};

/// PostgreSQL-backed store. Change notifications are published in-process
/// after each commit, so subscribers see writes made through this instance.
pub struct PgStore {
    pool: PgPool,
    feed: ChangeFeed,
    append_locks: AppendLocks,
}

/// One lock per chat, held across the append transaction and its
/// notification so subscribers receive a chat's messages in commit order.
/// Entries only live while some append on the chat is running or waiting.
#[derive(Default)]
struct AppendLocks {
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl AppendLocks {
    fn slot(&self, chat_id: Uuid) -> AppendSlot<'_> {
        let lock = self.locks.lock().entry(chat_id).or_default().clone();
        AppendSlot { owner: self, chat_id, lock }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

struct AppendSlot<'a> {
    owner: &'a AppendLocks,
    chat_id: Uuid,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for AppendSlot<'_> {
    fn drop(&mut self) {
        let mut locks = self.owner.locks.lock();
        // Only the map and this slot still own it.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.chat_id);
        }
    }
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            feed: ChangeFeed::new(CHANGE_FEED_CAPACITY),
            append_locks: AppendLocks::default(),
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_profile(&self, profile: Profile) -> CoreResult<Profile> {
        let created = profiles::create_profile(&self.pool, &profile).await?;
        self.feed.publish(ChangeEvent::insert(Record::Profile(created.clone())));
        Ok(created)
    }

    async fn get_profile(&self, user_id: Uuid) -> CoreResult<Option<Profile>> {
        profiles::get_profile_by_id(&self.pool, user_id).await
    }

    async fn list_profiles(&self, filter: &ProfileFilter) -> CoreResult<Vec<Profile>> {
        profiles::list_profiles(&self.pool, filter).await
    }

    async fn patch_profile(
        &self,
        user_id: Uuid,
        patch: PresencePatch,
        now: DateTime<Utc>,
    ) -> CoreResult<Profile> {
        let updated = profiles::patch_profile(&self.pool, user_id, patch, now).await?;
        self.feed.publish(ChangeEvent::update(Record::Profile(updated.clone())));
        Ok(updated)
    }

    async fn mark_stale_offline(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Profile>> {
        let swept = profiles::mark_stale_offline(&self.pool, cutoff, now).await?;
        for profile in &swept {
            self.feed.publish(ChangeEvent::update(Record::Profile(profile.clone())));
        }
        Ok(swept)
    }

    async fn insert_request(&self, request: SupportRequest) -> CoreResult<SupportRequest> {
        let created = requests::create_request(&self.pool, &request).await?;
        self.feed.publish(ChangeEvent::insert(Record::SupportRequest(created.clone())));
        Ok(created)
    }

    async fn get_request(&self, request_id: Uuid) -> CoreResult<Option<SupportRequest>> {
        requests::get_request_by_id(&self.pool, request_id).await
    }

    async fn list_requests_for(
        &self,
        user_id: Uuid,
        filter: &RequestFilter,
    ) -> CoreResult<Vec<SupportRequest>> {
        requests::list_requests_for_user(&self.pool, user_id, filter).await
    }

    async fn transition_request(
        &self,
        request_id: Uuid,
        from: RequestStatus,
        to: RequestStatus,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<SupportRequest>> {
        let updated = requests::transition_request(&self.pool, request_id, from, to, now).await?;
        if let Some(request) = &updated {
            self.feed.publish(ChangeEvent::update(Record::SupportRequest(request.clone())));
        }
        Ok(updated)
    }

    async fn get_or_create_chat(
        &self,
        pair: ParticipantPair,
        names: [String; 2],
        now: DateTime<Utc>,
    ) -> CoreResult<(ChatSession, bool)> {
        let (chat, created) = chats::get_or_create_chat(&self.pool, pair, &names, now).await?;
        if created {
            self.feed.publish(ChangeEvent::insert(Record::Chat(chat.clone())));
        }
        Ok((chat, created))
    }

    async fn get_chat(&self, chat_id: Uuid) -> CoreResult<Option<ChatSession>> {
        chats::get_chat_by_id(&self.pool, chat_id).await
    }

    async fn list_chats_for(&self, user_id: Uuid) -> CoreResult<Vec<ChatSession>> {
        chats::list_chats_for_user(&self.pool, user_id).await
    }

    async fn append_message(
        &self,
        message: NewMessage<'_>,
        now: DateTime<Utc>,
    ) -> CoreResult<Message> {
        let slot = self.append_locks.slot(message.chat_id);
        let _guard = slot.lock.lock().await;

        let (stored, chat) = chats::append_message(&self.pool, message, now).await?;
        self.feed.publish(ChangeEvent::insert(Record::Message(stored.clone())));
        self.feed.publish(ChangeEvent::update(Record::Chat(chat)));
        Ok(stored)
    }

    async fn messages_after(
        &self,
        chat_id: Uuid,
        after_seq: Option<i64>,
    ) -> CoreResult<Vec<Message>> {
        chats::get_messages_after(&self.pool, chat_id, after_seq).await
    }

    async fn latest_message_seq(&self, chat_id: Uuid) -> CoreResult<Option<i64>> {
        chats::get_latest_message_seq(&self.pool, chat_id).await
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_lock_entries_are_pruned() {
        let locks = AppendLocks::default();
        let chat_id = Uuid::new_v4();

        let first = locks.slot(chat_id);
        let second = locks.slot(chat_id);
        assert!(Arc::ptr_eq(&first.lock, &second.lock));
        assert_eq!(locks.len(), 1);

        drop(first);
        assert_eq!(locks.len(), 1);
        drop(second);
        assert_eq!(locks.len(), 0);

        for _ in 0..10 {
            let slot = locks.slot(Uuid::new_v4());
            let _guard = slot.lock.lock().await;
        }
        assert_eq!(locks.len(), 0);
    }
}
