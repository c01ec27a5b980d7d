//! In-process store used for development and tests.
//!
//! All state sits behind one mutex. Each write, including its change
//! notification, happens inside a single critical section, which gives the
//! same atomicity the PostgreSQL store gets from constraints and row locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{ChangeFeed, Store};
use crate::constants::CHANGE_FEED_CAPACITY;
use crate::error::{CoreError, CoreResult};
use crate::models::{
    ChangeEvent, ChatSession, LastMessage, Message, NewMessage, ParticipantPair, PresencePatch,
    Profile, ProfileFilter, Record, RequestFilter, RequestStatus, SupportRequest,
};

#[derive(Default)]
struct State {
    /// Registration order is the stable listing order.
    profiles: Vec<Profile>,
    profile_index: HashMap<Uuid, usize>,
    requests: HashMap<Uuid, SupportRequest>,
    chats: HashMap<Uuid, ChatSession>,
    chats_by_pair: HashMap<ParticipantPair, Uuid>,
    messages: HashMap<Uuid, Vec<Message>>,
    next_seq: i64,
}

impl State {
    fn profile_mut(&mut self, user_id: Uuid) -> Option<&mut Profile> {
        let idx = *self.profile_index.get(&user_id)?;
        self.profiles.get_mut(idx)
    }
}

pub struct MemoryStore {
    state: Mutex<State>,
    feed: ChangeFeed,
    outage: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_feed_capacity(CHANGE_FEED_CAPACITY)
    }

    pub fn with_feed_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            feed: ChangeFeed::new(capacity),
            outage: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent call fail with a transient error until cleared.
    pub fn simulate_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.feed.subscriber_count()
    }

    fn check_available(&self) -> CoreResult<()> {
        if self.outage.load(Ordering::SeqCst) {
            Err(CoreError::Transient("in-memory store is unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_profile(&self, profile: Profile) -> CoreResult<Profile> {
        self.check_available()?;
        let mut state = self.state.lock();
        if state.profile_index.contains_key(&profile.id) {
            return Err(CoreError::validation(format!(
                "profile {} already exists",
                profile.id
            )));
        }
        let idx = state.profiles.len();
        state.profile_index.insert(profile.id, idx);
        state.profiles.push(profile.clone());
        self.feed.publish(ChangeEvent::insert(Record::Profile(profile.clone())));
        Ok(profile)
    }

    async fn get_profile(&self, user_id: Uuid) -> CoreResult<Option<Profile>> {
        self.check_available()?;
        let state = self.state.lock();
        Ok(state
            .profile_index
            .get(&user_id)
            .and_then(|idx| state.profiles.get(*idx))
            .cloned())
    }

    async fn list_profiles(&self, filter: &ProfileFilter) -> CoreResult<Vec<Profile>> {
        self.check_available()?;
        let state = self.state.lock();
        Ok(state
            .profiles
            .iter()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect())
    }

    async fn patch_profile(
        &self,
        user_id: Uuid,
        patch: PresencePatch,
        now: DateTime<Utc>,
    ) -> CoreResult<Profile> {
        self.check_available()?;
        let mut state = self.state.lock();
        let profile = state
            .profile_mut(user_id)
            .ok_or_else(|| CoreError::not_found(format!("profile {}", user_id)))?;
        patch.apply(profile, now);
        let updated = profile.clone();
        self.feed.publish(ChangeEvent::update(Record::Profile(updated.clone())));
        Ok(updated)
    }

    async fn mark_stale_offline(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Profile>> {
        self.check_available()?;
        let mut state = self.state.lock();
        let mut swept = Vec::new();
        for profile in state
            .profiles
            .iter_mut()
            .filter(|p| p.is_online && p.last_seen < cutoff)
        {
            PresencePatch::Online(false).apply(profile, now);
            swept.push(profile.clone());
        }
        for profile in &swept {
            self.feed.publish(ChangeEvent::update(Record::Profile(profile.clone())));
        }
        Ok(swept)
    }

    async fn insert_request(&self, request: SupportRequest) -> CoreResult<SupportRequest> {
        self.check_available()?;
        let mut state = self.state.lock();
        state.requests.insert(request.id, request.clone());
        self.feed.publish(ChangeEvent::insert(Record::SupportRequest(request.clone())));
        Ok(request)
    }

    async fn get_request(&self, request_id: Uuid) -> CoreResult<Option<SupportRequest>> {
        self.check_available()?;
        Ok(self.state.lock().requests.get(&request_id).cloned())
    }

    async fn list_requests_for(
        &self,
        user_id: Uuid,
        filter: &RequestFilter,
    ) -> CoreResult<Vec<SupportRequest>> {
        self.check_available()?;
        let state = self.state.lock();
        let mut requests: Vec<SupportRequest> = state
            .requests
            .values()
            .filter(|r| r.involves(user_id))
            .filter(|r| filter.status.is_none_or(|s| s == r.status))
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(requests)
    }

    async fn transition_request(
        &self,
        request_id: Uuid,
        from: RequestStatus,
        to: RequestStatus,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<SupportRequest>> {
        from.ensure_transition(to)?;
        self.check_available()?;
        let mut state = self.state.lock();
        let Some(request) = state.requests.get_mut(&request_id) else {
            return Ok(None);
        };
        if request.status != from {
            return Ok(None);
        }
        request.status = to;
        request.updated_at = now;
        let updated = request.clone();
        self.feed.publish(ChangeEvent::update(Record::SupportRequest(updated.clone())));
        Ok(Some(updated))
    }

    async fn get_or_create_chat(
        &self,
        pair: ParticipantPair,
        names: [String; 2],
        now: DateTime<Utc>,
    ) -> CoreResult<(ChatSession, bool)> {
        self.check_available()?;
        let mut state = self.state.lock();
        if let Some(existing) = state
            .chats_by_pair
            .get(&pair)
            .and_then(|id| state.chats.get(id))
        {
            return Ok((existing.clone(), false));
        }

        let chat = ChatSession {
            id: Uuid::new_v4(),
            participants: pair,
            participant_names: names,
            last_message: None,
            created_at: now,
        };
        state.chats_by_pair.insert(pair, chat.id);
        state.chats.insert(chat.id, chat.clone());
        state.messages.insert(chat.id, Vec::new());
        self.feed.publish(ChangeEvent::insert(Record::Chat(chat.clone())));
        Ok((chat, true))
    }

    async fn get_chat(&self, chat_id: Uuid) -> CoreResult<Option<ChatSession>> {
        self.check_available()?;
        Ok(self.state.lock().chats.get(&chat_id).cloned())
    }

    async fn list_chats_for(&self, user_id: Uuid) -> CoreResult<Vec<ChatSession>> {
        self.check_available()?;
        let state = self.state.lock();
        let mut chats: Vec<ChatSession> = state
            .chats
            .values()
            .filter(|c| c.is_participant(user_id))
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()).then(b.id.cmp(&a.id)));
        Ok(chats)
    }

    async fn append_message(
        &self,
        message: NewMessage<'_>,
        now: DateTime<Utc>,
    ) -> CoreResult<Message> {
        self.check_available()?;
        let mut state = self.state.lock();
        state.next_seq += 1;
        let seq = state.next_seq;

        let chat = state
            .chats
            .get_mut(&message.chat_id)
            .ok_or_else(|| CoreError::not_found(format!("chat {}", message.chat_id)))?;

        // Never step backwards in time within a chat, even if the clock does.
        let created_at = match &chat.last_message {
            Some(last) if last.time > now => last.time,
            _ => now,
        };
        let stored = Message {
            id: Uuid::new_v4(),
            chat_id: message.chat_id,
            seq,
            sender_id: message.sender_id,
            sender_name: message.sender_name.to_string(),
            text: message.text.to_string(),
            created_at,
        };
        chat.last_message = Some(LastMessage {
            text: stored.text.clone(),
            time: created_at,
        });
        let chat_snapshot = chat.clone();

        state
            .messages
            .entry(message.chat_id)
            .or_default()
            .push(stored.clone());

        self.feed.publish(ChangeEvent::insert(Record::Message(stored.clone())));
        self.feed.publish(ChangeEvent::update(Record::Chat(chat_snapshot)));
        Ok(stored)
    }

    async fn messages_after(
        &self,
        chat_id: Uuid,
        after_seq: Option<i64>,
    ) -> CoreResult<Vec<Message>> {
        self.check_available()?;
        let state = self.state.lock();
        let messages = state.messages.get(&chat_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(messages
            .iter()
            .filter(|m| after_seq.is_none_or(|after| m.seq > after))
            .cloned()
            .collect())
    }

    async fn latest_message_seq(&self, chat_id: Uuid) -> CoreResult<Option<i64>> {
        self.check_available()?;
        let state = self.state.lock();
        Ok(state
            .messages
            .get(&chat_id)
            .and_then(|messages| messages.last())
            .map(|m| m.seq))
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use std::sync::Arc;

    fn profile(name: &str, role: Role) -> Profile {
        let now = Utc::now();
        Profile {
            id: Uuid::new_v4(),
            name: name.to_string(),
            role,
            gender: None,
            languages: vec![],
            location: None,
            is_available: false,
            is_online: false,
            last_seen: now,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_duplicate_profile_rejected() {
        let store = MemoryStore::new();
        let p = profile("Asha", Role::Helper);
        store.insert_profile(p.clone()).await.unwrap();
        assert!(matches!(
            store.insert_profile(p).await,
            Err(CoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_yields_one_chat() {
        let store = Arc::new(MemoryStore::new());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            // Alternate argument order; the pair key must not care.
            let pair = if i % 2 == 0 {
                ParticipantPair::new(a, b).unwrap()
            } else {
                ParticipantPair::new(b, a).unwrap()
            };
            handles.push(tokio::spawn(async move {
                store
                    .get_or_create_chat(pair, ["x".into(), "y".into()], Utc::now())
                    .await
                    .unwrap()
            }));
        }

        let mut ids = Vec::new();
        let mut created = 0;
        for handle in handles {
            let (chat, was_created) = handle.await.unwrap();
            ids.push(chat.id);
            if was_created {
                created += 1;
            }
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(created, 1);
        assert_eq!(store.list_chats_for(a).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let request = SupportRequest {
            id: Uuid::new_v4(),
            seeker_id: Uuid::new_v4(),
            helper_id: Uuid::new_v4(),
            message: "need help".to_string(),
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        store.insert_request(request.clone()).await.unwrap();

        let first = store
            .transition_request(request.id, RequestStatus::Pending, RequestStatus::Accepted, now)
            .await
            .unwrap();
        assert_eq!(first.map(|r| r.status), Some(RequestStatus::Accepted));

        let second = store
            .transition_request(request.id, RequestStatus::Pending, RequestStatus::Declined, now)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_transition_rejects_edges_outside_lifecycle() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let request = SupportRequest {
            id: Uuid::new_v4(),
            seeker_id: Uuid::new_v4(),
            helper_id: Uuid::new_v4(),
            message: "need help".to_string(),
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        store.insert_request(request.clone()).await.unwrap();
        store
            .transition_request(request.id, RequestStatus::Pending, RequestStatus::Declined, now)
            .await
            .unwrap();

        let reopened = store
            .transition_request(request.id, RequestStatus::Declined, RequestStatus::Pending, now)
            .await;
        assert!(matches!(reopened, Err(CoreError::Validation(_))));

        let skipped = store
            .transition_request(request.id, RequestStatus::Pending, RequestStatus::Completed, now)
            .await;
        assert!(matches!(skipped, Err(CoreError::Validation(_))));

        let current = store.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(current.status, RequestStatus::Declined);
    }

    #[tokio::test]
    async fn test_chats_with_equal_activity_list_in_id_order() {
        let store = MemoryStore::new();
        let me = Uuid::new_v4();
        let now = Utc::now();
        for _ in 0..6 {
            let pair = ParticipantPair::new(me, Uuid::new_v4()).unwrap();
            store
                .get_or_create_chat(pair, ["a".into(), "b".into()], now)
                .await
                .unwrap();
        }

        let first = store.list_chats_for(me).await.unwrap();
        let ids: Vec<Uuid> = first.iter().map(|c| c.id).collect();
        let mut expected = ids.clone();
        expected.sort_by(|a, b| b.cmp(a));
        assert_eq!(ids, expected);

        let again: Vec<Uuid> = store.list_chats_for(me).await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(again, ids);
    }

    #[tokio::test]
    async fn test_dropping_receiver_releases_feed_slot() {
        let store = MemoryStore::new();
        assert_eq!(store.subscriber_count(), 0);
        let rx = store.changes();
        assert_eq!(store.subscriber_count(), 1);
        drop(rx);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_append_updates_snapshot_and_keeps_time_monotonic() {
        let store = MemoryStore::new();
        let a = Uuid::new_v4();
        let pair = ParticipantPair::new(a, Uuid::new_v4()).unwrap();
        let (chat, _) = store
            .get_or_create_chat(pair, ["a".into(), "b".into()], Utc::now())
            .await
            .unwrap();

        let later = Utc::now() + chrono::Duration::seconds(30);
        let first = store
            .append_message(
                NewMessage { chat_id: chat.id, sender_id: a, sender_name: "a", text: "one" },
                later,
            )
            .await
            .unwrap();
        // Clock went backwards for the second write.
        let second = store
            .append_message(
                NewMessage { chat_id: chat.id, sender_id: a, sender_name: "a", text: "two" },
                Utc::now(),
            )
            .await
            .unwrap();

        assert!(second.created_at >= first.created_at);
        assert!(second.seq > first.seq);

        let snapshot = store.get_chat(chat.id).await.unwrap().unwrap();
        assert_eq!(snapshot.last_message.map(|m| m.text), Some("two".to_string()));

        let after_first = store.messages_after(chat.id, Some(first.seq)).await.unwrap();
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].text, "two");
    }

    #[tokio::test]
    async fn test_stale_sweep_only_touches_old_online_profiles() {
        let store = MemoryStore::new();
        let old = Utc::now() - chrono::Duration::minutes(10);

        let mut stale = profile("stale", Role::Helper);
        stale.is_online = true;
        stale.last_seen = old;
        let mut fresh = profile("fresh", Role::Helper);
        fresh.is_online = true;
        let offline = profile("offline", Role::Seeker);

        for p in [stale.clone(), fresh.clone(), offline] {
            store.insert_profile(p).await.unwrap();
        }

        let cutoff = Utc::now() - chrono::Duration::minutes(1);
        let swept = store.mark_stale_offline(cutoff, Utc::now()).await.unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].id, stale.id);
        assert!(!swept[0].is_online);
        assert!(store.get_profile(fresh.id).await.unwrap().unwrap().is_online);
    }

    #[tokio::test]
    async fn test_outage_surfaces_transient() {
        let store = MemoryStore::new();
        store.simulate_outage(true);
        let err = store.get_profile(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_retryable());
        store.simulate_outage(false);
        assert!(store.get_profile(Uuid::new_v4()).await.unwrap().is_none());
    }
}
