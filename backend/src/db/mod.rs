//! Storage collaborator boundary.
//!
//! The core never talks to a database directly; it goes through [`Store`],
//! which offers filtered reads, atomic conditional writes, get-or-create on a
//! chat's participant pair, and a change feed of committed writes.

pub mod chats;
pub mod connection;
pub mod feed;
pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod profiles;
pub mod requests;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::models::{
    ChangeEvent, ChatSession, Message, NewMessage, ParticipantPair, PresencePatch, Profile,
    ProfileFilter, RequestFilter, RequestStatus, SupportRequest,
};

pub use connection::{get_db_pool, DatabaseConfig};
pub use feed::ChangeFeed;
pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Inserts a new profile. Fails with a validation error if the id exists.
    async fn insert_profile(&self, profile: Profile) -> CoreResult<Profile>;

    async fn get_profile(&self, user_id: Uuid) -> CoreResult<Option<Profile>>;

    /// Profiles matching the filter, in stable registration order.
    async fn list_profiles(&self, filter: &ProfileFilter) -> CoreResult<Vec<Profile>>;

    /// Applies a single presence change and refreshes `last_seen`.
    async fn patch_profile(
        &self,
        user_id: Uuid,
        patch: PresencePatch,
        now: DateTime<Utc>,
    ) -> CoreResult<Profile>;

    /// Marks offline every online profile last seen before `cutoff`.
    async fn mark_stale_offline(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Profile>>;

    async fn insert_request(&self, request: SupportRequest) -> CoreResult<SupportRequest>;

    async fn get_request(&self, request_id: Uuid) -> CoreResult<Option<SupportRequest>>;

    /// Requests where the user is seeker or helper, newest first.
    async fn list_requests_for(
        &self,
        user_id: Uuid,
        filter: &RequestFilter,
    ) -> CoreResult<Vec<SupportRequest>>;

    /// Conditional status write: succeeds only while the request is in
    /// `from`. Returns `None` when the request is missing or has moved on.
    async fn transition_request(
        &self,
        request_id: Uuid,
        from: RequestStatus,
        to: RequestStatus,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<SupportRequest>>;

    /// Atomic get-or-create keyed on the participant pair. The flag is true
    /// when this call created the chat.
    async fn get_or_create_chat(
        &self,
        pair: ParticipantPair,
        names: [String; 2],
        now: DateTime<Utc>,
    ) -> CoreResult<(ChatSession, bool)>;

    async fn get_chat(&self, chat_id: Uuid) -> CoreResult<Option<ChatSession>>;

    /// Chats the user participates in, most recent activity first.
    async fn list_chats_for(&self, user_id: Uuid) -> CoreResult<Vec<ChatSession>>;

    /// Appends a message and updates the chat's last message snapshot as one
    /// atomic write.
    async fn append_message(
        &self,
        message: NewMessage<'_>,
        now: DateTime<Utc>,
    ) -> CoreResult<Message>;

    /// Messages of a chat in order, optionally only those after `after_seq`.
    async fn messages_after(
        &self,
        chat_id: Uuid,
        after_seq: Option<i64>,
    ) -> CoreResult<Vec<Message>>;

    /// Sequence number of the newest message in a chat, if any.
    async fn latest_message_seq(&self, chat_id: Uuid) -> CoreResult<Option<i64>>;

    /// Live feed of committed writes.
    fn changes(&self) -> broadcast::Receiver<ChangeEvent>;
}
