//! Online/offline and availability tracking.
//!
//! Connectivity is driven per connection: [`PresenceTracker::connect`] hands
//! back a [`PresenceConnection`] guard and the user stays online for as long
//! as at least one guard is alive. Clients that vanish without releasing are
//! caught by the stale-presence sweep once their heartbeat lapses.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::subscription::Subscription;
use crate::db::Store;
use crate::error::{CoreError, CoreResult};
use crate::models::{
    ChangeEvent, ChangeOp, Location, NewProfile, PresencePatch, Profile, ProfileFilter, Record,
    Role, UserPresence,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceEvent {
    pub op: ChangeOp,
    pub presence: UserPresence,
}

#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn Store>,
    /// Live connection count per user.
    connections: Arc<Mutex<HashMap<Uuid, usize>>>,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Creates the profile record at account creation.
    pub async fn register(&self, new_profile: NewProfile) -> CoreResult<Profile> {
        new_profile.validate()?;
        let profile = self.store.insert_profile(new_profile.into_profile(Utc::now())).await?;
        info!("Registered {} {} ({})", profile.role, profile.id, profile.name);
        Ok(profile)
    }

    pub async fn get(&self, user_id: Uuid) -> CoreResult<Profile> {
        self.store
            .get_profile(user_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("profile {}", user_id)))
    }

    pub async fn list(&self, filter: &ProfileFilter) -> CoreResult<Vec<Profile>> {
        self.store.list_profiles(filter).await
    }

    pub async fn set_online(&self, user_id: Uuid) -> CoreResult<UserPresence> {
        self.patch(user_id, PresencePatch::Online(true)).await
    }

    pub async fn set_offline(&self, user_id: Uuid) -> CoreResult<UserPresence> {
        self.patch(user_id, PresencePatch::Online(false)).await
    }

    /// Liveness ping: marks the user online and refreshes `last_seen`.
    pub async fn heartbeat(&self, user_id: Uuid) -> CoreResult<UserPresence> {
        self.set_online(user_id).await
    }

    pub async fn set_available(&self, user_id: Uuid, available: bool) -> CoreResult<UserPresence> {
        let profile = self.get(user_id).await?;
        if available && profile.role != Role::Helper {
            return Err(CoreError::validation("only helpers can mark themselves available"));
        }
        self.patch(user_id, PresencePatch::Available(available)).await
    }

    pub async fn set_location(&self, user_id: Uuid, location: Option<Location>) -> CoreResult<Profile> {
        if let Some(location) = &location {
            location.validate()?;
        }
        self.store
            .patch_profile(user_id, PresencePatch::Location(location), Utc::now())
            .await
    }

    async fn patch(&self, user_id: Uuid, patch: PresencePatch) -> CoreResult<UserPresence> {
        let profile = self.store.patch_profile(user_id, patch, Utc::now()).await?;
        debug!("Presence of {} is now {:?}", user_id, patch);
        Ok(profile.presence())
    }

    /// Opens a connection scope for the user and marks them online.
    pub async fn connect(&self, user_id: Uuid) -> CoreResult<PresenceConnection> {
        // Fail before counting so an unknown user never holds a slot.
        self.get(user_id).await?;
        *self.connections.lock().entry(user_id).or_insert(0) += 1;

        let connection = PresenceConnection {
            user_id,
            tracker: self.clone(),
            released: false,
        };
        self.set_online(user_id).await?;
        Ok(connection)
    }

    pub fn connection_count(&self, user_id: Uuid) -> usize {
        self.connections.lock().get(&user_id).copied().unwrap_or(0)
    }

    /// Drops one connection; returns true when it was the user's last.
    fn release_slot(&self, user_id: Uuid) -> bool {
        let mut connections = self.connections.lock();
        match connections.get_mut(&user_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                connections.remove(&user_id);
                true
            }
            None => false,
        }
    }

    async fn go_offline_after_last_release(&self, user_id: Uuid) -> CoreResult<()> {
        self.set_offline(user_id).await?;
        // A reconnect may have raced the offline write.
        if self.connection_count(user_id) > 0 {
            self.set_online(user_id).await?;
        }
        Ok(())
    }

    /// Marks offline everyone whose last heartbeat is older than `ttl`.
    ///
    /// Users holding a live [`PresenceConnection`] on this tracker are
    /// refreshed first, so an open connection is never swept.
    pub async fn sweep_stale(&self, ttl: Duration) -> CoreResult<Vec<Profile>> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| CoreError::validation("presence ttl out of range"))?;

        let connected: Vec<Uuid> = self.connections.lock().keys().copied().collect();
        for user_id in connected {
            if let Err(e) = self.heartbeat(user_id).await {
                warn!("Could not refresh connected user {} before sweep: {}", user_id, e);
            }
        }

        let now = Utc::now();
        let swept = self.store.mark_stale_offline(now - ttl, now).await?;
        if !swept.is_empty() {
            info!("Swept {} stale presences offline", swept.len());
        }
        Ok(swept)
    }

    /// Runs [`PresenceTracker::sweep_stale`] on a fixed interval until the
    /// task is aborted.
    pub fn spawn_sweeper(&self, ttl: Duration, every: Duration) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if let Err(e) = tracker.sweep_stale(ttl).await {
                    error!("Presence sweep failed: {}", e);
                }
            }
        })
    }

    /// Live presence changes matching `filter`.
    ///
    /// Delivery may repeat or reorder events; apply them through a
    /// [`PresenceView`]. A subscriber that falls behind is resynchronised
    /// with a snapshot of every matching user.
    pub fn subscribe(&self, filter: ProfileFilter) -> Subscription<PresenceEvent> {
        let mut rx = self.store.changes();
        let store = self.store.clone();

        Subscription::new(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(ChangeEvent { op, record: Record::Profile(profile) }) => {
                        if filter.matches(&profile) {
                            yield Ok(PresenceEvent { op, presence: profile.presence() });
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Presence subscriber lagged by {} events, resyncing", skipped);
                        match store.list_profiles(&filter).await {
                            Ok(profiles) => {
                                for profile in profiles {
                                    yield Ok(PresenceEvent {
                                        op: ChangeOp::Update,
                                        presence: profile.presence(),
                                    });
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

/// Scoped presence for one client connection. Release it explicitly with
/// [`PresenceConnection::release`]; dropping it releases in the background.
pub struct PresenceConnection {
    user_id: Uuid,
    tracker: PresenceTracker,
    released: bool,
}

impl PresenceConnection {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub async fn heartbeat(&self) -> CoreResult<UserPresence> {
        self.tracker.heartbeat(self.user_id).await
    }

    pub async fn release(mut self) -> CoreResult<()> {
        self.released = true;
        if self.tracker.release_slot(self.user_id) {
            self.tracker.go_offline_after_last_release(self.user_id).await?;
        }
        Ok(())
    }
}

impl Drop for PresenceConnection {
    fn drop(&mut self) {
        if self.released || !self.tracker.release_slot(self.user_id) {
            return;
        }

        let tracker = self.tracker.clone();
        let user_id = self.user_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = tracker.go_offline_after_last_release(user_id).await {
                        warn!("Failed to mark {} offline on disconnect: {}", user_id, e);
                    }
                });
            }
            Err(_) => {
                warn!("No runtime to mark {} offline; the presence sweep will", user_id);
            }
        }
    }
}

/// Client-side materialisation of presence events with last-write-wins
/// keyed on `last_seen`. Duplicate and out-of-order events are harmless.
#[derive(Debug, Default, Clone)]
pub struct PresenceView {
    users: HashMap<Uuid, UserPresence>,
}

impl PresenceView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an event; returns false when it was older than what we hold.
    pub fn apply(&mut self, presence: UserPresence) -> bool {
        match self.users.get(&presence.user_id) {
            Some(current) if current.last_seen > presence.last_seen => false,
            _ => {
                self.users.insert(presence.user_id, presence);
                true
            }
        }
    }

    pub fn get(&self, user_id: Uuid) -> Option<&UserPresence> {
        self.users.get(&user_id)
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.get(user_id).is_some_and(|p| p.is_online)
    }

    pub fn last_seen(&self, user_id: Uuid) -> Option<DateTime<Utc>> {
        self.get(user_id).map(|p| p.last_seen)
    }
}
