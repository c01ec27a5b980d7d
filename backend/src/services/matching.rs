//! Helper discovery and the support-request workflow.
//!
//! Request status only moves along pending→accepted, pending→declined and
//! accepted→completed, and every move is a conditional store write, so two
//! racing callers can never both perform the same transition.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

use super::chat::ChatService;
use super::presence::PresenceTracker;
use super::proximity;
use super::subscription::Subscription;
use crate::constants::{has_content, MAX_REQUEST_MESSAGE_CHARS, NEARBY_RADIUS_KM};
use crate::db::Store;
use crate::error::{CoreError, CoreResult};
use crate::models::{
    ChangeEvent, ChatSession, Profile, ProfileFilter, Record, RequestFilter, RequestStatus, Role,
    SupportRequest,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HelperFilter {
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub available_only: bool,
    #[serde(default)]
    pub online_only: bool,
    /// Keep only helpers within `NEARBY_RADIUS_KM` of the caller.
    #[serde(default)]
    pub nearby_only: bool,
}

impl HelperFilter {
    fn matches(&self, helper: &Profile) -> bool {
        let gender_ok = match (&self.gender, &helper.gender) {
            (Some(wanted), Some(actual)) => wanted.eq_ignore_ascii_case(actual),
            (Some(_), None) => false,
            (None, _) => true,
        };
        let language_ok = self.language.as_deref().is_none_or(|l| helper.speaks(l));

        gender_ok
            && language_ok
            && (!self.available_only || helper.is_available)
            && (!self.online_only || helper.is_online)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HelperMatch {
    #[serde(flatten)]
    pub profile: Profile,
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptOutcome {
    pub request: SupportRequest,
    pub chat: ChatSession,
    /// False when the request had already been accepted by an earlier call.
    pub newly_accepted: bool,
}

#[derive(Clone)]
pub struct MatchingEngine {
    store: Arc<dyn Store>,
    presence: PresenceTracker,
    chat: ChatService,
}

impl MatchingEngine {
    pub fn new(store: Arc<dyn Store>, presence: PresenceTracker, chat: ChatService) -> Self {
        Self { store, presence, chat }
    }

    /// Helpers matching the filter, nearest first when the caller has a
    /// location and in registration order otherwise.
    pub async fn list_helpers(&self, caller: Uuid, filter: &HelperFilter) -> CoreResult<Vec<HelperMatch>> {
        let origin = self.presence.get(caller).await?.location;
        if filter.nearby_only && origin.is_none() {
            return Err(CoreError::validation("a nearby search needs the caller's location"));
        }

        let helpers: Vec<Profile> = self
            .store
            .list_profiles(&ProfileFilter::helpers())
            .await?
            .into_iter()
            .filter(|h| h.id != caller && filter.matches(h))
            .collect();

        let matches = proximity::rank(origin.as_ref(), helpers)
            .into_iter()
            .filter(|r| !filter.nearby_only || r.distance_km.is_some_and(|d| d <= NEARBY_RADIUS_KM))
            .map(|r| HelperMatch { profile: r.item, distance_km: r.distance_km })
            .collect();

        Ok(matches)
    }

    pub async fn request_support(
        &self,
        seeker_id: Uuid,
        helper_id: Uuid,
        message: &str,
    ) -> CoreResult<SupportRequest> {
        if !has_content(message) {
            return Err(CoreError::validation("support request message must not be empty"));
        }
        if message.chars().count() > MAX_REQUEST_MESSAGE_CHARS {
            return Err(CoreError::validation(format!(
                "support request message exceeds {} characters",
                MAX_REQUEST_MESSAGE_CHARS
            )));
        }

        let seeker = self.presence.get(seeker_id).await?;
        if seeker.role != Role::Seeker {
            return Err(CoreError::validation("only seekers can request support"));
        }
        let helper = self.presence.get(helper_id).await?;
        if helper.role != Role::Helper {
            return Err(CoreError::validation(format!("{} is not a helper", helper_id)));
        }

        let now = Utc::now();
        let request = SupportRequest {
            id: Uuid::new_v4(),
            seeker_id,
            helper_id,
            message: message.trim().to_string(),
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        let request = self.store.insert_request(request).await?;
        info!("Support request {} from {} to {}", request.id, seeker_id, helper_id);
        Ok(request)
    }

    async fn load(&self, request_id: Uuid) -> CoreResult<SupportRequest> {
        self.store
            .get_request(request_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("support request {}", request_id)))
    }

    async fn load_for_helper(&self, caller: Uuid, request_id: Uuid) -> CoreResult<SupportRequest> {
        let request = self.load(request_id).await?;
        if request.helper_id != caller {
            return Err(CoreError::authorization(format!(
                "only the named helper can answer request {}",
                request_id
            )));
        }
        Ok(request)
    }

    /// Accepts a pending request and materialises the pair's chat.
    ///
    /// Repeated or concurrent accepts by the helper all resolve to the same
    /// chat; only one of them performs the status transition.
    pub async fn accept_request(&self, caller: Uuid, request_id: Uuid) -> CoreResult<AcceptOutcome> {
        self.load_for_helper(caller, request_id).await?;

        let (request, newly_accepted) = match self
            .store
            .transition_request(request_id, RequestStatus::Pending, RequestStatus::Accepted, Utc::now())
            .await?
        {
            Some(request) => (request, true),
            None => {
                let current = self.load(request_id).await?;
                if current.status != RequestStatus::Accepted {
                    return Err(CoreError::not_found(format!(
                        "pending support request {} (now {})",
                        request_id, current.status
                    )));
                }
                (current, false)
            }
        };

        let (chat, _) = self.chat.get_or_create(request.seeker_id, request.helper_id).await?;
        if newly_accepted {
            info!("Request {} accepted, chat {}", request_id, chat.id);
        }

        Ok(AcceptOutcome { request, chat, newly_accepted })
    }

    pub async fn decline_request(&self, caller: Uuid, request_id: Uuid) -> CoreResult<SupportRequest> {
        self.load_for_helper(caller, request_id).await?;
        let request = self
            .store
            .transition_request(request_id, RequestStatus::Pending, RequestStatus::Declined, Utc::now())
            .await?
            .ok_or_else(|| CoreError::not_found(format!("pending support request {}", request_id)))?;

        info!("Request {} declined", request_id);
        Ok(request)
    }

    /// Closes an accepted request. Either party may do this.
    pub async fn complete_request(&self, caller: Uuid, request_id: Uuid) -> CoreResult<SupportRequest> {
        let request = self.load(request_id).await?;
        if !request.involves(caller) {
            return Err(CoreError::authorization(format!(
                "{} is not a party to request {}",
                caller, request_id
            )));
        }

        let request = self
            .store
            .transition_request(request_id, RequestStatus::Accepted, RequestStatus::Completed, Utc::now())
            .await?
            .ok_or_else(|| CoreError::not_found(format!("accepted support request {}", request_id)))?;

        info!("Request {} completed by {}", request_id, caller);
        Ok(request)
    }

    pub async fn list_requests(&self, caller: Uuid, filter: &RequestFilter) -> CoreResult<Vec<SupportRequest>> {
        self.store.list_requests_for(caller, filter).await
    }

    /// Live changes to requests the caller is a party to.
    pub fn subscribe_requests(&self, caller: Uuid) -> Subscription<SupportRequest> {
        let mut rx = self.store.changes();
        let store = self.store.clone();

        Subscription::new(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(ChangeEvent { record: Record::SupportRequest(request), .. }) => {
                        if request.involves(caller) {
                            yield Ok(request);
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Request subscriber {} lagged by {} events, resyncing", caller, skipped);
                        match store.list_requests_for(caller, &RequestFilter::default()).await {
                            Ok(requests) => {
                                for request in requests {
                                    yield Ok(request);
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
