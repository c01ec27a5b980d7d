//! HTTP surface over the presence, matching and chat services.
//!
//! Every `/api` route identifies its caller through the `x-user-id` header
//! (see [`Caller`]). Live feeds are served as server-sent events; closing the
//! HTTP connection drops the underlying subscription.

pub mod chats;
pub mod profiles;
pub mod requests;

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post, put},
    Router,
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::constants::{DEFAULT_PRESENCE_TTL_SECS, SSE_KEEP_ALIVE_SECS, USER_ID_HEADER};
use crate::db::Store;
use crate::error::{CoreError, CoreResult};
use crate::services::{ChatService, MatchingEngine, PresenceTracker};

#[derive(Clone)]
pub struct AppState {
    pub presence: PresenceTracker,
    pub matching: MatchingEngine,
    pub chat: ChatService,
    /// How often an open presence stream refreshes its user's `last_seen`.
    pub stream_heartbeat: Duration,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let presence = PresenceTracker::new(store.clone());
        let chat = ChatService::new(store.clone());
        let matching = MatchingEngine::new(store, presence.clone(), chat.clone());
        Self {
            presence,
            matching,
            chat,
            stream_heartbeat: heartbeat_interval(Duration::from_secs(DEFAULT_PRESENCE_TTL_SECS)),
        }
    }

    /// Keeps open presence streams alive under the given sweep TTL, including
    /// sweeps run by another process.
    pub fn with_presence_ttl(mut self, ttl: Duration) -> Self {
        self.stream_heartbeat = heartbeat_interval(ttl);
        self
    }
}

/// A third of the TTL, so two heartbeats can go missing before a sweep.
fn heartbeat_interval(ttl: Duration) -> Duration {
    (ttl / 3).max(Duration::from_millis(1))
}

/// The authenticated user making the request. Identity is established
/// upstream; this layer only trusts the id it is handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub Uuid);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = CoreError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .map(Caller)
            .ok_or(CoreError::Unauthenticated)
    }
}

/// All routes except CORS and tracing, which the binary layers on.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Profiles & presence
        .route("/api/profiles", post(profiles::register))
        .route("/api/profiles/{id}", get(profiles::get_profile))
        .route("/api/presence/online", post(profiles::go_online))
        .route("/api/presence/offline", post(profiles::go_offline))
        .route("/api/presence/heartbeat", post(profiles::heartbeat))
        .route("/api/presence/availability", put(profiles::set_availability))
        .route("/api/presence/location", put(profiles::set_location))
        .route("/api/presence/stream", get(profiles::presence_stream))
        // Matching
        .route("/api/helpers", get(requests::list_helpers))
        .route(
            "/api/requests",
            post(requests::create_request).get(requests::list_requests),
        )
        .route("/api/requests/stream", get(requests::request_stream))
        .route("/api/requests/{id}/accept", post(requests::accept_request))
        .route("/api/requests/{id}/decline", post(requests::decline_request))
        .route("/api/requests/{id}/complete", post(requests::complete_request))
        // Chats
        .route("/api/chats", post(chats::start_chat).get(chats::list_chats))
        .route(
            "/api/chats/{id}/messages",
            get(chats::history).post(chats::send_message),
        )
        .route("/api/chats/{id}/stream", get(chats::chat_stream))
        .with_state(state)
}

pub async fn health_check() -> &'static str {
    "OK"
}

/// Renders one stream item as an SSE event. Errors go out as an `error`
/// event carrying the same body shape as an HTTP error response.
fn to_event<T: Serialize>(name: &'static str, item: CoreResult<T>) -> Event {
    let rendered = match item {
        Ok(value) => Event::default().event(name).json_data(&value),
        Err(e) => Event::default().event("error").json_data(serde_json::json!({
            "kind": e.kind(),
            "message": e.to_string(),
            "retryable": e.is_retryable(),
        })),
    };

    rendered.unwrap_or_else(|e| {
        tracing::error!("Failed to encode {} event: {}", name, e);
        Event::default().event("error").data("encoding failed")
    })
}

fn sse<T, S>(name: &'static str, stream: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Serialize,
    S: Stream<Item = CoreResult<T>> + Send + 'static,
{
    let events = stream.map(move |item| Ok::<_, Infallible>(to_event(name, item)));
    Sse::new(events).keep_alive(
        KeepAlive::new().interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS)),
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::{router, AppState};
    use crate::constants::USER_ID_HEADER;
    use crate::db::MemoryStore;

    pub fn app() -> (Router, AppState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(store.clone());
        (router(state.clone()), state, store)
    }

    pub async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        caller: Option<Uuid>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(caller) = caller {
            builder = builder.header(USER_ID_HEADER, caller.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}
