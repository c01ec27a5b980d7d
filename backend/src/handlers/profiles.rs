use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{sse::Event, Sse},
    Json,
};
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use tokio::time::MissedTickBehavior;
use tracing::warn;
use uuid::Uuid;

use super::{sse, AppState, Caller};
use crate::error::CoreResult;
use crate::models::{Location, NewProfile, Profile, ProfileFilter, Role, UserPresence};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub location: Option<Location>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub available: bool,
}

#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    /// `null` clears the stored location.
    pub location: Option<Location>,
}

pub async fn register(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<RegisterRequest>,
) -> CoreResult<(StatusCode, Json<Profile>)> {
    let profile = state
        .presence
        .register(NewProfile {
            id: caller,
            name: req.name,
            role: req.role,
            gender: req.gender,
            languages: req.languages,
            location: req.location,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Caller(_): Caller,
    Path(id): Path<Uuid>,
) -> CoreResult<Json<Profile>> {
    Ok(Json(state.presence.get(id).await?))
}

pub async fn go_online(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> CoreResult<Json<UserPresence>> {
    Ok(Json(state.presence.set_online(caller).await?))
}

pub async fn go_offline(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> CoreResult<Json<UserPresence>> {
    Ok(Json(state.presence.set_offline(caller).await?))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> CoreResult<Json<UserPresence>> {
    Ok(Json(state.presence.heartbeat(caller).await?))
}

pub async fn set_availability(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<AvailabilityRequest>,
) -> CoreResult<Json<UserPresence>> {
    Ok(Json(state.presence.set_available(caller, req.available).await?))
}

pub async fn set_location(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<LocationRequest>,
) -> CoreResult<Json<Profile>> {
    Ok(Json(state.presence.set_location(caller, req.location).await?))
}

/// Presence changes as SSE. The caller counts as connected, and therefore
/// online, for as long as this stream stays open; the stream heartbeats on
/// their behalf so no sweep marks them offline meanwhile.
pub async fn presence_stream(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(filter): Query<ProfileFilter>,
) -> CoreResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let mut subscription = state.presence.subscribe(filter);
    let connection = state.presence.connect(caller).await?;
    let mut heartbeat = tokio::time::interval(state.stream_heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let events = async_stream::stream! {
        // connect() already counted as the first heartbeat.
        heartbeat.tick().await;
        loop {
            let next = tokio::select! {
                item = subscription.next_event() => Some(item),
                _ = heartbeat.tick() => None,
            };
            match next {
                Some(Some(item)) => yield item,
                Some(None) => break,
                None => {
                    if let Err(e) = connection.heartbeat().await {
                        warn!("Presence stream heartbeat for {} failed: {}", caller, e);
                    }
                }
            }
        }
    };

    Ok(sse("presence", events))
}
