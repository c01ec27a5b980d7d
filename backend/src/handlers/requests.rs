use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{sse::Event, Sse},
    Json,
};
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use uuid::Uuid;

use super::{sse, AppState, Caller};
use crate::error::CoreResult;
use crate::models::{RequestFilter, SupportRequest};
use crate::services::{AcceptOutcome, HelperFilter, HelperMatch};

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub helper_id: Uuid,
    pub message: String,
}

pub async fn list_helpers(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(filter): Query<HelperFilter>,
) -> CoreResult<Json<Vec<HelperMatch>>> {
    Ok(Json(state.matching.list_helpers(caller, &filter).await?))
}

pub async fn create_request(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<CreateRequest>,
) -> CoreResult<(StatusCode, Json<SupportRequest>)> {
    let request = state
        .matching
        .request_support(caller, req.helper_id, &req.message)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn list_requests(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(filter): Query<RequestFilter>,
) -> CoreResult<Json<Vec<SupportRequest>>> {
    Ok(Json(state.matching.list_requests(caller, &filter).await?))
}

pub async fn accept_request(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
) -> CoreResult<Json<AcceptOutcome>> {
    Ok(Json(state.matching.accept_request(caller, id).await?))
}

pub async fn decline_request(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
) -> CoreResult<Json<SupportRequest>> {
    Ok(Json(state.matching.decline_request(caller, id).await?))
}

pub async fn complete_request(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
) -> CoreResult<Json<SupportRequest>> {
    Ok(Json(state.matching.complete_request(caller, id).await?))
}

pub async fn request_stream(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    sse("request", state.matching.subscribe_requests(caller))
}
