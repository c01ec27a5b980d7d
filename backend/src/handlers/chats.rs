use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{sse::Event, Sse},
    Json,
};
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use uuid::Uuid;

use super::{sse, AppState, Caller};
use crate::error::CoreResult;
use crate::models::{ChatSession, Message};

#[derive(Debug, Deserialize)]
pub struct StartChatRequest {
    pub participant_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

/// Returns 201 when the chat was created by this call, 200 when the pair
/// already had one.
pub async fn start_chat(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<StartChatRequest>,
) -> CoreResult<(StatusCode, Json<ChatSession>)> {
    let (chat, created) = state.chat.get_or_create(caller, req.participant_id).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(chat)))
}

pub async fn list_chats(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> CoreResult<Json<Vec<ChatSession>>> {
    Ok(Json(state.chat.list_chats(caller).await?))
}

pub async fn history(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(chat_id): Path<Uuid>,
) -> CoreResult<Json<Vec<Message>>> {
    Ok(Json(state.chat.history(caller, chat_id).await?))
}

pub async fn send_message(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(chat_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> CoreResult<(StatusCode, Json<Message>)> {
    let message = state.chat.send(chat_id, caller, &req.text).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// The chat's history followed by live messages, all as `message` events.
pub async fn chat_stream(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(chat_id): Path<Uuid>,
) -> CoreResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let (history, live) = state.chat.open(caller, chat_id).await?;
    let events = stream::iter(history.into_iter().map(Ok)).chain(live);
    Ok(sse("message", events))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app, call};
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use uuid::Uuid;

    async fn register(app: &axum::Router, name: &str, role: &str) -> Uuid {
        let id = Uuid::new_v4();
        call(
            app,
            Method::POST,
            "/api/profiles",
            Some(id),
            Some(json!({ "name": name, "role": role })),
        )
        .await;
        id
    }

    #[tokio::test]
    async fn test_start_chat_is_idempotent() {
        let (app, _, _) = app();
        let a = register(&app, "Asha", "seeker").await;
        let b = register(&app, "Meera", "helper").await;

        let (status, first) = call(
            &app,
            Method::POST,
            "/api/chats",
            Some(a),
            Some(json!({ "participant_id": b })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, second) = call(
            &app,
            Method::POST,
            "/api/chats",
            Some(b),
            Some(json!({ "participant_id": a })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["id"], second["id"]);
    }

    #[tokio::test]
    async fn test_chat_with_self_is_rejected() {
        let (app, _, _) = app();
        let a = register(&app, "Asha", "seeker").await;
        let (status, _) = call(
            &app,
            Method::POST,
            "/api/chats",
            Some(a),
            Some(json!({ "participant_id": a })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_send_and_history() {
        let (app, _, _) = app();
        let a = register(&app, "Asha", "seeker").await;
        let b = register(&app, "Meera", "helper").await;
        let outsider = register(&app, "Ravi", "seeker").await;

        let (_, chat) = call(
            &app,
            Method::POST,
            "/api/chats",
            Some(a),
            Some(json!({ "participant_id": b })),
        )
        .await;
        let messages_uri = format!("/api/chats/{}/messages", chat["id"].as_str().unwrap());

        for (sender, text) in [(a, "hi"), (b, "hello, how can I help?")] {
            let (status, message) = call(
                &app,
                Method::POST,
                &messages_uri,
                Some(sender),
                Some(json!({ "text": text })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(message["text"], text);
        }

        let (status, history) = call(&app, Method::GET, &messages_uri, Some(b), None).await;
        assert_eq!(status, StatusCode::OK);
        let texts: Vec<&str> = history
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, vec!["hi", "hello, how can I help?"]);
        assert_eq!(history[0]["sender_name"], "Asha");

        let (status, _) = call(&app, Method::GET, &messages_uri, Some(outsider), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &app,
            Method::POST,
            &messages_uri,
            Some(outsider),
            Some(json!({ "text": "let me in" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, chats) = call(&app, Method::GET, "/api/chats", Some(a), None).await;
        assert_eq!(chats[0]["last_message"]["text"], "hello, how can I help?");
    }

    #[tokio::test]
    async fn test_transient_failure_maps_to_503() {
        let (app, _, store) = app();
        let a = register(&app, "Asha", "seeker").await;
        let b = register(&app, "Meera", "helper").await;
        let (_, chat) = call(
            &app,
            Method::POST,
            "/api/chats",
            Some(a),
            Some(json!({ "participant_id": b })),
        )
        .await;
        let messages_uri = format!("/api/chats/{}/messages", chat["id"].as_str().unwrap());

        store.simulate_outage(true);
        let (status, body) = call(
            &app,
            Method::POST,
            &messages_uri,
            Some(a),
            Some(json!({ "text": "are you there?" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["retryable"], true);
    }
}
