use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::{chats::ChatRow, ChatSession, Message, NewMessage, ParticipantPair};

const CHAT_COLUMNS: &str = "id, participant_low, participant_high, name_low, name_high, \
     last_message, last_message_time, created_at";

const MESSAGE_COLUMNS: &str = "id, chat_id, seq, sender_id, sender_name, text, created_at";

#[derive(Debug, FromRow)]
struct UpsertedChatRow {
    #[sqlx(flatten)]
    chat: ChatRow,
    inserted: bool,
}

/// Get-or-create in one statement. The unique index on
/// (participant_low, participant_high) arbitrates concurrent callers; the
/// no-op DO UPDATE makes the losing inserts return the winner's row.
pub async fn get_or_create_chat(
    pool: &PgPool,
    pair: ParticipantPair,
    names: &[String; 2],
    now: DateTime<Utc>,
) -> CoreResult<(ChatSession, bool)> {
    let row = sqlx::query_as::<_, UpsertedChatRow>(&format!(
        r#"
        INSERT INTO chats (id, participant_low, participant_high, name_low, name_high, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (participant_low, participant_high)
        DO UPDATE SET participant_low = EXCLUDED.participant_low
        RETURNING {CHAT_COLUMNS}, (xmax = 0) AS inserted
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(pair.low())
    .bind(pair.high())
    .bind(&names[0])
    .bind(&names[1])
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok((row.chat.try_into()?, row.inserted))
}

pub async fn get_chat_by_id(pool: &PgPool, chat_id: Uuid) -> CoreResult<Option<ChatSession>> {
    let row = sqlx::query_as::<_, ChatRow>(&format!(
        "SELECT {CHAT_COLUMNS} FROM chats WHERE id = $1"
    ))
    .bind(chat_id)
    .fetch_optional(pool)
    .await?;

    row.map(ChatSession::try_from).transpose()
}

pub async fn list_chats_for_user(pool: &PgPool, user_id: Uuid) -> CoreResult<Vec<ChatSession>> {
    let rows = sqlx::query_as::<_, ChatRow>(&format!(
        r#"
        SELECT {CHAT_COLUMNS}
        FROM chats
        WHERE participant_low = $1 OR participant_high = $1
        ORDER BY COALESCE(last_message_time, created_at) DESC, id DESC
        "#
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ChatSession::try_from).collect()
}

/// Inserts the message and moves the chat's snapshot in one transaction.
/// Locking the chat row serializes appends per chat, so `seq` order matches
/// commit order and `created_at` never steps backwards.
pub async fn append_message(
    pool: &PgPool,
    message: NewMessage<'_>,
    now: DateTime<Utc>,
) -> CoreResult<(Message, ChatSession)> {
    let mut tx = pool.begin().await?;

    let last_time = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
        "SELECT last_message_time FROM chats WHERE id = $1 FOR UPDATE",
    )
    .bind(message.chat_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| CoreError::not_found(format!("chat {}", message.chat_id)))?;

    let created_at = last_time.filter(|t| *t > now).unwrap_or(now);

    let stored = sqlx::query_as::<_, Message>(&format!(
        r#"
        INSERT INTO messages (id, chat_id, sender_id, sender_name, text, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {MESSAGE_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(message.chat_id)
    .bind(message.sender_id)
    .bind(message.sender_name)
    .bind(message.text)
    .bind(created_at)
    .fetch_one(&mut *tx)
    .await?;

    let chat = sqlx::query_as::<_, ChatRow>(&format!(
        r#"
        UPDATE chats
        SET last_message = $2, last_message_time = $3
        WHERE id = $1
        RETURNING {CHAT_COLUMNS}
        "#
    ))
    .bind(message.chat_id)
    .bind(&stored.text)
    .bind(stored.created_at)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok((stored, chat.try_into()?))
}

pub async fn get_messages_after(
    pool: &PgPool,
    chat_id: Uuid,
    after_seq: Option<i64>,
) -> CoreResult<Vec<Message>> {
    let messages = sqlx::query_as::<_, Message>(&format!(
        r#"
        SELECT {MESSAGE_COLUMNS}
        FROM messages
        WHERE chat_id = $1 AND ($2::bigint IS NULL OR seq > $2)
        ORDER BY created_at ASC, seq ASC
        "#
    ))
    .bind(chat_id)
    .bind(after_seq)
    .fetch_all(pool)
    .await?;

    Ok(messages)
}

pub async fn get_latest_message_seq(pool: &PgPool, chat_id: Uuid) -> CoreResult<Option<i64>> {
    let seq = sqlx::query_scalar::<_, Option<i64>>(
        "SELECT MAX(seq) FROM messages WHERE chat_id = $1",
    )
    .bind(chat_id)
    .fetch_one(pool)
    .await?;

    Ok(seq)
}
