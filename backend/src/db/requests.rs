use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::models::{requests::SupportRequestRow, RequestFilter, RequestStatus, SupportRequest};

const REQUEST_COLUMNS: &str = "id, seeker_id, helper_id, message, status, created_at, updated_at";

pub async fn create_request(pool: &PgPool, request: &SupportRequest) -> CoreResult<SupportRequest> {
    let row = sqlx::query_as::<_, SupportRequestRow>(&format!(
        r#"
        INSERT INTO support_requests (id, seeker_id, helper_id, message, status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {REQUEST_COLUMNS}
        "#
    ))
    .bind(request.id)
    .bind(request.seeker_id)
    .bind(request.helper_id)
    .bind(&request.message)
    .bind(request.status.as_str())
    .bind(request.created_at)
    .bind(request.updated_at)
    .fetch_one(pool)
    .await?;

    row.try_into()
}

pub async fn get_request_by_id(pool: &PgPool, request_id: Uuid) -> CoreResult<Option<SupportRequest>> {
    let row = sqlx::query_as::<_, SupportRequestRow>(&format!(
        "SELECT {REQUEST_COLUMNS} FROM support_requests WHERE id = $1"
    ))
    .bind(request_id)
    .fetch_optional(pool)
    .await?;

    row.map(SupportRequest::try_from).transpose()
}

pub async fn list_requests_for_user(
    pool: &PgPool,
    user_id: Uuid,
    filter: &RequestFilter,
) -> CoreResult<Vec<SupportRequest>> {
    let rows = sqlx::query_as::<_, SupportRequestRow>(&format!(
        r#"
        SELECT {REQUEST_COLUMNS}
        FROM support_requests
        WHERE (seeker_id = $1 OR helper_id = $1)
          AND ($2::text IS NULL OR status = $2)
        ORDER BY created_at DESC, id DESC
        "#
    ))
    .bind(user_id)
    .bind(filter.status.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(SupportRequest::try_from).collect()
}

/// Compare-and-set on the status column. Zero rows means the request is gone
/// or some other writer already moved it.
pub async fn transition_request(
    pool: &PgPool,
    request_id: Uuid,
    from: RequestStatus,
    to: RequestStatus,
    now: DateTime<Utc>,
) -> CoreResult<Option<SupportRequest>> {
    from.ensure_transition(to)?;

    let row = sqlx::query_as::<_, SupportRequestRow>(&format!(
        r#"
        UPDATE support_requests
        SET status = $3, updated_at = $4
        WHERE id = $1 AND status = $2
        RETURNING {REQUEST_COLUMNS}
        "#
    ))
    .bind(request_id)
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(now)
    .fetch_optional(pool)
    .await?;

    row.map(SupportRequest::try_from).transpose()
}
