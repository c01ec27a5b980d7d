use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::{profiles::ProfileRow, PresencePatch, Profile, ProfileFilter};

const PROFILE_COLUMNS: &str = "id, name, role, gender, languages, latitude, longitude, \
     is_available, is_online, last_seen, created_at";

fn into_profiles(rows: Vec<ProfileRow>) -> CoreResult<Vec<Profile>> {
    rows.into_iter().map(Profile::try_from).collect()
}

pub async fn create_profile(pool: &PgPool, profile: &Profile) -> CoreResult<Profile> {
    let row = sqlx::query_as::<_, ProfileRow>(&format!(
        r#"
        INSERT INTO profiles (id, name, role, gender, languages, latitude, longitude,
                              is_available, is_online, last_seen, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (id) DO NOTHING
        RETURNING {PROFILE_COLUMNS}
        "#
    ))
    .bind(profile.id)
    .bind(&profile.name)
    .bind(profile.role.as_str())
    .bind(&profile.gender)
    .bind(&profile.languages)
    .bind(profile.location.map(|l| l.latitude))
    .bind(profile.location.map(|l| l.longitude))
    .bind(profile.is_available)
    .bind(profile.is_online)
    .bind(profile.last_seen)
    .bind(profile.created_at)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => row.try_into(),
        None => Err(CoreError::validation(format!(
            "profile {} already exists",
            profile.id
        ))),
    }
}

pub async fn get_profile_by_id(pool: &PgPool, user_id: Uuid) -> CoreResult<Option<Profile>> {
    let row = sqlx::query_as::<_, ProfileRow>(&format!(
        "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.map(Profile::try_from).transpose()
}

pub async fn list_profiles(pool: &PgPool, filter: &ProfileFilter) -> CoreResult<Vec<Profile>> {
    let rows = sqlx::query_as::<_, ProfileRow>(&format!(
        r#"
        SELECT {PROFILE_COLUMNS}
        FROM profiles
        WHERE ($1::uuid IS NULL OR id = $1)
          AND ($2::text IS NULL OR role = $2)
        ORDER BY created_at ASC, id ASC
        "#
    ))
    .bind(filter.user_id)
    .bind(filter.role.map(|r| r.as_str()))
    .fetch_all(pool)
    .await?;

    into_profiles(rows)
}

/// Single-statement update of one presence field. Seekers can never become
/// available; the guard lives in SQL so it holds for every writer.
pub async fn patch_profile(
    pool: &PgPool,
    user_id: Uuid,
    patch: PresencePatch,
    now: DateTime<Utc>,
) -> CoreResult<Profile> {
    let row = match patch {
        PresencePatch::Online(online) => {
            sqlx::query_as::<_, ProfileRow>(&format!(
                "UPDATE profiles SET is_online = $2, last_seen = $3 WHERE id = $1 \
                 RETURNING {PROFILE_COLUMNS}"
            ))
            .bind(user_id)
            .bind(online)
            .bind(now)
            .fetch_optional(pool)
            .await?
        }
        PresencePatch::Available(available) => {
            sqlx::query_as::<_, ProfileRow>(&format!(
                "UPDATE profiles SET is_available = ($2 AND role = 'helper'), last_seen = $3 \
                 WHERE id = $1 RETURNING {PROFILE_COLUMNS}"
            ))
            .bind(user_id)
            .bind(available)
            .bind(now)
            .fetch_optional(pool)
            .await?
        }
        PresencePatch::Location(location) => {
            sqlx::query_as::<_, ProfileRow>(&format!(
                "UPDATE profiles SET latitude = $2, longitude = $3, last_seen = $4 \
                 WHERE id = $1 RETURNING {PROFILE_COLUMNS}"
            ))
            .bind(user_id)
            .bind(location.map(|l| l.latitude))
            .bind(location.map(|l| l.longitude))
            .bind(now)
            .fetch_optional(pool)
            .await?
        }
    };

    row.ok_or_else(|| CoreError::not_found(format!("profile {}", user_id)))?
        .try_into()
}

pub async fn mark_stale_offline(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> CoreResult<Vec<Profile>> {
    let rows = sqlx::query_as::<_, ProfileRow>(&format!(
        r#"
        UPDATE profiles
        SET is_online = FALSE, last_seen = $2
        WHERE is_online = TRUE AND last_seen < $1
        RETURNING {PROFILE_COLUMNS}
        "#
    ))
    .bind(cutoff)
    .bind(now)
    .fetch_all(pool)
    .await?;

    into_profiles(rows)
}
