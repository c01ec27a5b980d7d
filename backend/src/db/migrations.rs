use anyhow::{Context, Result};
use sqlx::PgPool;

/// Applies the embedded schema for profiles, support requests, chats and
/// messages.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrator = sqlx::migrate!("./migrations");
    migrator
        .run(pool)
        .await
        .context("failed to apply helpdesk migrations")?;
    tracing::info!("Schema is up to date ({} migrations)", migrator.iter().count());
    Ok(())
}
