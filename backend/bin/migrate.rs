use helpdesk::{utils, get_db_pool};
use helpdesk::db::{migrations::run_migrations, DatabaseConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::init_logging();

    let db_config = DatabaseConfig::from_env()?;
    let pool = get_db_pool(&db_config).await?;

    println!("Applying profile, request and chat schema...");
    run_migrations(&pool).await?;
    println!("Schema is up to date.");

    Ok(())
}
