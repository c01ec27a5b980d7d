use anyhow::Result;
use clap::{Arg, Command};
use helpdesk::{
    db::{get_db_pool, DatabaseConfig, PgStore},
    services::PresenceTracker,
    utils::{config::Config, init_logging},
};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let matches = Command::new("presence-sweeper")
        .about("Mark users offline whose heartbeat has lapsed")
        .arg(
            Arg::new("ttl-secs")
                .long("ttl-secs")
                .help("Seconds without a heartbeat before a user counts as offline")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("interval-secs")
                .long("interval-secs")
                .help("Seconds between sweeps")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .help("Run a single sweep and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let config = Config::from_env()?;
    let ttl = matches
        .get_one::<u64>("ttl-secs")
        .map(|s| Duration::from_secs(*s))
        .unwrap_or(config.presence_ttl);
    let every = matches
        .get_one::<u64>("interval-secs")
        .map(|s| Duration::from_secs(*s))
        .unwrap_or(config.presence_sweep_interval);

    // Use DATABASE_PUBLIC_URL if available (for prod access), otherwise DATABASE_URL
    let db_config = match env::var("DATABASE_PUBLIC_URL") {
        Ok(public_url) => {
            info!("Using DATABASE_PUBLIC_URL for database access");
            DatabaseConfig::with_url(public_url)
        }
        Err(_) => DatabaseConfig::from_env()?,
    };
    let pool = get_db_pool(&db_config).await?;
    let tracker = PresenceTracker::new(Arc::new(PgStore::new(pool)));

    info!("🧹 Starting presence sweeper (ttl {:?}, every {:?})", ttl, every);

    if matches.get_flag("once") {
        let swept = tracker.sweep_stale(ttl).await?;
        info!("✅ Single sweep done, {} users marked offline", swept.len());
        return Ok(());
    }

    run_sweeper(tracker, ttl, every).await;
    Ok(())
}

async fn run_sweeper(tracker: PresenceTracker, ttl: Duration, every: Duration) {
    let mut interval = time::interval(every);
    let mut iter_count: usize = 0;

    loop {
        interval.tick().await;
        iter_count += 1;

        match tracker.sweep_stale(ttl).await {
            Ok(swept) => {
                for profile in &swept {
                    info!("💤 {} ({}) went quiet, marked offline", profile.name, profile.id);
                }
            }
            Err(e) => {
                error!("❌ Presence sweep {} failed: {}", iter_count, e);
            }
        }

        // Heartbeat log every ~100 sweeps
        if iter_count % 100 == 0 {
            info!("🔍 Presence sweeper alive after {} sweeps", iter_count);
        }
    }
}
