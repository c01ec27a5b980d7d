use anyhow::{Context, Result};
use std::env;
use std::time::Duration;
use crate::constants::{
    DEFAULT_PRESENCE_SWEEP_INTERVAL_SECS, DEFAULT_PRESENCE_TTL_SECS, DEFAULT_SERVER_PORT,
};

#[derive(Debug, Clone)]
pub struct Config {
    /// Unset means the in-memory store.
    pub database_url: Option<String>,
    pub port: u16,
    pub presence_ttl: Duration,
    pub presence_sweep_interval: Duration,
    /// Comma-separated CORS origins; unset allows any origin.
    pub allowed_origins: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            port: env::var("PORT")
                .unwrap_or_else(|_| DEFAULT_SERVER_PORT.to_string())
                .parse()
                .unwrap_or(DEFAULT_SERVER_PORT),
            presence_ttl: Duration::from_secs(secs_from_env(
                "PRESENCE_TTL_SECS",
                DEFAULT_PRESENCE_TTL_SECS,
            )?),
            presence_sweep_interval: Duration::from_secs(secs_from_env(
                "PRESENCE_SWEEP_INTERVAL_SECS",
                DEFAULT_PRESENCE_SWEEP_INTERVAL_SECS,
            )?),
            allowed_origins: env::var("ALLOWED_ORIGINS").ok(),
        })
    }
}

fn secs_from_env(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(raw) => {
            let secs: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number of seconds", name))?;
            anyhow::ensure!(secs > 0, "{} must be greater than zero", name);
            Ok(secs)
        }
        Err(_) => Ok(default),
    }
}
