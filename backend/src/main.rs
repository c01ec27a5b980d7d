use axum::http::{HeaderName, HeaderValue, Method};
use axum::Router;
use helpdesk::{
    constants::USER_ID_HEADER,
    db::{migrations::run_migrations, DatabaseConfig, MemoryStore, PgStore, Store},
    get_db_pool,
    handlers::{self, AppState},
    utils, Config,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::init_logging();

    let config = Config::from_env()?;
    let store = open_store(&config).await?;
    let state = AppState::new(store).with_presence_ttl(config.presence_ttl);

    // Catches clients that vanished without closing their connection.
    let sweeper = state
        .presence
        .spawn_sweeper(config.presence_ttl, config.presence_sweep_interval);

    let port = config.port;
    let app = create_router(state, &config);

    let listener = tokio::net::TcpListener::bind(&format!("0.0.0.0:{}", port)).await?;
    tracing::info!("Server running on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    match &config.database_url {
        Some(url) => {
            let pool = get_db_pool(&DatabaseConfig::with_url(url.clone())).await?;
            run_migrations(&pool).await?;
            tracing::info!("Using PostgreSQL store");
            Ok(Arc::new(PgStore::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store; data is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn create_router(state: AppState, config: &Config) -> Router {
    handlers::router(state)
        .layer(create_cors_layer(config))
        .layer(TraceLayer::new_for_http())
}

fn create_cors_layer(config: &Config) -> CorsLayer {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            HeaderName::from_static(USER_ID_HEADER),
        ])
        .allow_credentials(false);

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter_map(|origin| {
            let trimmed = origin.trim();
            if !trimmed.is_empty() {
                trimmed.parse().ok()
            } else {
                None
            }
        })
        .collect();

    if !origins.is_empty() {
        cors = cors.allow_origin(origins);
    } else {
        // Default to permissive for development
        cors = cors.allow_origin(Any);
    }

    cors
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
