//! Converge Server - sync hub for local-first replicas.
//!
//! Each sync group is a replica held in memory and persisted to PostgreSQL.
//! Clients localize divergence against a group's merkle trie over HTTP and
//! subscribe to change notifications over WebSocket.

mod auth;
mod config;
mod db;
mod error;
mod groups;
mod handlers;
mod routes;
mod websocket;

use crate::config::Config;
use crate::db::Pool;
use crate::groups::GroupRegistry;
use crate::websocket::ConnectionManager;
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub config: Arc<Config>,
    pub groups: Arc<GroupRegistry>,
    pub conn_manager: Arc<ConnectionManager>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "converge_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Converge Server on {}:{}", config.host, config.port);

    let pool = db::create_pool(&config.database_url).await?;

    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    let state = AppState {
        pool,
        groups: Arc::new(GroupRegistry::new(config.clock_config())),
        config: Arc::new(config.clone()),
        conn_manager: ConnectionManager::new_shared(),
    };

    let app = Router::new()
        .merge(routes::create_routes())
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// State backed by a pool that never connects, for handler tests that stay
/// on groups already held in memory.
#[cfg(test)]
pub(crate) fn test_state(auth_secret: Option<&str>) -> AppState {
    let config = Config::from_lookup(|key: &str| match key {
        "DATABASE_URL" => Some("postgres://localhost/converge_test".to_string()),
        "AUTH_SECRET" => auth_secret.map(str::to_string),
        _ => None,
    })
    .unwrap();

    AppState {
        pool: sqlx::postgres::PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap(),
        groups: Arc::new(GroupRegistry::new(config.clock_config())),
        config: Arc::new(config),
        conn_manager: ConnectionManager::new_shared(),
    }
}
