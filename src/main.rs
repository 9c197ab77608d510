//! Kuamini Threat Protect - Central Management Server
//!
//! The server side of the endpoint protection agent protocol: agents register
//! with a bearer token, heartbeat their liveness and pull policies, and report
//! detections; operators manage the fleet, policies and licenses through the
//! authenticated console API.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     KUAMINI CLOUD                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌────────────┐  ┌─────────────────────────┐ │
//! │  │  Agent    │  │  Console   │  │  Status Sweep           │ │
//! │  │  API      │  │  API (JWT) │  │  (Background Job)       │ │
//! │  │  (Axum)   │  │            │  │                         │ │
//! │  └─────┬─────┘  └─────┬──────┘  └────────────┬────────────┘ │
//! │        └──────────────┼─────────────────────-┘              │
//! │                       ▼                                     │
//! │                ┌─────────────┐                              │
//! │                │ PostgreSQL  │                              │
//! │                └─────────────┘                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod admission;
mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod sweep;
mod token;

use axum::{
    Router,
    routing::{get, post, put, delete},
    middleware as axum_middleware,
};
use tower_http::{
    cors::{CorsLayer, Any},
    trace::TraceLayer,
    compression::CompressionLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use std::net::SocketAddr;

pub use error::{AppError, AppResult};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "kuamini_cloud=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env();
    error::set_debug_errors(!config.is_production());

    tracing::info!("Kuamini management server starting...");
    tracing::info!("Database: {}", config.database_url.split('@').last().unwrap_or("***"));

    // Initialize database pool
    let pool = db::create_pool(&config.database_url).await
        .expect("Failed to create database pool");

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await
        .expect("Failed to run migrations");

    // Build application state
    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
    };

    // Offline detection: heartbeats only ever set 'online', the sweep demotes
    tokio::spawn(sweep::run(pool, config.clone()));

    // Build router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub config: config::Config,
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    // Agent protocol routes (token carried in the request body; no session)
    let agent_routes = Router::new()
        .route("/health", get(handlers::health::check))
        .route("/agent/register", post(handlers::agent::register))
        .route("/agent/heartbeat", post(handlers::agent::heartbeat))
        .route("/agent/threat", post(handlers::agent::report_threat));

    // Console routes (operator JWT auth)
    let console_routes = Router::new()
        // Uninstall is operator-driven, not agent self-service
        .route("/agent/uninstall", post(handlers::agent::uninstall))

        // Endpoints
        .route("/api/v1/endpoints", get(handlers::endpoints::list))
        .route("/api/v1/endpoints/:id", get(handlers::endpoints::get))
        .route("/api/v1/endpoints/:id", delete(handlers::endpoints::delete))

        // Policies
        .route("/api/v1/policies", get(handlers::policies::list))
        .route("/api/v1/policies", post(handlers::policies::create))
        .route("/api/v1/policies/:id", get(handlers::policies::get))
        .route("/api/v1/policies/:id", put(handlers::policies::update))
        .route("/api/v1/policies/:id", delete(handlers::policies::delete))
        .route("/api/v1/policies/:id/assign", post(handlers::policies::assign))
        .route("/api/v1/policies/:id/unassign", post(handlers::policies::unassign))

        // Threats
        .route("/api/v1/threats", get(handlers::threats::list))
        .route("/api/v1/threats/:id", get(handlers::threats::get))
        .route("/api/v1/threats/:id/actions", get(handlers::threats::actions))
        .route("/api/v1/threats/:id/action", post(handlers::threats::apply_action))

        // Account, sub-accounts and license allocation
        .route("/api/v1/account", get(handlers::accounts::get))
        .route("/api/v1/accounts", post(handlers::accounts::create_sub_account))
        .route("/api/v1/accounts/allocations", get(handlers::accounts::list_allocations))
        .route("/api/v1/accounts/allocations", post(handlers::accounts::allocate_licenses))
        .route("/api/v1/accounts/allocations/:id/revoke", post(handlers::accounts::revoke_allocation))

        // Registration tokens
        .route("/api/v1/tokens/issue", post(handlers::tokens::issue))

        // Audit trail
        .route("/api/v1/audit-logs", get(handlers::audit::list))

        // Reports
        .route("/api/v1/reports/summary", get(handlers::reports::summary))

        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_user_auth
        ));

    // Combine all routes
    Router::new()
        .merge(agent_routes)
        .merge(console_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}
