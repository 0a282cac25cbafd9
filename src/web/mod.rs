use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    http::Method,
    routing::get,
};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::dispatch::service::DispatchService;

pub mod auth;
pub mod error;
pub mod routes;

pub struct AppState {
    pub pool: SqlitePool,
    pub dispatch: Arc<DispatchService>,
    pub config: Config,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check_handler))
        .merge(routes::push_routes::router())
        .nest("/api/message", routes::message_routes::router())
        .with_state(state)
        .layer(cors)
}

pub async fn run_http_server(
    state: Arc<AppState>,
    http_addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_router(state);
    info!("HTTP server listening on {http_addr}");
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
