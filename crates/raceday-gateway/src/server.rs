//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use raceday_notify::NotifyDb;
use raceday_scheduler::SchedulerEngine;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    /// The scheduler engine — task store, handler registry, lifecycle flag.
    pub engine: Arc<SchedulerEngine>,
    /// Notification queue, for observability.
    pub notify: Arc<NotifyDb>,
    pub start_time: std::time::Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    Router::new()
        .route("/api/v1/info", get(super::routes::info))
        .route("/api/v1/tasks", get(super::routes::list_tasks))
        .route("/api/v1/tasks", post(super::routes::create_task))
        .route("/api/v1/tasks/{id}", put(super::routes::update_task))
        .route("/api/v1/tasks/{id}", delete(super::routes::delete_task))
        .route("/api/v1/tasks/{id}/enable", post(super::routes::enable_task))
        .route("/api/v1/tasks/{id}/disable", post(super::routes::disable_task))
        .route(
            "/api/v1/tasks/{id}/executions",
            get(super::routes::task_executions),
        )
        .route("/api/v1/notifications", get(super::routes::list_notifications))
        .route("/api/v1/scheduler/status", get(super::routes::scheduler_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(shared)
}

/// Bind and serve until the process exits.
pub async fn serve(state: AppState, port: u16) -> raceday_core::error::Result<()> {
    let router = build_router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("management gateway listening on http://{addr}");
    axum::serve(listener, router)
        .await
        .map_err(|e| raceday_core::error::RacedayError::Channel(format!("gateway: {e}")))?;
    Ok(())
}
