//! Thin axum HTTP/SSE surface implementing the collaborator contract of
//! spec.md §4.10. Translates HTTP requests into `orchestrator_core` calls
//! and forwards event-bus events to SSE subscribers; no rendering, no
//! persistence logic of its own.
//!
//! Grounded on krusty-server's `lib.rs`/`main.rs` split: a `Clone`-able
//! `AppState` bundle of `Arc`s built once at startup, a `Router<AppState>`
//! assembled from one module per resource under `routes/`, CORS + tracing
//! layers applied once in `main.rs`.

use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use orchestrator_core::workflow_orchestrator::WorkflowOrchestrator;
use orchestrator_core::{EventBus, Repositories, ShellApprovalService};

pub mod error;
pub mod routes;
pub mod types;

/// Shared application state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<WorkflowOrchestrator>,
    pub repositories: Arc<Repositories>,
    pub event_bus: Arc<EventBus>,
    pub shell_approval: Arc<ShellApprovalService>,
}

/// Build the full router: CORS + tracing layers around the nested API
/// routes. Kept separate from `main` so integration tests can build a
/// router against an in-memory state without binding a socket.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", routes::api_router())
        .route("/health", axum::routing::get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
