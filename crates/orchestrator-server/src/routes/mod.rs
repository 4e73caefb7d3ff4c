//! API routes, nested under `/api`.

mod events;
mod sessions;
mod shell_approvals;
mod workflows;

use axum::Router;

use crate::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/workflows", workflows::router())
        .nest("/sessions", sessions::router())
        .nest("/shell-approvals", shell_approvals::router())
        .nest("/events", events::router())
}
