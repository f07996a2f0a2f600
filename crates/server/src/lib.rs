pub mod audit;
pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod health;
pub mod pipeline;
pub mod store;
pub mod templates;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::bootstrap::AppState;

/// The full HTTP surface of spec.md §6: `/health` plus the 8 `/api/v1/*`
/// endpoints, mounted against one shared [`AppState`].
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(handlers::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
