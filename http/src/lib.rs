#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Ingress REST API and WebSocket subscription endpoint for the transfer relayer.

pub mod error;
pub mod ingress;
pub mod ratelimit;
pub mod state;
pub mod ws;

pub use error::ApiError;
pub use state::{AppState, SharedState};

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds the full application router: ingress REST routes, the WebSocket endpoint, and the
/// tracing/CORS layers every request passes through.
#[must_use]
pub fn router(state: SharedState) -> axum::Router {
    ingress::router(state.clone())
        .merge(ws::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
