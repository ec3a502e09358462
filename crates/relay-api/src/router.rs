use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::auth_middleware;
use crate::rest::{projects, sessions, status};
use crate::state::AppState;
use crate::ws::terminal::terminal_ws_upgrade;

/// The daemon expects a trusted local network or an external secure tunnel
/// (no transport encryption, no LAN discovery); the bearer credential is the
/// security boundary, not the request's origin.
pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new().route("/api/status", get(status::status));

    let protected_routes = Router::new()
        .route("/api/sessions", get(sessions::list))
        .route("/api/sessions/stream", get(sessions::stream))
        .route("/api/sessions/kill-all", post(sessions::kill_all))
        .route("/api/sessions/new", post(sessions::new_session))
        .route("/api/sessions/{id}", get(sessions::get))
        .route("/api/sessions/{id}/attach", post(sessions::attach))
        .route("/api/sessions/{id}/kill", post(sessions::kill))
        .route("/api/projects", get(projects::projects))
        .route("/api/directories", get(projects::directories))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let ws_routes = Router::new().route("/terminal/{id}", get(terminal_ws_upgrade));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<axum::body::Body>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri()
                )
            },
        ))
        .with_state(state)
}
