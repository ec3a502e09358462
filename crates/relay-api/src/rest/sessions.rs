use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ApiError, ApiErrorResponse};
use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> Json<Vec<relay_core::SessionView>> {
    Json(state.registry.list_sessions().await)
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<relay_core::SessionView>, ApiErrorResponse> {
    let id = relay_core::validate_session_id(&id)?;
    state
        .registry
        .get_session(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiErrorResponse::new(axum::http::StatusCode::NOT_FOUND, ApiError::not_found("session")))
}

pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let initial = state.registry.list_sessions().await;
    let initial_event = Event::default()
        .event("sessions")
        .json_data(&initial)
        .unwrap_or_else(|_| Event::default().event("sessions").data("[]"));

    let changes = state.discovery.subscribe();
    let registry = state.registry.clone();
    let updates = stream::unfold(changes, move |mut changes| {
        let registry = registry.clone();
        async move {
            loop {
                match changes.recv().await {
                    Ok(()) => {
                        let views = registry.list_sessions().await;
                        let event = Event::default()
                            .event("sessions")
                            .json_data(&views)
                            .unwrap_or_else(|_| Event::default().event("sessions").data("[]"));
                        return Some((Ok(event), changes));
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
                }
            }
        }
    });

    let full = stream::once(async move { Ok(initial_event) }).chain(updates);

    Sse::new(full).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    )
}

#[derive(Serialize)]
pub struct AttachResponse {
    #[serde(rename = "wsUrl")]
    ws_url: String,
    #[serde(rename = "tmuxSession")]
    tmux_session: String,
    existed: bool,
    #[serde(rename = "attachToken")]
    attach_token: String,
}

pub async fn attach(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AttachResponse>, ApiErrorResponse> {
    let id = relay_core::validate_session_id(&id)?;

    if !state.registry.has_session(id).await {
        return Err(ApiErrorResponse::new(
            axum::http::StatusCode::NOT_FOUND,
            ApiError::not_found("session"),
        ));
    }

    if !state.rate_limiter.check(id).await {
        return Err(ApiErrorResponse::new(
            axum::http::StatusCode::TOO_MANY_REQUESTS,
            ApiError::rate_limited(),
        ));
    }

    let project_path = state.registry.project_path_of(id).await;
    let locks = state.locks.clone();
    let mux = state.mux.clone();
    let result = locks
        .acquire(id, || async move {
            let project_path = project_path.filter(|p| !p.is_empty()).map(PathBuf::from);
            mux.attach(id, project_path.as_deref()).await
        })
        .await?;

    let attach_token = state.auth.generate(id).await;
    Ok(Json(AttachResponse {
        ws_url: format!("/terminal/{id}"),
        tmux_session: result.window_name,
        existed: result.existed,
        attach_token,
    }))
}

#[derive(Serialize)]
pub struct KillResponse {
    success: bool,
    existed: bool,
}

pub async fn kill(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<KillResponse>, ApiErrorResponse> {
    let id = relay_core::validate_session_id(&id)?;
    let owned = state.mux.list_owned().await;
    let Some((_, window)) = owned.into_iter().find(|(owned_id, _)| *owned_id == id) else {
        return Ok(Json(KillResponse {
            success: true,
            existed: false,
        }));
    };
    state.mux.kill_session(&window.name).await?;
    Ok(Json(KillResponse {
        success: true,
        existed: true,
    }))
}

#[derive(Serialize)]
pub struct KillAllResponse {
    success: bool,
    killed: usize,
}

pub async fn kill_all(State(state): State<AppState>) -> Json<KillAllResponse> {
    let killed = state.mux.kill_all_owned().await;
    Json(KillAllResponse {
        success: true,
        killed,
    })
}

#[derive(Deserialize)]
pub struct NewSessionRequest {
    #[serde(rename = "projectPath")]
    project_path: String,
}

pub async fn new_session(
    State(state): State<AppState>,
    Json(body): Json<NewSessionRequest>,
) -> Result<Json<AttachResponse>, ApiErrorResponse> {
    let validated = state.roots.validate(std::path::Path::new(&body.project_path))?;
    let (session_id, window_name) = state.mux.create_new(&validated).await?;
    let attach_token = state.auth.generate(session_id).await;
    Ok(Json(AttachResponse {
        ws_url: format!("/terminal/{session_id}"),
        tmux_session: window_name,
        existed: false,
        attach_token,
    }))
}
