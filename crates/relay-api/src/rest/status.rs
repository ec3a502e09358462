use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;

use crate::state::AppState;

static START_TIME: OnceLock<Instant> = OnceLock::new();

pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

#[derive(Serialize)]
struct TmuxSessionEntry {
    #[serde(rename = "sessionId")]
    session_id: uuid::Uuid,
    attached: bool,
    created: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
struct StatusResponse {
    version: &'static str,
    #[serde(rename = "apiVersion")]
    api_version: u32,
    claude: String,
    #[serde(rename = "activeSessions")]
    active_sessions: usize,
    #[serde(rename = "tmuxSessions")]
    tmux_sessions: Vec<TmuxSessionEntry>,
    uptime: u64,
}

/// Unauthenticated reachability probe; the one route exempt from bearer auth.
pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    init_start_time();
    let uptime = START_TIME
        .get()
        .map(|t| t.elapsed().as_secs())
        .unwrap_or(0);

    let owned = state.mux.list_owned().await;
    let tmux_sessions: Vec<TmuxSessionEntry> = owned
        .iter()
        .map(|(id, w)| TmuxSessionEntry {
            session_id: *id,
            attached: w.attached,
            created: w.created,
        })
        .collect();

    let mut active_sessions = 0;
    for (id, _) in &owned {
        if state.bridge.has_active(*id).await {
            active_sessions += 1;
        }
    }

    let response = StatusResponse {
        version: state.version,
        api_version: 1,
        claude: state.config.cli_binary.clone(),
        active_sessions,
        tmux_sessions,
        uptime,
    };
    Json(serde_json::to_value(response).unwrap_or_default())
}
