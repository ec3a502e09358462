use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Deserialize;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct TerminalQuery {
    token: String,
    #[serde(default = "default_cols")]
    cols: u16,
    #[serde(default = "default_rows")]
    rows: u16,
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    24
}

pub async fn terminal_ws_upgrade(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TerminalQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_terminal_socket(state, id, query, socket))
}

async fn handle_terminal_socket(state: AppState, raw_id: String, query: TerminalQuery, mut socket: WebSocket) {
    let session_id = match relay_core::validate_session_id(&raw_id) {
        Ok(id) => id,
        Err(_) => {
            close_with(&mut socket, 4400, "invalid session id").await;
            return;
        }
    };

    if state.auth.consume(&query.token, session_id).await.is_err() {
        close_with(&mut socket, 4401, "invalid or expired attach token").await;
        return;
    }

    let owned = state.mux.list_owned().await;
    let Some((_, window)) = owned.into_iter().find(|(id, _)| *id == session_id) else {
        close_with(&mut socket, 1011, "no multiplexer window for this session").await;
        return;
    };

    state
        .bridge
        .attach(session_id, window.name, socket, query.cols, query.rows)
        .await;
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}
