use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use relay_pty::PtySession;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

const OUTPUT_BUFFER_CAP: usize = 1024 * 1024;
const BATCH_INTERVAL: Duration = Duration::from_millis(16);
const BACKPRESSURE_THRESHOLD: usize = 64 * 1024;
const INITIAL_FLUSH_SUPPRESSION: Duration = Duration::from_millis(500);
const ORPHAN_REAP_INTERVAL: Duration = Duration::from_secs(60);
const KILL_ESCALATION: Duration = Duration::from_secs(5);
const CONTROL_WIRE_VERSION: u8 = 1;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ControlFrame {
    Resize { cols: u16, rows: u16 },
}

enum OutFrame {
    Data(Vec<u8>),
    Text(String),
    Ping,
    Close(u16, &'static str),
}

struct ActiveTerminal {
    pty: Arc<PtySession>,
    cleaned_up: AtomicBool,
}

/// Bridges a detached multiplexer window's pseudo-terminal to a WebSocket:
/// spawn, batch output, apply backpressure, answer heartbeats, and clean up
/// exactly once regardless of how many paths trigger it.
pub struct TerminalBridge {
    active: RwLock<HashMap<Uuid, Arc<ActiveTerminal>>>,
    attached_ids: Arc<std::sync::RwLock<HashSet<Uuid>>>,
    mux_binary: String,
    heartbeat_interval: Duration,
    max_missed_pongs: u32,
}

impl TerminalBridge {
    pub fn new(mux_binary: impl Into<String>, heartbeat_interval_secs: u64, max_missed_pongs: u32) -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            attached_ids: Arc::new(std::sync::RwLock::new(HashSet::new())),
            mux_binary: mux_binary.into(),
            heartbeat_interval: Duration::from_secs(heartbeat_interval_secs.max(1)),
            max_missed_pongs,
        }
    }

    /// A synchronous predicate suitable for `MuxManager::set_active_check`:
    /// "is this session id currently bound to a live terminal connection?"
    pub fn active_check(&self) -> impl Fn(Uuid) -> bool + Send + Sync + 'static {
        let ids = self.attached_ids.clone();
        move |id| ids.read().unwrap_or_else(|e| e.into_inner()).contains(&id)
    }

    pub async fn has_active(&self, session_id: Uuid) -> bool {
        self.active.read().await.contains_key(&session_id)
    }

    /// Spawns a PTY running `<mux> attach-session -t <window_name>` and
    /// bridges it to `socket` until either side closes. Rejects with close
    /// code 4409 if another live terminal already owns this session id.
    pub async fn attach(
        self: &Arc<Self>,
        session_id: Uuid,
        window_name: String,
        mut socket: WebSocket,
        cols: u16,
        rows: u16,
    ) {
        {
            let mut active = self.active.write().await;
            if let Some(existing) = active.get(&session_id) {
                if !existing.cleaned_up.load(Ordering::SeqCst) {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: 4409,
                            reason: "already has an active terminal".into(),
                        })))
                        .await;
                    return;
                }
                active.remove(&session_id);
            }
        }

        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        let pty = match PtySession::spawn(
            session_id,
            &self.mux_binary,
            &["attach-session", "-t", &window_name],
            &home,
            vec![("TERM".to_string(), "xterm-256color".to_string())],
            cols,
            rows,
        ) {
            Ok(pty) => Arc::new(pty),
            Err(err) => {
                tracing::warn!(session_id = %session_id, error = %err, "failed to spawn terminal PTY");
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: 1011,
                        reason: err.to_string().into(),
                    })))
                    .await;
                return;
            }
        };

        // Cosmetic; a tmux-class status bar in an attached window looks
        // wrong over a client's own chrome. Ignore failures.
        let _ = tokio::process::Command::new(&self.mux_binary)
            .args(["set-option", "-t", &window_name, "status", "off"])
            .output()
            .await;

        let entry = Arc::new(ActiveTerminal {
            pty: pty.clone(),
            cleaned_up: AtomicBool::new(false),
        });
        self.active.write().await.insert(session_id, entry.clone());
        self.attached_ids
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id);

        self.run_pump(session_id, entry, socket, pty, cols, rows).await;
    }

    async fn run_pump(
        &self,
        session_id: Uuid,
        entry: Arc<ActiveTerminal>,
        socket: WebSocket,
        pty: Arc<PtySession>,
        cols: u16,
        rows: u16,
    ) {
        let (ws_tx, mut ws_rx) = socket.split();
        let mut output_rx = pty.subscribe();
        let mut exit_rx = pty.subscribe_exit();

        // Initial flush suppression: the assistant CLI repaints its full
        // screen on attach; forwarding that burst at the old size only to
        // resize a moment later produces a visible flash.
        let suppress_until = Instant::now() + INITIAL_FLUSH_SUPPRESSION;
        while Instant::now() < suppress_until {
            tokio::select! {
                _ = tokio::time::sleep_until(suppress_until) => break,
                msg = output_rx.recv() => {
                    if msg.is_err() {
                        break;
                    }
                }
            }
        }
        if let Err(err) = pty.resize(cols, rows).await {
            tracing::warn!(session_id = %session_id, error = %err, "post-attach resize failed");
        }

        let pending_bytes = Arc::new(AtomicUsize::new(0));
        let (out_tx, out_rx) = mpsc::unbounded_channel::<OutFrame>();
        let sender = tokio::spawn(run_sender(ws_tx, out_rx, pending_bytes.clone()));

        let ready = serde_json::json!({"type": "ready", "version": CONTROL_WIRE_VERSION}).to_string();
        let _ = out_tx.send(OutFrame::Text(ready));

        let mut buffer: Vec<u8> = Vec::new();
        let mut batch_timer = tokio::time::interval(BATCH_INTERVAL);
        let mut heartbeat_timer = tokio::time::interval(self.heartbeat_interval);
        let mut missed_pongs: u32 = 0;

        'pump: loop {
            tokio::select! {
                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(Message::Binary(bytes))) => {
                            if let Err(err) = pty.write(&bytes).await {
                                tracing::warn!(session_id = %session_id, error = %err, "pty write failed");
                            }
                        }
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ControlFrame>(&text) {
                                Ok(ControlFrame::Resize { cols, rows }) => {
                                    if let Err(err) = pty.resize(cols, rows).await {
                                        tracing::warn!(session_id = %session_id, error = %err, "resize failed");
                                    }
                                }
                                Err(err) => {
                                    tracing::warn!(session_id = %session_id, error = %err, "dropping unrecognized terminal control frame");
                                }
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            missed_pongs = 0;
                        }
                        Some(Ok(Message::Close(_))) | None => break 'pump,
                        Some(Ok(_)) => {}
                        Some(Err(_)) => break 'pump,
                    }
                }
                output = output_rx.recv() => {
                    match output {
                        Ok(data) => {
                            buffer.extend_from_slice(&data);
                            if buffer.len() > OUTPUT_BUFFER_CAP {
                                let overflow = buffer.len() - OUTPUT_BUFFER_CAP;
                                buffer.drain(0..overflow);
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break 'pump,
                    }
                }
                exit = exit_rx.recv() => {
                    if let Ok(exit_code) = exit {
                        if !buffer.is_empty() {
                            let frame = std::mem::take(&mut buffer);
                            pending_bytes.fetch_add(frame.len(), Ordering::SeqCst);
                            let _ = out_tx.send(OutFrame::Data(frame));
                        }
                        let exit_envelope = serde_json::json!({
                            "type": "exit",
                            "version": CONTROL_WIRE_VERSION,
                            "exitCode": exit_code,
                        }).to_string();
                        let _ = out_tx.send(OutFrame::Text(exit_envelope));
                        let _ = out_tx.send(OutFrame::Close(1000, "Terminal session ended"));
                        break 'pump;
                    }
                }
                _ = batch_timer.tick() => {
                    if buffer.is_empty() {
                        continue;
                    }
                    if pending_bytes.load(Ordering::SeqCst) > BACKPRESSURE_THRESHOLD {
                        // Backpressure: leave buffer intact, retry next tick.
                        continue;
                    }
                    let frame = std::mem::take(&mut buffer);
                    pending_bytes.fetch_add(frame.len(), Ordering::SeqCst);
                    if out_tx.send(OutFrame::Data(frame)).is_err() {
                        break 'pump;
                    }
                }
                _ = heartbeat_timer.tick() => {
                    if missed_pongs >= self.max_missed_pongs {
                        tracing::warn!(session_id = %session_id, "terminal heartbeat timed out");
                        break 'pump;
                    }
                    if out_tx.send(OutFrame::Ping).is_err() {
                        break 'pump;
                    }
                    missed_pongs += 1;
                }
            }
        }

        drop(out_tx);
        let _ = sender.await;
        self.cleanup(session_id, &entry).await;
    }

    /// Idempotent: guarded by `cleaned_up` and a check that the map still
    /// points at this exact entry (a stale call for a since-replaced entry
    /// is a no-op).
    async fn cleanup(&self, session_id: Uuid, entry: &Arc<ActiveTerminal>) {
        if entry.cleaned_up.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut active = self.active.write().await;
            if let Some(current) = active.get(&session_id) {
                if Arc::ptr_eq(current, entry) {
                    active.remove(&session_id);
                }
            }
        }
        self.attached_ids
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&session_id);

        let _ = entry.pty.kill().await;
        wait_for_exit_with_escalation(&entry.pty).await;
    }

    /// Every 60s: clean up any entry whose underlying PTY process has
    /// already exited but whose map entry survived (e.g. a task that
    /// panicked before reaching its own cleanup call).
    pub async fn reap_orphans(&self) {
        let stale: Vec<(Uuid, Arc<ActiveTerminal>)> = self
            .active
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.pty.is_stopped())
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        for (id, entry) in stale {
            self.cleanup(id, &entry).await;
        }
    }

    pub fn reap_interval() -> Duration {
        ORPHAN_REAP_INTERVAL
    }

    /// Cleans up every active terminal in parallel and waits for
    /// completion; used during graceful shutdown.
    pub async fn stop(&self) {
        let entries: Vec<(Uuid, Arc<ActiveTerminal>)> = self
            .active
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        let cleanups = entries
            .into_iter()
            .map(|(id, entry)| async move { self.cleanup(id, &entry).await });
        futures::future::join_all(cleanups).await;
    }
}

async fn run_sender(
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::UnboundedReceiver<OutFrame>,
    pending_bytes: Arc<AtomicUsize>,
) {
    while let Some(frame) = out_rx.recv().await {
        match frame {
            OutFrame::Data(bytes) => {
                let len = bytes.len();
                if ws_tx.send(Message::Binary(bytes.into())).await.is_err() {
                    break;
                }
                pending_bytes.fetch_sub(len, Ordering::SeqCst);
            }
            OutFrame::Text(text) => {
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            OutFrame::Ping => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            OutFrame::Close(code, reason) => {
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        }
    }
    let _ = ws_tx.close().await;
}

/// SIGTERM was already sent by the caller; poll for real process exit
/// (tracked by the PTY's reader thread) for up to `KILL_ESCALATION`, then
/// give up and log. `PtySession` speaks one signal severity, so there is no
/// stronger follow-up kill to issue here.
async fn wait_for_exit_with_escalation(pty: &PtySession) {
    let deadline = Instant::now() + KILL_ESCALATION;
    while Instant::now() < deadline {
        if pty.is_stopped() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if !pty.is_stopped() {
        tracing::warn!("terminal PTY still alive after the kill escalation window elapsed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn active_check_reports_attached_sessions() {
        let bridge = TerminalBridge::new("tmux", 20, 3);
        let check = bridge.active_check();
        let id = Uuid::new_v4();
        assert!(!check(id));
        bridge.attached_ids.write().unwrap().insert(id);
        assert!(check(id));
    }

    #[tokio::test]
    async fn has_active_false_when_not_attached() {
        let bridge = TerminalBridge::new("tmux", 20, 3);
        assert!(!bridge.has_active(Uuid::new_v4()).await);
    }
}
