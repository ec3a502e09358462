use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("session {0} already has an active terminal connection")]
    SessionAttached(Uuid),
    #[error("assistant process for session {0} is already running on this host")]
    SessionConflict(Uuid),
    #[error("maximum concurrent session count reached")]
    MaxSessions,
    #[error("failed to spawn {mux_binary} window: {detail}")]
    Spawn { mux_binary: String, detail: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
