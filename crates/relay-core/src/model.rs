use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of the most recent user/assistant message seen in a session's
/// log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Unknown,
}

/// Session metadata harvested from the on-disk conversation log. Immutable
/// per scan; a new scan produces a new value rather than mutating in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub id: Uuid,
    pub project_hash: String,
    pub project_path: String,
    pub last_message_preview: String,
    pub last_message_role: MessageRole,
    pub timestamp: DateTime<Utc>,
    pub cli_version: Option<String>,
}

/// Liveness of a session's multiplexer window, from the mux manager's
/// cached snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TmuxStatus {
    Active,
    Detached,
    None,
}

impl TmuxStatus {
    /// Fallback label used when `ClaudeState` cannot be derived from the
    /// last message role. Preserves parity with clients that previously
    /// rendered `tmuxStatus` directly in that case.
    pub fn fallback_label(self) -> &'static str {
        match self {
            TmuxStatus::Active => "active",
            TmuxStatus::Detached => "detached",
            TmuxStatus::None => "idle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaudeState {
    Waiting,
    Thinking,
    Idle,
    Unknown,
}

impl ClaudeState {
    pub fn derive(role: MessageRole, tmux_status: TmuxStatus) -> ClaudeState {
        if tmux_status == TmuxStatus::None {
            return ClaudeState::Idle;
        }
        match role {
            MessageRole::Assistant => ClaudeState::Waiting,
            MessageRole::User => ClaudeState::Thinking,
            MessageRole::Unknown => ClaudeState::Unknown,
        }
    }

    /// The label to surface to clients: falls back to the window's tmux
    /// status when the state itself is `Unknown`, matching existing client
    /// rendering behavior.
    pub fn label(self, tmux_status: TmuxStatus) -> String {
        match self {
            ClaudeState::Unknown => tmux_status.fallback_label().to_string(),
            ClaudeState::Waiting => "waiting".to_string(),
            ClaudeState::Thinking => "thinking".to_string(),
            ClaudeState::Idle => "idle".to_string(),
        }
    }
}

/// A multiplexer window owned by the mux manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowDescriptor {
    pub name: String,
    pub attached: bool,
    pub created: DateTime<Utc>,
}

/// Composed, per-request view returned to clients: metadata plus the
/// enrichment derived from the mux manager and terminal bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub id: Uuid,
    pub project_hash: String,
    pub project_path: String,
    pub last_message_preview: String,
    pub last_message_role: MessageRole,
    pub timestamp: DateTime<Utc>,
    pub cli_version: Option<String>,
    pub tmux_status: TmuxStatus,
    pub has_active_connection: bool,
    pub claude_state: String,
}

impl SessionView {
    pub fn build(
        metadata: &SessionMetadata,
        tmux_status: TmuxStatus,
        has_active_connection: bool,
    ) -> SessionView {
        let state = ClaudeState::derive(metadata.last_message_role, tmux_status);
        SessionView {
            id: metadata.id,
            project_hash: metadata.project_hash.clone(),
            project_path: metadata.project_path.clone(),
            last_message_preview: metadata.last_message_preview.clone(),
            last_message_role: metadata.last_message_role,
            timestamp: metadata.timestamp,
            cli_version: metadata.cli_version.clone(),
            tmux_status,
            has_active_connection,
            claude_state: state.label(tmux_status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_state_none_tmux_is_always_idle() {
        assert_eq!(
            ClaudeState::derive(MessageRole::Assistant, TmuxStatus::None),
            ClaudeState::Idle
        );
        assert_eq!(
            ClaudeState::derive(MessageRole::User, TmuxStatus::None),
            ClaudeState::Idle
        );
    }

    #[test]
    fn claude_state_maps_role_when_window_exists() {
        assert_eq!(
            ClaudeState::derive(MessageRole::Assistant, TmuxStatus::Active),
            ClaudeState::Waiting
        );
        assert_eq!(
            ClaudeState::derive(MessageRole::User, TmuxStatus::Detached),
            ClaudeState::Thinking
        );
        assert_eq!(
            ClaudeState::derive(MessageRole::Unknown, TmuxStatus::Active),
            ClaudeState::Unknown
        );
    }

    #[test]
    fn unknown_state_falls_back_to_tmux_label() {
        assert_eq!(
            ClaudeState::Unknown.label(TmuxStatus::Detached),
            "detached"
        );
        assert_eq!(ClaudeState::Waiting.label(TmuxStatus::Active), "waiting");
    }
}
