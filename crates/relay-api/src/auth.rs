use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use rand::RngCore;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ApiError, ApiErrorResponse};

const ATTACH_TOKEN_TTL: Duration = Duration::from_secs(30);

struct AttachToken {
    session_id: Uuid,
    expires_at: Instant,
    used: bool,
}

/// Validates the pre-shared key on every authenticated route and mints the
/// single-use, 30s tokens that authorize a WebSocket attach.
pub struct AuthState {
    psk: String,
    attach_tokens: RwLock<HashMap<String, AttachToken>>,
}

impl AuthState {
    pub fn new(psk: String) -> Self {
        Self {
            psk,
            attach_tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Constant-time comparison of the bearer credential against the
    /// configured PSK. Length is compared first (leaks only length, same as
    /// any fixed-format secret), then every byte is compared regardless of
    /// an early mismatch.
    pub fn authorize(&self, bearer: &str) -> bool {
        constant_time_eq(bearer.as_bytes(), self.psk.as_bytes())
    }

    /// Mints a 32-byte, base64url-encoded attach token bound to `session_id`.
    pub async fn generate(&self, session_id: Uuid) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            bytes,
        );
        self.attach_tokens.write().await.insert(
            token.clone(),
            AttachToken {
                session_id,
                expires_at: Instant::now() + ATTACH_TOKEN_TTL,
                used: false,
            },
        );
        token
    }

    /// Atomic lookup-and-mark-used. A session id mismatch, missing token,
    /// expiry, or reuse are all rejected; mismatched/reused entries are left
    /// in place for the periodic sweep rather than removed eagerly.
    pub async fn consume(&self, token: &str, session_id: Uuid) -> Result<(), ConsumeError> {
        let mut tokens = self.attach_tokens.write().await;
        let Some(entry) = tokens.get_mut(token) else {
            return Err(ConsumeError::Invalid);
        };
        if entry.used {
            return Err(ConsumeError::AlreadyUsed);
        }
        if Instant::now() >= entry.expires_at {
            return Err(ConsumeError::Expired);
        }
        if entry.session_id != session_id {
            return Err(ConsumeError::Mismatch);
        }
        entry.used = true;
        tokens.remove(token);
        Ok(())
    }

    /// Removes expired entries. Intended to run on a periodic timer.
    pub async fn sweep(&self) {
        let now = Instant::now();
        self.attach_tokens
            .write()
            .await
            .retain(|_, entry| entry.expires_at > now);
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConsumeError {
    Invalid,
    Expired,
    Mismatch,
    AlreadyUsed,
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub fn extract_bearer(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

pub async fn auth_middleware(
    state: axum::extract::State<crate::state::AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiErrorResponse> {
    let bearer = extract_bearer(req.headers())
        .ok_or_else(|| ApiErrorResponse::new(StatusCode::UNAUTHORIZED, ApiError::unauthorized()))?;

    if !state.auth.authorize(&bearer) {
        return Err(ApiErrorResponse::new(
            StatusCode::UNAUTHORIZED,
            ApiError::unauthorized(),
        ));
    }

    Ok(next.run(req).await)
}

/// Loads the PSK from `psk_path`, generating and persisting (mode 0600) a
/// fresh one if absent.
pub fn load_or_create_psk(psk_path: &std::path::Path) -> anyhow::Result<String> {
    if let Ok(existing) = std::fs::read_to_string(psk_path) {
        let psk = existing.trim().to_string();
        if !psk.is_empty() {
            return Ok(psk);
        }
    }
    let psk = generate_psk();
    persist_psk(psk_path, &psk)?;
    Ok(psk)
}

/// Generates and persists a fresh PSK, overwriting any existing one.
pub fn rotate_psk(psk_path: &std::path::Path) -> anyhow::Result<String> {
    let psk = generate_psk();
    persist_psk(psk_path, &psk)?;
    Ok(psk)
}

fn generate_psk() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

fn persist_psk(psk_path: &std::path::Path, psk: &str) -> anyhow::Result<()> {
    std::fs::write(psk_path, psk)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(psk_path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_bytes() {
        assert!(constant_time_eq(b"secret", b"secret"));
    }

    #[test]
    fn constant_time_eq_rejects_different_length() {
        assert!(!constant_time_eq(b"short", b"longer-value"));
    }

    #[test]
    fn constant_time_eq_rejects_single_byte_difference() {
        assert!(!constant_time_eq(b"secretA", b"secretB"));
    }

    #[test]
    fn authorize_accepts_configured_psk() {
        let auth = AuthState::new("the-psk".to_string());
        assert!(auth.authorize("the-psk"));
        assert!(!auth.authorize("wrong"));
    }

    #[tokio::test]
    async fn generate_then_consume_succeeds_once() {
        let auth = AuthState::new("psk".to_string());
        let id = Uuid::new_v4();
        let token = auth.generate(id).await;
        assert!(auth.consume(&token, id).await.is_ok());
        assert_eq!(auth.consume(&token, id).await, Err(ConsumeError::Invalid));
    }

    #[tokio::test]
    async fn consume_rejects_mismatched_session() {
        let auth = AuthState::new("psk".to_string());
        let id = Uuid::new_v4();
        let token = auth.generate(id).await;
        assert_eq!(
            auth.consume(&token, Uuid::new_v4()).await,
            Err(ConsumeError::Mismatch)
        );
    }

    #[tokio::test]
    async fn consume_rejects_unknown_token() {
        let auth = AuthState::new("psk".to_string());
        assert_eq!(
            auth.consume("nonexistent", Uuid::new_v4()).await,
            Err(ConsumeError::Invalid)
        );
    }

    #[tokio::test]
    async fn sweep_removes_expired_entries() {
        let auth = AuthState::new("psk".to_string());
        let id = Uuid::new_v4();
        let token = auth.generate(id).await;
        {
            let mut tokens = auth.attach_tokens.write().await;
            tokens.get_mut(&token).unwrap().expires_at = Instant::now() - Duration::from_secs(1);
        }
        auth.sweep().await;
        assert_eq!(auth.consume(&token, id).await, Err(ConsumeError::Invalid));
    }

    #[test]
    fn extract_bearer_parses_header() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("authorization", "Bearer abc123".parse().unwrap());
        assert_eq!(extract_bearer(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn extract_bearer_rejects_non_bearer_scheme() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("authorization", "Basic abc123".parse().unwrap());
        assert_eq!(extract_bearer(&headers), None);
    }

    #[test]
    fn load_or_create_psk_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("psk");
        let first = load_or_create_psk(&path).unwrap();
        let second = load_or_create_psk(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rotate_psk_changes_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("psk");
        let first = load_or_create_psk(&path).unwrap();
        let second = rotate_psk(&path).unwrap();
        assert_ne!(first, second);
        assert_eq!(load_or_create_psk(&path).unwrap(), second);
    }

    #[cfg(unix)]
    #[test]
    fn persisted_psk_has_mode_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("psk");
        load_or_create_psk(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
