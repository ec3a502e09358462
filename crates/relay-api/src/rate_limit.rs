use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

const WINDOW: Duration = Duration::from_secs(5);
const SWEEP_AGE: Duration = Duration::from_secs(60);

/// One attach attempt per session id per `WINDOW`. Stale entries are swept
/// by a periodic timer rather than on every check, so a burst of distinct
/// session ids does not pay sweep cost per request.
#[derive(Default)]
pub struct AttachRateLimiter {
    last_attempt: RwLock<HashMap<Uuid, Instant>>,
}

impl AttachRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` and records the attempt if this session is not
    /// currently rate-limited; returns `false` without recording otherwise.
    pub async fn check(&self, session_id: Uuid) -> bool {
        let now = Instant::now();
        let mut last = self.last_attempt.write().await;
        if let Some(previous) = last.get(&session_id) {
            if now.duration_since(*previous) < WINDOW {
                return false;
            }
        }
        last.insert(session_id, now);
        true
    }

    pub async fn sweep(&self) {
        let now = Instant::now();
        self.last_attempt
            .write()
            .await
            .retain(|_, at| now.duration_since(*at) < SWEEP_AGE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_attempt_for_a_session_passes() {
        let limiter = AttachRateLimiter::new();
        assert!(limiter.check(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn second_immediate_attempt_is_rejected() {
        let limiter = AttachRateLimiter::new();
        let id = Uuid::new_v4();
        assert!(limiter.check(id).await);
        assert!(!limiter.check(id).await);
    }

    #[tokio::test]
    async fn distinct_sessions_do_not_interfere() {
        let limiter = AttachRateLimiter::new();
        assert!(limiter.check(Uuid::new_v4()).await);
        assert!(limiter.check(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn sweep_drops_old_entries_allowing_retry() {
        let limiter = AttachRateLimiter::new();
        let id = Uuid::new_v4();
        assert!(limiter.check(id).await);
        {
            let mut last = limiter.last_attempt.write().await;
            last.insert(id, Instant::now() - Duration::from_secs(61));
        }
        limiter.sweep().await;
        assert!(limiter.check(id).await);
    }
}
