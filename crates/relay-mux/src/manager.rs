use crate::error::MuxError;
use chrono::{DateTime, TimeZone, Utc};
use relay_core::WindowDescriptor;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Signal, System};
use tokio::process::Command;
use tokio::sync::RwLock;
use uuid::Uuid;

const CACHE_TTL: Duration = Duration::from_secs(10);
const REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Result of `attach`: whether a fresh window was spawned or an existing one
/// was adopted.
#[derive(Debug, Clone)]
pub struct AttachResult {
    pub window_name: String,
    pub existed: bool,
}

struct CachedWindows {
    fetched_at: Instant,
    windows: Vec<WindowDescriptor>,
}

/// Manages detached multiplexer windows backing each session: lifecycle
/// (create/adopt/kill), a short-lived list cache, and conflict detection
/// against stray assistant-CLI processes already running on the host.
pub struct MuxManager {
    mux_binary: String,
    cli_binary: String,
    window_prefix: String,
    max_sessions: usize,
    default_cols: u16,
    default_rows: u16,
    cache: RwLock<Option<CachedWindows>>,
    active_check: RwLock<Arc<dyn Fn(Uuid) -> bool + Send + Sync>>,
}

impl MuxManager {
    pub fn new(
        mux_binary: impl Into<String>,
        cli_binary: impl Into<String>,
        window_prefix: impl Into<String>,
        max_sessions: usize,
        default_cols: u16,
        default_rows: u16,
    ) -> Self {
        Self {
            mux_binary: mux_binary.into(),
            cli_binary: cli_binary.into(),
            window_prefix: window_prefix.into(),
            max_sessions,
            default_cols,
            default_rows,
            cache: RwLock::new(None),
            active_check: RwLock::new(Arc::new(|_| false)),
        }
    }

    /// Wires in the terminal bridge's "is this session currently connected"
    /// predicate. Defaults to always-false until set.
    pub async fn set_active_check<F>(&self, check: F)
    where
        F: Fn(Uuid) -> bool + Send + Sync + 'static,
    {
        *self.active_check.write().await = Arc::new(check);
    }

    fn window_name(&self, id: Uuid) -> String {
        format!("{}-{}", self.window_prefix, id)
    }

    fn parse_id(&self, window_name: &str) -> Option<Uuid> {
        window_name
            .strip_prefix(&format!("{}-", self.window_prefix))
            .and_then(|rest| Uuid::parse_str(rest).ok())
    }

    /// Returns the cached window list if fresh, otherwise invokes
    /// `<mux> list-sessions` and reparses.
    pub async fn list_windows(&self) -> Vec<WindowDescriptor> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.fetched_at.elapsed() < CACHE_TTL {
                return cached.windows.clone();
            }
        }

        let windows = self.fetch_windows().await;
        *self.cache.write().await = Some(CachedWindows {
            fetched_at: Instant::now(),
            windows: windows.clone(),
        });
        windows
    }

    async fn fetch_windows(&self) -> Vec<WindowDescriptor> {
        let output = Command::new(&self.mux_binary)
            .args([
                "list-sessions",
                "-F",
                "#{session_name}\t#{session_attached}\t#{session_created}",
            ])
            .output()
            .await;

        let Ok(output) = output else {
            tracing::warn!(mux_binary = %self.mux_binary, "failed to invoke list-sessions");
            return Vec::new();
        };
        if !output.status.success() {
            // No server running, or no sessions: treat as an empty list.
            return Vec::new();
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout.lines().filter_map(parse_window_line).collect()
    }

    /// Unconditionally refetches and repopulates the cache, independent of
    /// the TTL. Intended to be called from a periodic background task so
    /// that `list_windows` stays warm even without a request driving it.
    pub async fn refresh_cache(&self) {
        let windows = self.fetch_windows().await;
        *self.cache.write().await = Some(CachedWindows {
            fetched_at: Instant::now(),
            windows,
        });
    }

    /// Interval at which `refresh_cache` should be invoked by a background task.
    pub fn refresh_interval() -> Duration {
        REFRESH_INTERVAL
    }

    fn invalidate(&self) {
        // Best-effort synchronous drop via try_write; if contended the next
        // TTL-driven fetch will still self-correct within 10s.
        if let Ok(mut guard) = self.cache.try_write() {
            *guard = None;
        }
    }

    /// Owned windows (name prefixed with this manager's window prefix),
    /// with the session id recovered from the name.
    pub async fn list_owned(&self) -> Vec<(Uuid, WindowDescriptor)> {
        self.list_windows()
            .await
            .into_iter()
            .filter_map(|w| self.parse_id(&w.name).map(|id| (id, w)))
            .collect()
    }

    /// Attaches to (adopting or creating) the window for `session_id`,
    /// serialized by the caller's session lock.
    pub async fn attach(
        &self,
        session_id: Uuid,
        project_path: Option<&Path>,
    ) -> Result<AttachResult, MuxError> {
        if (self.active_check.read().await)(session_id) {
            return Err(MuxError::SessionAttached(session_id));
        }

        if self.has_conflicting_process(session_id) {
            return Err(MuxError::SessionConflict(session_id));
        }

        let owned = self.list_owned().await;
        let window_name = self.window_name(session_id);
        let already_owned = owned.iter().any(|(id, _)| *id == session_id);
        if owned.len() >= self.max_sessions && !already_owned {
            return Err(MuxError::MaxSessions);
        }

        if owned.iter().any(|(_, w)| w.name == window_name) {
            return Ok(AttachResult {
                window_name,
                existed: true,
            });
        }

        self.spawn_window(&window_name, project_path, &["--resume", &session_id.to_string()])
            .await?;
        self.invalidate();
        Ok(AttachResult {
            window_name,
            existed: false,
        })
    }

    /// Creates a brand-new session with a freshly generated id.
    pub async fn create_new(&self, project_path: &Path) -> Result<(Uuid, String), MuxError> {
        let owned = self.list_owned().await;
        if owned.len() >= self.max_sessions {
            return Err(MuxError::MaxSessions);
        }

        let session_id = Uuid::new_v4();
        let window_name = self.window_name(session_id);
        self.spawn_window(&window_name, Some(project_path), &[])
            .await?;
        self.invalidate();
        Ok((session_id, window_name))
    }

    async fn spawn_window(
        &self,
        window_name: &str,
        working_dir: Option<&Path>,
        cli_args: &[&str],
    ) -> Result<(), MuxError> {
        let mut cmd = Command::new(&self.mux_binary);
        cmd.args([
            "new-session",
            "-d",
            "-s",
            window_name,
            "-x",
            &self.default_cols.to_string(),
            "-y",
            &self.default_rows.to_string(),
        ]);
        if let Some(dir) = working_dir {
            cmd.args(["-c", &dir.to_string_lossy()]);
        }
        cmd.arg(&self.cli_binary);
        cmd.args(cli_args);

        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(MuxError::Spawn {
                mux_binary: self.mux_binary.clone(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    pub async fn kill_session(&self, window_name: &str) -> Result<(), MuxError> {
        let output = Command::new(&self.mux_binary)
            .args(["kill-session", "-t", window_name])
            .output()
            .await?;
        self.invalidate();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("can't find session") || stderr.contains("session not found") {
                return Ok(());
            }
            return Err(MuxError::Spawn {
                mux_binary: self.mux_binary.clone(),
                detail: stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    pub async fn kill_all_owned(&self) -> usize {
        let owned = self.list_owned().await;
        let mut killed = 0;
        for (_, window) in owned {
            if self.kill_session(&window.name).await.is_ok() {
                killed += 1;
            }
        }
        killed
    }

    /// On startup: terminate any orphaned `<mux> attach-session` processes
    /// left by a previous daemon instance, then report owned windows so the
    /// caller can surface them to the operator.
    pub async fn reconcile(&self) -> Vec<Uuid> {
        let owned = self.list_owned().await;
        let mut system = System::new_all();
        system.refresh_all();

        for (id, window) in &owned {
            for (pid, process) in system.processes() {
                let cmd: Vec<String> = process
                    .cmd()
                    .iter()
                    .map(|s| s.to_string_lossy().to_string())
                    .collect();
                let is_attach = cmd.iter().any(|a| a == "attach-session")
                    && cmd.iter().any(|a| a == &window.name);
                if is_attach {
                    tracing::info!(session_id = %id, pid = %pid, "terminating orphaned attach process");
                    process.kill_with(Signal::Term);
                }
            }
        }

        owned.into_iter().map(|(id, _)| id).collect()
    }

    fn has_conflicting_process(&self, session_id: Uuid) -> bool {
        let mut system = System::new_all();
        system.refresh_all();
        let needle = session_id.to_string();

        system.processes().values().any(|process| {
            let cmd: Vec<String> = process
                .cmd()
                .iter()
                .map(|s| s.to_string_lossy().to_string())
                .collect();
            let exe_matches = cmd
                .first()
                .map(|c| c.contains(&self.cli_binary))
                .unwrap_or(false);
            exe_matches
                && cmd.iter().any(|a| a == &needle)
                && cmd.iter().any(|a| a == "--resume")
        })
    }
}

fn parse_window_line(line: &str) -> Option<WindowDescriptor> {
    let mut parts = line.split('\t');
    let name = parts.next()?.to_string();
    let attached = parts.next()? == "1";
    let created_epoch: i64 = parts.next()?.parse().ok()?;
    let created: DateTime<Utc> = Utc.timestamp_opt(created_epoch, 0).single()?;
    Some(WindowDescriptor {
        name,
        attached,
        created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_window_line_valid() {
        let w = parse_window_line("relay-abc\t1\t1700000000").unwrap();
        assert_eq!(w.name, "relay-abc");
        assert!(w.attached);
    }

    #[test]
    fn parse_window_line_detached() {
        let w = parse_window_line("relay-abc\t0\t1700000000").unwrap();
        assert!(!w.attached);
    }

    #[test]
    fn parse_window_line_malformed_is_none() {
        assert!(parse_window_line("not-enough-fields").is_none());
    }

    #[tokio::test]
    async fn window_name_and_parse_id_roundtrip() {
        let manager = MuxManager::new("tmux", "claude", "relay", 16, 80, 24);
        let id = Uuid::new_v4();
        let name = manager.window_name(id);
        assert_eq!(manager.parse_id(&name), Some(id));
    }

    #[tokio::test]
    async fn parse_id_rejects_foreign_prefix() {
        let manager = MuxManager::new("tmux", "claude", "relay", 16, 80, 24);
        assert_eq!(manager.parse_id("other-prefix-notauuid"), None);
    }

    #[tokio::test]
    async fn active_check_defaults_to_false() {
        let manager = MuxManager::new("tmux", "claude", "relay", 16, 80, 24);
        assert!(!(manager.active_check.read().await)(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn set_active_check_is_observed() {
        let manager = MuxManager::new("tmux", "claude", "relay", 16, 80, 24);
        let target = Uuid::new_v4();
        manager.set_active_check(move |id| id == target).await;
        assert!((manager.active_check.read().await)(target));
        assert!(!(manager.active_check.read().await)(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn refresh_cache_populates_cache_without_waiting_on_ttl() {
        let manager = MuxManager::new("tmux", "claude", "relay", 16, 80, 24);
        assert!(manager.cache.read().await.is_none());
        manager.refresh_cache().await;
        assert!(manager.cache.read().await.is_some());
    }

    #[test]
    fn refresh_interval_matches_cache_ttl() {
        assert_eq!(MuxManager::refresh_interval(), CACHE_TTL);
    }
}
