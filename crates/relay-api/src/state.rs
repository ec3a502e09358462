use relay_config::DaemonConfig;
use relay_core::SessionLockMap;
use relay_discovery::{Discovery, ProjectRoots};
use relay_mux::MuxManager;
use std::sync::Arc;

use crate::auth::AuthState;
use crate::bridge::TerminalBridge;
use crate::rate_limit::AttachRateLimiter;
use crate::registry::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: DaemonConfig,
    pub auth: Arc<AuthState>,
    pub rate_limiter: Arc<AttachRateLimiter>,
    pub locks: Arc<SessionLockMap>,
    pub mux: Arc<MuxManager>,
    pub discovery: Arc<Discovery>,
    pub bridge: Arc<TerminalBridge>,
    pub registry: Arc<SessionRegistry>,
    pub roots: ProjectRoots,
    pub version: &'static str,
}

impl AppState {
    /// Wires Components A-H in dependency order: the mux manager's
    /// "is this session live" predicate can only be set once the terminal
    /// bridge exists, so bridge construction precedes `set_active_check`.
    pub async fn new(config: DaemonConfig, psk: String) -> anyhow::Result<Self> {
        let paths = config.paths()?;

        let mux = Arc::new(MuxManager::new(
            config.mux_binary.clone(),
            config.cli_binary.clone(),
            config.window_prefix.clone(),
            config.max_sessions,
            config.default_cols,
            config.default_rows,
        ));

        let discovery = Arc::new(Discovery::new(
            claude_log_dir(),
            paths.session_cache_path(),
        ));

        let bridge = Arc::new(TerminalBridge::new(
            config.mux_binary.clone(),
            config.heartbeat_interval_secs,
            config.max_missed_pongs,
        ));

        mux.set_active_check(bridge.active_check()).await;

        let registry = Arc::new(SessionRegistry::new(
            discovery.clone(),
            mux.clone(),
            bridge.clone(),
        ));

        Ok(Self {
            roots: ProjectRoots::new(config.project_roots.clone()),
            config,
            auth: Arc::new(AuthState::new(psk)),
            rate_limiter: Arc::new(AttachRateLimiter::new()),
            locks: Arc::new(SessionLockMap::new()),
            mux,
            discovery,
            bridge,
            registry,
            version: env!("CARGO_PKG_VERSION"),
        })
    }
}

fn claude_log_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("/"))
        .join(".claude")
        .join("projects")
}
