use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::paths::ConfigPaths;

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    9400
}

fn default_project_roots() -> Vec<PathBuf> {
    Vec::new()
}

fn default_mux_binary() -> String {
    "tmux".to_string()
}

fn default_cli_binary() -> String {
    "claude".to_string()
}

fn default_window_prefix() -> String {
    "relay".to_string()
}

fn default_max_sessions() -> usize {
    16
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    24
}

fn default_heartbeat_interval_secs() -> u64 {
    20
}

fn default_max_missed_pongs() -> u32 {
    3
}

fn default_attach_rate_limit_secs() -> u64 {
    5
}

/// Bind address, discoverable filesystem roots, and the external binaries
/// the daemon shells out to. Loaded from `config.toml`; every field has a
/// default so an absent file still produces a usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directories eligible as a parent for `/api/sessions/new`.
    #[serde(default = "default_project_roots")]
    pub project_roots: Vec<PathBuf>,
    #[serde(default = "default_mux_binary")]
    pub mux_binary: String,
    #[serde(default = "default_cli_binary")]
    pub cli_binary: String,
    #[serde(default = "default_window_prefix")]
    pub window_prefix: String,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_cols")]
    pub default_cols: u16,
    #[serde(default = "default_rows")]
    pub default_rows: u16,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_max_missed_pongs")]
    pub max_missed_pongs: u32,
    #[serde(default = "default_attach_rate_limit_secs")]
    pub attach_rate_limit_secs: u64,

    #[serde(skip)]
    paths: Option<ConfigPaths>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            project_roots: default_project_roots(),
            mux_binary: default_mux_binary(),
            cli_binary: default_cli_binary(),
            window_prefix: default_window_prefix(),
            max_sessions: default_max_sessions(),
            default_cols: default_cols(),
            default_rows: default_rows(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            max_missed_pongs: default_max_missed_pongs(),
            attach_rate_limit_secs: default_attach_rate_limit_secs(),
            paths: None,
        }
    }
}

impl DaemonConfig {
    /// Returns the `ConfigPaths` for this config. If paths haven't been set,
    /// creates the default paths (may fail if `$HOME` is unset).
    pub fn paths(&self) -> anyhow::Result<ConfigPaths> {
        match &self.paths {
            Some(p) => Ok(p.clone()),
            None => ConfigPaths::new(),
        }
    }

    /// Set a custom `ConfigPaths` (useful for testing or multi-instance).
    pub fn set_paths(&mut self, paths: ConfigPaths) {
        self.paths = Some(paths);
    }

    /// Load config from the default location (`~/.relay/config.toml`).
    pub fn load() -> anyhow::Result<Self> {
        let paths = ConfigPaths::new()?;
        Self::load_from(&paths)
    }

    /// Load config from a specific `ConfigPaths`.
    pub fn load_from(paths: &ConfigPaths) -> anyhow::Result<Self> {
        paths.ensure_config_dir()?;
        let config_file = paths.config_path();
        let mut config = if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)?;
            let config: DaemonConfig = toml::from_str(&content)?;
            config
        } else {
            Self::default()
        };
        config.paths = Some(paths.clone());
        config.validate()?;
        Ok(config)
    }

    /// Validate config values. Called automatically by `load` / `load_from`.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must not be 0");
        }
        if self.cli_binary.trim().is_empty() {
            anyhow::bail!("cli_binary must not be empty");
        }
        if self.mux_binary.trim().is_empty() {
            anyhow::bail!("mux_binary must not be empty");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
