use std::path::{Path, PathBuf};

/// Holds a configurable base directory for all daemon file paths.
///
/// Use `ConfigPaths::new()` for production (resolves `~/.relay`),
/// or `ConfigPaths::with_base()` for testing with an isolated directory.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    base: PathBuf,
}

impl ConfigPaths {
    /// Create paths rooted at `~/.relay`. Returns an error if the home
    /// directory cannot be determined.
    pub fn new() -> anyhow::Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        Ok(Self {
            base: home.join(".relay"),
        })
    }

    /// Create paths rooted at a custom base directory (useful for tests).
    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_dir(&self) -> &Path {
        &self.base
    }

    pub fn config_path(&self) -> PathBuf {
        self.base.join("config.toml")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.base.join("relayd.pid")
    }

    /// Pre-shared key used to authenticate bearer requests (mode 0600).
    pub fn psk_path(&self) -> PathBuf {
        self.base.join("psk")
    }

    /// Versioned session-discovery cache (mode 0600).
    pub fn session_cache_path(&self) -> PathBuf {
        self.base.join("session_cache.json")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.base.join("bin")
    }

    /// Ensure the config directory exists (mode 0700 on unix), creating it
    /// if necessary.
    pub fn ensure_config_dir(&self) -> anyhow::Result<PathBuf> {
        if !self.base.exists() {
            std::fs::create_dir_all(&self.base)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&self.base, std::fs::Permissions::from_mode(0o700))?;
            }
        }
        Ok(self.base.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_dir_returns_base_path() {
        let paths = ConfigPaths::with_base(PathBuf::from("/tmp/test-relay"));
        assert_eq!(paths.config_dir(), Path::new("/tmp/test-relay"));
    }

    #[test]
    fn path_accessors_return_expected_filenames() {
        let base = PathBuf::from("/base");
        let paths = ConfigPaths::with_base(base.clone());

        assert_eq!(paths.config_path(), base.join("config.toml"));
        assert_eq!(paths.pid_path(), base.join("relayd.pid"));
        assert_eq!(paths.psk_path(), base.join("psk"));
        assert_eq!(
            paths.session_cache_path(),
            base.join("session_cache.json")
        );
        assert_eq!(paths.bin_dir(), base.join("bin"));
    }

    #[test]
    fn ensure_config_dir_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("nested").join("config");
        let paths = ConfigPaths::with_base(base.clone());

        assert!(!base.exists());
        let result = paths.ensure_config_dir().unwrap();
        assert_eq!(result, base);
        assert!(base.exists());
    }

    #[test]
    fn ensure_config_dir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("config");
        let paths = ConfigPaths::with_base(base);

        paths.ensure_config_dir().unwrap();
        paths.ensure_config_dir().unwrap(); // second call should not error
    }

    #[test]
    fn new_returns_ok_with_home_set() {
        // In normal environments, $HOME is set
        let result = ConfigPaths::new();
        assert!(result.is_ok());
        let paths = result.unwrap();
        assert!(paths.config_dir().ends_with(".relay"));
    }

    #[cfg(unix)]
    #[test]
    fn ensure_config_dir_sets_mode_0700() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("config");
        let paths = ConfigPaths::with_base(base);
        paths.ensure_config_dir().unwrap();
        let mode = std::fs::metadata(paths.config_dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
