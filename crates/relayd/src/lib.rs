//! Shared helpers used by the `relayd` daemon binary.

use std::fs;
use std::path::Path;

/// Build-time daemon version string.
///
/// When `RELAYD_VERSION` is provided in the build environment (for example
/// by CI release workflows), that value is used. Otherwise we fall back to
/// the crate package version.
pub const DAEMON_VERSION: &str = match option_env!("RELAYD_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

// ---------------------------------------------------------------------------
// PID file management
// ---------------------------------------------------------------------------

/// Reads the daemon PID from `path`, returning `None` if missing or invalid.
pub fn read_pid_file(path: &Path) -> Option<u32> {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Writes the current process PID to `path`.
pub fn write_pid_file(path: &Path) -> anyhow::Result<()> {
    fs::write(path, std::process::id().to_string())?;
    Ok(())
}

/// Removes the PID file at `path` if it exists.
pub fn remove_pid_file(path: &Path) {
    let _ = fs::remove_file(path);
}

/// Returns `true` when a process with `pid` appears to be alive.
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}
