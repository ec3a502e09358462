use chrono::{DateTime, Utc};
use relay_core::SessionMetadata;
use serde::{Deserialize, Serialize};
use std::path::Path;

const CACHE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    version: u32,
    entries: Vec<SessionMetadata>,
    last_full_scan: DateTime<Utc>,
}

/// Loads the persisted session cache from `path`. Missing files, unreadable
/// files, and documents with an unrecognized `version` are all treated as
/// "no cache" rather than hard errors — the caller falls back to a fresh
/// scan.
pub fn load(path: &Path) -> Vec<SessionMetadata> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let Ok(doc) = serde_json::from_str::<CacheDocument>(&content) else {
        return Vec::new();
    };
    if doc.version != CACHE_VERSION {
        return Vec::new();
    }
    doc.entries
}

/// Saves `entries` to `path` (mode 0600 on unix). Best-effort: write
/// failures are logged, not propagated, since the cache is purely an
/// optimization over the next full scan.
pub fn save(path: &Path, entries: &[SessionMetadata]) {
    let doc = CacheDocument {
        version: CACHE_VERSION,
        entries: entries.to_vec(),
        last_full_scan: Utc::now(),
    };
    let Ok(content) = serde_json::to_string(&doc) else {
        return;
    };
    if let Err(err) = std::fs::write(path, content) {
        tracing::warn!(path = %path.display(), error = %err, "failed to persist session cache");
        return;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
}
