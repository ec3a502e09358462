use chrono::{DateTime, Utc};
use relay_core::{MessageRole, SessionMetadata};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const HEAD_SCAN_BYTES: u64 = 4096;
const TAIL_SCAN_BYTES: u64 = 4096;
const PREVIEW_MAX_CHARS: usize = 200;

/// Walks `log_dir`, reparsing only files whose mtime (in `mtimes`) changed
/// since the last scan; unchanged files keep their entry from `previous`.
/// `mtimes` is updated in place to reflect the files seen this pass.
pub fn scan_log_dir_incremental(
    log_dir: &Path,
    previous: &HashMap<Uuid, SessionMetadata>,
    mtimes: &mut HashMap<PathBuf, u64>,
) -> HashMap<Uuid, SessionMetadata> {
    let mut out = HashMap::new();
    for path in jsonl_files_under(log_dir) {
        let Some(session_id) = session_id_for(&path) else {
            continue;
        };
        let Ok(meta) = fs::metadata(&path) else {
            continue;
        };
        let mtime_ms = meta
            .modified()
            .ok()
            .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        if mtimes.get(&path) == Some(&mtime_ms) {
            if let Some(existing) = previous.get(&session_id) {
                out.insert(session_id, existing.clone());
                continue;
            }
        }

        let project_hash = project_hash_for(&path, log_dir).unwrap_or_default();
        let metadata = match parse_session_file(&path, &project_hash, session_id) {
            Some(metadata) => metadata,
            None => placeholder_metadata(session_id, &project_hash, &path),
        };
        mtimes.insert(path, mtime_ms);
        out.insert(session_id, metadata);
    }
    out
}

/// Walks `log_dir` for `<hash>/<session-id>.jsonl` files and parses each
/// into a `SessionMetadata`. Files whose name isn't a valid session id are
/// skipped.
pub fn scan_log_dir(log_dir: &Path) -> HashMap<Uuid, SessionMetadata> {
    let mut out = HashMap::new();
    let Ok(hash_dirs) = fs::read_dir(log_dir) else {
        return out;
    };

    for hash_entry in hash_dirs.flatten() {
        let hash_path = hash_entry.path();
        if !hash_path.is_dir() {
            continue;
        }
        let project_hash = hash_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let Ok(files) = fs::read_dir(&hash_path) else {
            continue;
        };
        for file_entry in files.flatten() {
            let path = file_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(session_id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                continue;
            };
            match parse_session_file(&path, &project_hash, session_id) {
                Some(metadata) => {
                    out.insert(session_id, metadata);
                }
                None => {
                    tracing::warn!(path = %path.display(), "failed to parse session log");
                    out.insert(
                        session_id,
                        placeholder_metadata(session_id, &project_hash, &path),
                    );
                }
            }
        }
    }
    out
}

/// Parses a single session's JSONL log into metadata, following the
/// first-4KB/last-4KB scan rather than reading the whole file.
pub fn parse_session_file(path: &Path, project_hash: &str, session_id: Uuid) -> Option<SessionMetadata> {
    let mut file = File::open(path).ok()?;
    let len = file.metadata().ok()?.len();

    let (project_path, cli_version) = scan_head(&mut file, len);
    let (last_message_role, last_message_preview) = scan_tail(&mut file, len);

    let project_path = project_path.unwrap_or_else(|| synthesize_project_path(project_hash));
    let timestamp = fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    Some(SessionMetadata {
        id: session_id,
        project_hash: project_hash.to_string(),
        project_path,
        last_message_preview,
        last_message_role,
        timestamp,
        cli_version,
    })
}

fn scan_head(file: &mut File, len: u64) -> (Option<String>, Option<String>) {
    let take = HEAD_SCAN_BYTES.min(len);
    let mut buf = vec![0u8; take as usize];
    if file.seek(SeekFrom::Start(0)).is_err() || file.read_exact(&mut buf).is_err() {
        return (None, None);
    }
    let text = String::from_utf8_lossy(&buf);

    let mut project_path = None;
    let mut cli_version = None;
    for line in text.lines() {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if project_path.is_none() {
            if let Some(cwd) = value.get("cwd").and_then(Value::as_str) {
                project_path = Some(cwd.to_string());
            }
        }
        if cli_version.is_none() {
            if let Some(version) = value.get("version").and_then(Value::as_str) {
                cli_version = Some(version.to_string());
            }
        }
        if project_path.is_some() && cli_version.is_some() {
            break;
        }
    }
    (project_path, cli_version)
}

fn scan_tail(file: &mut File, len: u64) -> (MessageRole, String) {
    let take = TAIL_SCAN_BYTES.min(len);
    let start = len - take;
    let mut buf = vec![0u8; take as usize];
    if file.seek(SeekFrom::Start(start)).is_err() || file.read_exact(&mut buf).is_err() {
        return (MessageRole::Unknown, String::new());
    }
    let mut text = String::from_utf8_lossy(&buf).to_string();

    // Discard a partial leading line when we didn't start at the file head.
    if start > 0 {
        if let Some(first_newline) = text.find('\n') {
            text = text[first_newline + 1..].to_string();
        } else {
            text.clear();
        }
    }

    for line in text.lines().rev() {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        let role = match value.get("type").and_then(Value::as_str) {
            Some("user") => MessageRole::User,
            Some("assistant") => MessageRole::Assistant,
            _ => continue,
        };
        let preview = extract_preview(&value);
        return (role, truncate_preview(&preview));
    }
    (MessageRole::Unknown, String::new())
}

fn extract_preview(record: &Value) -> String {
    let content = record.pointer("/message/content");
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .find(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .and_then(|b| b.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

fn truncate_preview(s: &str) -> String {
    if s.chars().count() <= PREVIEW_MAX_CHARS {
        return s.to_string();
    }
    let truncated: String = s.chars().take(PREVIEW_MAX_CHARS).collect();
    format!("{truncated}...")
}

/// Derives a synthetic project path from a project hash when no `cwd` was
/// found in the log: leading `-` becomes `/`, interior `-` becomes `/`.
fn synthesize_project_path(project_hash: &str) -> String {
    if let Some(rest) = project_hash.strip_prefix('-') {
        format!("/{}", rest.replace('-', "/"))
    } else {
        project_hash.replace('-', "/")
    }
}

fn placeholder_metadata(session_id: Uuid, project_hash: &str, path: &Path) -> SessionMetadata {
    let timestamp = fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    SessionMetadata {
        id: session_id,
        project_hash: project_hash.to_string(),
        project_path: synthesize_project_path(project_hash),
        last_message_preview: "(unable to read)".to_string(),
        last_message_role: MessageRole::Unknown,
        timestamp,
        cli_version: None,
    }
}

/// Also used by the watcher's single-file reparse path so that a file
/// already tracked under a known session id keeps its project hash even
/// when the directory layout can't be walked fresh.
pub fn project_hash_for(path: &Path, log_dir: &Path) -> Option<String> {
    path.strip_prefix(log_dir)
        .ok()
        .and_then(|rel| rel.components().next())
        .map(|c| c.as_os_str().to_string_lossy().to_string())
}

pub fn session_id_for(path: &Path) -> Option<Uuid> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

pub fn jsonl_files_under(log_dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(hash_dirs) = fs::read_dir(log_dir) else {
        return out;
    };
    for hash_entry in hash_dirs.flatten() {
        let hash_path = hash_entry.path();
        if !hash_path.is_dir() {
            continue;
        }
        let Ok(files) = fs::read_dir(&hash_path) else {
            continue;
        };
        for file_entry in files.flatten() {
            let path = file_entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                out.push(path);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_log(dir: &Path, hash: &str, session_id: Uuid, lines: &[&str]) -> PathBuf {
        let hash_dir = dir.join(hash);
        fs::create_dir_all(&hash_dir).unwrap();
        let path = hash_dir.join(format!("{session_id}.jsonl"));
        fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    #[test]
    fn parses_cwd_and_version_from_head() {
        let dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        write_log(
            dir.path(),
            "-home-user-proj",
            id,
            &[
                r#"{"type":"meta","cwd":"/home/user/proj","version":"1.2.3"}"#,
                r#"{"type":"user","message":{"content":"hello there"}}"#,
            ],
        );

        let metadata = scan_log_dir(dir.path());
        let m = metadata.get(&id).unwrap();
        assert_eq!(m.project_path, "/home/user/proj");
        assert_eq!(m.cli_version.as_deref(), Some("1.2.3"));
        assert_eq!(m.last_message_role, MessageRole::User);
        assert_eq!(m.last_message_preview, "hello there");
    }

    #[test]
    fn extracts_preview_from_content_block_list() {
        let dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        write_log(
            dir.path(),
            "-home-user-proj",
            id,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"the answer is 42"}]}}"#,
            ],
        );

        let metadata = scan_log_dir(dir.path());
        let m = metadata.get(&id).unwrap();
        assert_eq!(m.last_message_role, MessageRole::Assistant);
        assert_eq!(m.last_message_preview, "the answer is 42");
    }

    #[test]
    fn truncates_long_preview_to_200_chars() {
        let dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let long = "x".repeat(300);
        write_log(
            dir.path(),
            "-home-user-proj",
            id,
            &[&format!(r#"{{"type":"user","message":{{"content":"{long}"}}}}"#)],
        );

        let metadata = scan_log_dir(dir.path());
        let m = metadata.get(&id).unwrap();
        assert_eq!(m.last_message_preview.chars().count(), 203);
        assert!(m.last_message_preview.ends_with("..."));
    }

    #[test]
    fn missing_cwd_synthesizes_project_path_from_hash() {
        let dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        write_log(
            dir.path(),
            "-home-user-myproj",
            id,
            &[r#"{"type":"user","message":{"content":"hi"}}"#],
        );

        let metadata = scan_log_dir(dir.path());
        let m = metadata.get(&id).unwrap();
        assert_eq!(m.project_path, "/home/user/myproj");
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        write_log(
            dir.path(),
            "-home-user-proj",
            id,
            &["not json at all", r#"{"type":"user","message":{"content":"ok"}}"#],
        );

        let metadata = scan_log_dir(dir.path());
        let m = metadata.get(&id).unwrap();
        assert_eq!(m.last_message_preview, "ok");
    }

    #[test]
    fn non_jsonl_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let hash_dir = dir.path().join("-home-user-proj");
        fs::create_dir_all(&hash_dir).unwrap();
        fs::write(hash_dir.join("notes.txt"), "irrelevant").unwrap();

        let metadata = scan_log_dir(dir.path());
        assert!(metadata.is_empty());
    }

    #[test]
    fn filename_must_be_valid_uuid() {
        let dir = TempDir::new().unwrap();
        let hash_dir = dir.path().join("-home-user-proj");
        fs::create_dir_all(&hash_dir).unwrap();
        fs::write(hash_dir.join("not-a-uuid.jsonl"), "{}").unwrap();

        let metadata = scan_log_dir(dir.path());
        assert!(metadata.is_empty());
    }
}
