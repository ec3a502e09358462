use crate::cache;
use crate::scanner::{self, parse_session_file, project_hash_for};
use crate::watch::{LogWatcher, WatchEvent, WatchEventKind};
use relay_core::SessionMetadata;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

const FULL_RESCAN_INTERVAL: std::time::Duration = std::time::Duration::from_secs(120);
const WRITE_STABILITY_WINDOW: std::time::Duration = std::time::Duration::from_millis(500);
const SAVE_DEBOUNCE: std::time::Duration = std::time::Duration::from_secs(5);
const CHANGE_DEBOUNCE: std::time::Duration = std::time::Duration::from_secs(2);

struct Inner {
    log_dir: PathBuf,
    cache_path: PathBuf,
    map: RwLock<HashMap<Uuid, SessionMetadata>>,
    mtimes: RwLock<HashMap<PathBuf, u64>>,
    change_tx: broadcast::Sender<()>,
    dirty_save: AtomicBool,
    dirty_change: AtomicBool,
}

/// Watches a CLI's session-log directory and maintains an in-memory,
/// disk-cached map of session metadata kept current by a recursive watcher
/// plus a periodic full-rescan safety net.
pub struct Discovery {
    inner: Arc<Inner>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Discovery {
    pub fn new(log_dir: PathBuf, cache_path: PathBuf) -> Self {
        let (change_tx, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(Inner {
                log_dir,
                cache_path,
                map: RwLock::new(HashMap::new()),
                mtimes: RwLock::new(HashMap::new()),
                change_tx,
                dirty_save: AtomicBool::new(false),
                dirty_change: AtomicBool::new(false),
            }),
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        let cached = cache::load(&self.inner.cache_path);
        {
            let mut map = self.inner.map.write().await;
            for entry in cached {
                map.insert(entry.id, entry);
            }
        }

        self.full_scan().await;

        let mut tasks = Vec::new();

        let (watch_tx, watch_rx) = mpsc::unbounded_channel();
        let watcher = LogWatcher::start(&self.inner.log_dir, watch_tx).ok();
        if let Some(watcher) = watcher {
            // Keep the notify watcher alive for the process lifetime by
            // leaking it into a task that never returns; `stop()` drops the
            // whole `Discovery`, which is process-lifetime anyway.
            tasks.push(tokio::spawn(async move {
                let _watcher = watcher;
                std::future::pending::<()>().await;
            }));
        }
        tasks.push(self.spawn_debounce_loop(watch_rx));
        tasks.push(self.spawn_rescan_timer());
        tasks.push(self.spawn_save_debounce());
        tasks.push(self.spawn_change_debounce());

        *self.tasks.lock().unwrap() = tasks;
        Ok(())
    }

    pub async fn stop(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        let map = self.inner.map.read().await;
        let entries: Vec<SessionMetadata> = map.values().cloned().collect();
        cache::save(&self.inner.cache_path, &entries);
    }

    pub async fn get_all(&self) -> Vec<SessionMetadata> {
        let map = self.inner.map.read().await;
        let mut entries: Vec<SessionMetadata> = map.values().cloned().collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries
    }

    pub async fn get(&self, id: &Uuid) -> Option<SessionMetadata> {
        self.inner.map.read().await.get(id).cloned()
    }

    pub async fn get_by_project(&self) -> HashMap<String, Vec<SessionMetadata>> {
        let mut grouped: HashMap<String, Vec<SessionMetadata>> = HashMap::new();
        for entry in self.get_all().await {
            let key = if entry.project_path.is_empty() {
                entry.project_hash.clone()
            } else {
                entry.project_path.clone()
            };
            grouped.entry(key).or_default().push(entry);
        }
        for list in grouped.values_mut() {
            list.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        }
        grouped
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.inner.change_tx.subscribe()
    }

    async fn full_scan(&self) {
        full_scan_inner(&self.inner).await;
    }

    fn spawn_debounce_loop(&self, mut rx: mpsc::UnboundedReceiver<WatchEvent>) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut pending: HashMap<PathBuf, WatchEventKind> = HashMap::new();
            loop {
                tokio::select! {
                    event = rx.recv() => {
                        match event {
                            Some(event) => {
                                pending.insert(event.path, event.kind);
                            }
                            None => break,
                        }
                    }
                    _ = tokio::time::sleep(WRITE_STABILITY_WINDOW) => {
                        if pending.is_empty() {
                            continue;
                        }
                        let ready: Vec<(PathBuf, WatchEventKind)> = pending.drain().collect();
                        for (path, kind) in ready {
                            apply_watch_event(&inner, &path, kind).await;
                        }
                    }
                }
            }
        })
    }

    fn spawn_rescan_timer(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(FULL_RESCAN_INTERVAL).await;
                full_scan_inner(&inner).await;
            }
        })
    }

    fn spawn_save_debounce(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(SAVE_DEBOUNCE).await;
                if inner.dirty_save.swap(false, Ordering::SeqCst) {
                    let entries: Vec<SessionMetadata> =
                        inner.map.read().await.values().cloned().collect();
                    cache::save(&inner.cache_path, &entries);
                }
            }
        })
    }

    fn spawn_change_debounce(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(CHANGE_DEBOUNCE).await;
                if inner.dirty_change.swap(false, Ordering::SeqCst) {
                    let _ = inner.change_tx.send(());
                }
            }
        })
    }
}

/// Stats and reparses only the log files that changed since the last scan
/// (mtime comparison), drops entries for files no longer present.
async fn full_scan_inner(inner: &Arc<Inner>) {
    let log_dir = inner.log_dir.clone();
    let previous = inner.map.read().await.clone();
    let mut mtimes = inner.mtimes.write().await;
    let freshly_scanned = tokio::task::spawn_blocking({
        let mut mtimes = std::mem::take(&mut *mtimes);
        move || {
            let result = scanner::scan_log_dir_incremental(&log_dir, &previous, &mut mtimes);
            (result, mtimes)
        }
    })
    .await
    .unwrap_or_default();
    let (freshly_scanned, new_mtimes) = freshly_scanned;
    *mtimes = new_mtimes;
    mtimes.retain(|path, _| freshly_scanned.keys().any(|id| {
        scanner::session_id_for(path) == Some(*id)
    }));
    drop(mtimes);

    let mut map = inner.map.write().await;
    let seen_ids: std::collections::HashSet<Uuid> = freshly_scanned.keys().copied().collect();
    map.retain(|id, _| seen_ids.contains(id));
    map.extend(freshly_scanned);
    drop(map);

    inner.dirty_save.store(true, Ordering::SeqCst);
    inner.dirty_change.store(true, Ordering::SeqCst);
}

async fn apply_watch_event(inner: &Arc<Inner>, path: &PathBuf, kind: WatchEventKind) {
    let Some(session_id) = scanner::session_id_for(path) else {
        return;
    };

    match kind {
        WatchEventKind::Remove => {
            inner.map.write().await.remove(&session_id);
            inner.mtimes.write().await.remove(path);
        }
        WatchEventKind::AddOrChange => {
            let Some(project_hash) = project_hash_for(path, &inner.log_dir) else {
                return;
            };
            let path = path.clone();
            let result = tokio::task::spawn_blocking(move || {
                parse_session_file(&path, &project_hash, session_id)
            })
            .await
            .ok()
            .flatten();

            match result {
                Some(metadata) => {
                    inner.map.write().await.insert(session_id, metadata);
                }
                None => {
                    tracing::warn!(session_id = %session_id, "failed to reparse changed session log");
                }
            }
        }
    }

    inner.dirty_save.store(true, Ordering::SeqCst);
    inner.dirty_change.store(true, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::MessageRole;
    use tempfile::TempDir;

    fn write_log(dir: &std::path::Path, hash: &str, id: Uuid, body: &str) {
        let hash_dir = dir.join(hash);
        std::fs::create_dir_all(&hash_dir).unwrap();
        std::fs::write(hash_dir.join(format!("{id}.jsonl")), body).unwrap();
    }

    #[tokio::test]
    async fn start_loads_existing_logs_via_full_scan() {
        let log_dir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        write_log(
            log_dir.path(),
            "-home-user-proj",
            id,
            r#"{"type":"user","message":{"content":"hello"}}"#,
        );

        let discovery = Discovery::new(
            log_dir.path().to_path_buf(),
            cache_dir.path().join("cache.json"),
        );
        discovery.start().await.unwrap();

        let all = discovery.get_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
        assert_eq!(all[0].last_message_role, MessageRole::User);

        discovery.stop().await;
    }

    #[tokio::test]
    async fn get_by_project_groups_and_sorts() {
        let log_dir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let id1 = Uuid::new_v4();
        let id2 = Uuid::new_v4();
        write_log(
            log_dir.path(),
            "-home-user-proj",
            id1,
            r#"{"type":"user","message":{"content":"a"}}"#,
        );
        write_log(
            log_dir.path(),
            "-home-user-proj",
            id2,
            r#"{"type":"user","message":{"content":"b"}}"#,
        );

        let discovery = Discovery::new(
            log_dir.path().to_path_buf(),
            cache_dir.path().join("cache.json"),
        );
        discovery.start().await.unwrap();

        let grouped = discovery.get_by_project().await;
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped.values().next().unwrap().len(), 2);

        discovery.stop().await;
    }

    #[tokio::test]
    async fn get_returns_none_for_unknown_id() {
        let log_dir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let discovery = Discovery::new(
            log_dir.path().to_path_buf(),
            cache_dir.path().join("cache.json"),
        );
        discovery.start().await.unwrap();
        assert!(discovery.get(&Uuid::new_v4()).await.is_none());
        discovery.stop().await;
    }

    #[tokio::test]
    async fn stop_persists_cache_for_next_start() {
        let log_dir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let cache_path = cache_dir.path().join("cache.json");
        let id = Uuid::new_v4();
        write_log(
            log_dir.path(),
            "-home-user-proj",
            id,
            r#"{"type":"user","message":{"content":"hi"}}"#,
        );

        let discovery = Discovery::new(log_dir.path().to_path_buf(), cache_path.clone());
        discovery.start().await.unwrap();
        discovery.stop().await;

        assert!(cache_path.exists());
        let cached = cache::load(&cache_path);
        assert_eq!(cached.len(), 1);
    }
}
