#[cfg(test)]
use notify::PollWatcher;
#[cfg(not(test))]
use notify::RecommendedWatcher;
use notify::{Config, Event, EventKind, RecursiveMode, Watcher};
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum WatchEventKind {
    AddOrChange,
    Remove,
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
}

#[cfg(not(test))]
enum WatcherHandle {
    Recommended(RecommendedWatcher),
}

#[cfg(test)]
enum WatcherHandle {
    Poll(PollWatcher),
}

/// Watches the session-log directory recursively for `.jsonl` creation,
/// modification, and removal, forwarding raw (non-debounced) events on
/// `tx`. Debouncing by write-stability window is the caller's job.
pub struct LogWatcher {
    _watcher: WatcherHandle,
}

impl LogWatcher {
    pub fn start(log_dir: &std::path::Path, tx: mpsc::UnboundedSender<WatchEvent>) -> notify::Result<Self> {
        let callback = move |result: Result<Event, notify::Error>| match result {
            Ok(event) => {
                let kind = match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) => WatchEventKind::AddOrChange,
                    EventKind::Remove(_) => WatchEventKind::Remove,
                    _ => return,
                };
                for path in &event.paths {
                    if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                        continue;
                    }
                    let _ = tx.send(WatchEvent {
                        path: path.clone(),
                        kind: kind.clone(),
                    });
                }
            }
            Err(e) => tracing::warn!("session log watcher error: {e}"),
        };

        #[cfg(test)]
        let mut watcher = WatcherHandle::Poll(PollWatcher::new(
            callback,
            Config::default().with_poll_interval(std::time::Duration::from_millis(100)),
        )?);

        #[cfg(not(test))]
        let mut watcher =
            WatcherHandle::Recommended(RecommendedWatcher::new(callback, Config::default())?);

        match &mut watcher {
            #[cfg(not(test))]
            WatcherHandle::Recommended(w) => w.watch(log_dir, RecursiveMode::Recursive)?,
            #[cfg(test)]
            WatcherHandle::Poll(w) => w.watch(log_dir, RecursiveMode::Recursive)?,
        }

        Ok(Self { _watcher: watcher })
    }
}
