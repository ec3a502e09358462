use chrono::{DateTime, Utc};
use relay_core::{SessionView, TmuxStatus};
use relay_discovery::Discovery;
use relay_mux::MuxManager;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// One entry of `GET /api/projects`: a project directory and a rollup of
/// its sessions.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    pub project_path: String,
    pub project_name: String,
    pub session_count: usize,
    pub latest_timestamp: DateTime<Utc>,
}

/// Composes session metadata (Discovery), window liveness (the mux manager),
/// and live-connection state (the terminal bridge) into the client-facing
/// `SessionView`.
pub struct SessionRegistry {
    discovery: Arc<Discovery>,
    mux: Arc<MuxManager>,
    bridge: Arc<crate::bridge::TerminalBridge>,
}

impl SessionRegistry {
    pub fn new(
        discovery: Arc<Discovery>,
        mux: Arc<MuxManager>,
        bridge: Arc<crate::bridge::TerminalBridge>,
    ) -> Self {
        Self {
            discovery,
            mux,
            bridge,
        }
    }

    pub async fn list_sessions(&self) -> Vec<SessionView> {
        let owned = self.mux.list_owned().await;
        let mut views = Vec::new();
        for metadata in self.discovery.get_all().await {
            let window = owned.iter().find(|(id, _)| *id == metadata.id);
            let tmux_status = match window {
                Some((_, w)) if w.attached => TmuxStatus::Active,
                Some(_) => TmuxStatus::Detached,
                None => TmuxStatus::None,
            };
            let has_active_connection = self.bridge.has_active(metadata.id).await;
            views.push(SessionView::build(&metadata, tmux_status, has_active_connection));
        }
        views
    }

    pub async fn get_session(&self, id: Uuid) -> Option<SessionView> {
        let metadata = self.discovery.get(&id).await?;
        let owned = self.mux.list_owned().await;
        let tmux_status = match owned.iter().find(|(owned_id, _)| *owned_id == id) {
            Some((_, w)) if w.attached => TmuxStatus::Active,
            Some(_) => TmuxStatus::Detached,
            None => TmuxStatus::None,
        };
        let has_active_connection = self.bridge.has_active(id).await;
        Some(SessionView::build(&metadata, tmux_status, has_active_connection))
    }

    pub async fn has_session(&self, id: Uuid) -> bool {
        self.discovery.get(&id).await.is_some()
    }

    pub async fn project_path_of(&self, id: Uuid) -> Option<String> {
        self.discovery.get(&id).await.map(|m| m.project_path)
    }

    pub async fn grouped_by_project(&self) -> Vec<ProjectSummary> {
        let mut grouped: HashMap<String, Vec<SessionView>> = HashMap::new();
        for view in self.list_sessions().await {
            let key = if view.project_path.is_empty() {
                view.project_hash.clone()
            } else {
                view.project_path.clone()
            };
            grouped.entry(key).or_default().push(view);
        }

        let mut summaries: Vec<ProjectSummary> = grouped
            .into_iter()
            .map(|(project_path, views)| {
                let latest_timestamp = views
                    .iter()
                    .map(|v| v.timestamp)
                    .max()
                    .unwrap_or_else(Utc::now);
                let project_name = std::path::Path::new(&project_path)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| project_path.clone());
                ProjectSummary {
                    project_path,
                    project_name,
                    session_count: views.len(),
                    latest_timestamp,
                }
            })
            .collect();
        summaries.sort_by_key(|s| std::cmp::Reverse(s.latest_timestamp));
        summaries
    }
}
