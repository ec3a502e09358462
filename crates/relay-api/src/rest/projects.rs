use axum::extract::State;
use axum::Json;

use crate::registry::ProjectSummary;
use crate::state::AppState;

pub async fn projects(State(state): State<AppState>) -> Json<Vec<ProjectSummary>> {
    Json(state.registry.grouped_by_project().await)
}

pub async fn directories(
    State(state): State<AppState>,
) -> Json<Vec<relay_discovery::RootEntry>> {
    Json(state.roots.list_directories())
}
