//! HTTP route handlers.
//!
//! JSON in, JSON out. Failures come back as [`Error`], which maps itself to
//! a status code.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::cells::Cell;
use crate::contents::{parse_contents_query, ContentsManager, ContentsQuery};
use crate::error::{Error, Result};
use crate::models::{
    CellData, CellType, ContentsModel, CreateModel, RenameModel, SaveModel, VersionDiff,
    VersionEntry,
};
use crate::toolbar::{cell_fixed_toolbar, main_toolbar, ToolbarGroup};
use crate::AppState;

// ============================================================================
// Contents Handlers
// ============================================================================

pub async fn get_root_contents(
    query: Query<ContentsQuery>,
    state: State<Arc<AppState>>,
) -> Result<Json<ContentsModel>> {
    get_contents(Path(String::new()), query, state).await
}

pub async fn get_contents(
    Path(path): Path<String>,
    Query(query): Query<ContentsQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ContentsModel>> {
    let request = parse_contents_query(&query)?;
    let model = state.contents.get(&path, &request)?;
    Ok(Json(model))
}

pub async fn save_contents(
    Path(path): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<SaveModel>,
) -> Result<Json<ContentsModel>> {
    let model = state.contents.save(&path, body)?;
    Ok(Json(model))
}

pub async fn delete_contents(
    Path(path): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode> {
    state.contents.delete(&path)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn rename_contents(
    Path(path): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<RenameModel>,
) -> Result<Json<ContentsModel>> {
    let model = state.contents.rename(&path, &body.path)?;
    Ok(Json(model))
}

pub async fn create_root_contents(
    state: State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<ContentsModel>)> {
    create_contents(Path(String::new()), state, body).await
}

/// New untitled entry or copy inside a directory. The body is optional.
pub async fn create_contents(
    Path(path): Path<String>,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<ContentsModel>)> {
    let request: CreateModel = if body.iter().all(u8::is_ascii_whitespace) {
        CreateModel::default()
    } else {
        serde_json::from_slice(&body)?
    };
    let model = state.contents.create(&path, request)?;
    Ok((StatusCode::CREATED, Json(model)))
}

// ============================================================================
// Version Handlers
// ============================================================================

/// Run a git-backed operation off the async runtime.
async fn with_git<T, F>(state: Arc<AppState>, op: F) -> Result<T>
where
    F: FnOnce(&ContentsManager) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    if !state.config.git_available {
        return Err(Error::NotFound("version management is disabled".to_string()));
    }
    tokio::task::spawn_blocking(move || op(&state.contents))
        .await
        .map_err(|e| Error::Git(e.to_string()))?
}

pub async fn get_versions(
    Path(path): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<VersionEntry>>> {
    let versions = with_git(state, move |cm| cm.versions(&path)).await?;
    Ok(Json(versions))
}

#[derive(Debug, Deserialize)]
pub struct NewVersion {
    pub commit_message: String,
}

pub async fn create_version(
    Path(path): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewVersion>,
) -> Result<(StatusCode, Json<VersionEntry>)> {
    let entry = with_git(state, move |cm| cm.create_version(&path, &body.commit_message)).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

#[derive(Debug, Deserialize)]
pub struct CommitQuery {
    pub commit_id: String,
}

pub async fn version_diff(
    Path(path): Path<String>,
    Query(query): Query<CommitQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<VersionDiff>> {
    let diff = with_git(state, move |cm| cm.version_diff(&path, &query.commit_id)).await?;
    Ok(Json(diff))
}

/// Reset a file to an earlier version; returns the snapshot taken first.
pub async fn reset_version(
    Path(path): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<CommitQuery>,
) -> Result<Json<VersionEntry>> {
    let snapshot = with_git(state, move |cm| cm.reset_version(&path, &body.commit_id)).await?;
    Ok(Json(snapshot))
}

// ============================================================================
// Cell Handlers
// ============================================================================

#[derive(Debug, Serialize)]
pub struct RenderedCell {
    pub cell_type: CellType,
    pub rendered: bool,
    pub html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight: Option<String>,
}

/// Render a single cell the way the notebook shows it in command mode.
pub async fn render_cell(
    State(state): State<Arc<AppState>>,
    Json(data): Json<CellData>,
) -> Result<Json<RenderedCell>> {
    let mut cell = Cell::from_data(&data, state.cell_options());
    cell.render();
    debug!(cell_type = %cell.cell_type(), "rendered cell");

    Ok(Json(RenderedCell {
        cell_type: cell.cell_type(),
        rendered: cell.is_rendered(),
        html: cell.get_rendered().to_string(),
        highlight: cell.highlight_mode().map(str::to_string),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct SerializeQuery {
    #[serde(default)]
    pub gc_attachments: bool,
}

/// Load a cell and write it back out, optionally dropping unused
/// attachments.
pub async fn serialize_cell(
    Query(query): Query<SerializeQuery>,
    State(state): State<Arc<AppState>>,
    Json(data): Json<CellData>,
) -> Result<Json<CellData>> {
    let cell = Cell::from_data(&data, state.cell_options());
    Ok(Json(cell.to_json(query.gc_attachments)))
}

// ============================================================================
// Toolbar Handler
// ============================================================================

#[derive(Debug, Serialize)]
pub struct Toolbars {
    pub main: Vec<ToolbarGroup>,
    pub cell: Vec<ToolbarGroup>,
}

pub async fn toolbars(State(state): State<Arc<AppState>>) -> Json<Toolbars> {
    Json(Toolbars {
        main: main_toolbar(&state.config),
        cell: cell_fixed_toolbar(),
    })
}
