//! Upload Routes
//!
//! HTTP endpoints for resumable chunked uploads.
//!
//! Endpoints:
//! - POST /api/v1/projects/:project_id/uploads - Initiate or resume an upload
//! - GET /api/v1/projects/:project_id/uploads/:session_id - Get session status
//! - PUT /api/v1/projects/:project_id/uploads/:session_id/chunks/:index - Upload a chunk
//! - POST /api/v1/projects/:project_id/uploads/:session_id/finalize - Assemble the file
//! - DELETE /api/v1/projects/:project_id/uploads/:session_id - Cancel upload

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::access::{require_project_permission, CurrentUser};
use crate::db::Role;
use crate::error::Result;
use crate::routes::ArtifactResponse;
use crate::state::AppState;
use crate::upload::{ChunkAck, SessionDescriptor, SessionProgress};

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
///
/// Chunk bodies are capped at `chunk_limit` bytes.
pub fn router(chunk_limit: usize) -> Router<AppState> {
    Router::new()
        .route("/:project_id/uploads", post(initiate))
        .route(
            "/:project_id/uploads/:session_id",
            get(get_session).delete(cancel_session),
        )
        .route(
            "/:project_id/uploads/:session_id/chunks/:index",
            put(upload_chunk).layer(DefaultBodyLimit::max(chunk_limit)),
        )
        .route("/:project_id/uploads/:session_id/finalize", post(finalize))
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct InitiateRequest {
    pub filename: String,
    #[serde(alias = "size")]
    pub file_size: u64,
}

#[derive(Debug, Deserialize)]
pub struct FinalizeRequest {
    pub total_chunks: u64,
    pub filename: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/projects/:project_id/uploads
///
/// Returns the chunk plan and the chunks already stored.
async fn initiate(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(project_id): Path<i64>,
    Json(request): Json<InitiateRequest>,
) -> Result<Json<SessionDescriptor>> {
    let access = require_project_permission(&state, &user, project_id, Role::Editor).await?;

    let descriptor = state
        .uploads()
        .initiate(&request.filename, request.file_size, &access.destination)
        .await?;

    Ok(Json(descriptor))
}

/// GET /api/v1/projects/:project_id/uploads/:session_id
async fn get_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((project_id, session_id)): Path<(i64, String)>,
) -> Result<Json<SessionProgress>> {
    let access = require_project_permission(&state, &user, project_id, Role::Viewer).await?;

    let progress = state
        .uploads()
        .session_progress(&session_id, &access.destination)
        .await?;

    Ok(Json(progress))
}

/// PUT /api/v1/projects/:project_id/uploads/:session_id/chunks/:index
///
/// The chunk data is the raw request body.
async fn upload_chunk(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((project_id, session_id, index)): Path<(i64, String, u64)>,
    body: Bytes,
) -> Result<Json<ChunkAck>> {
    let access = require_project_permission(&state, &user, project_id, Role::Editor).await?;

    let ack = state
        .uploads()
        .accept_chunk(&session_id, index, &body, None, &access.destination)
        .await?;

    Ok(Json(ack))
}

/// POST /api/v1/projects/:project_id/uploads/:session_id/finalize
async fn finalize(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((project_id, session_id)): Path<(i64, String)>,
    Json(request): Json<FinalizeRequest>,
) -> Result<(StatusCode, Json<ArtifactResponse>)> {
    let access = require_project_permission(&state, &user, project_id, Role::Editor).await?;

    let artifact = state
        .uploads()
        .finalize(
            &session_id,
            request.filename.as_deref(),
            request.total_chunks,
            &access.destination,
        )
        .await?;

    tracing::info!(
        project_id = project_id,
        user_id = user.id,
        session_id = %session_id,
        filename = %artifact.filename,
        size = artifact.size,
        "Upload finalized"
    );

    Ok((
        StatusCode::CREATED,
        Json(ArtifactResponse::new(state.storage(), artifact)),
    ))
}

/// DELETE /api/v1/projects/:project_id/uploads/:session_id
async fn cancel_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((project_id, session_id)): Path<(i64, String)>,
) -> Result<StatusCode> {
    let access = require_project_permission(&state, &user, project_id, Role::Editor).await?;

    state
        .uploads()
        .cancel(&session_id, &access.destination)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Tests
// ============================================================================
