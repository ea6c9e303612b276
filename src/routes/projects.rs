//! Project routes
//!
//! Endpoints:
//! - GET  /api/v1/projects - Projects visible to the user
//! - POST /api/v1/projects - Create a project (admin)
//! - GET  /api/v1/projects/:project_id/files - List finished files
//! - POST /api/v1/projects/:project_id/files - Single-shot multipart upload
//! - PUT  /api/v1/projects/:project_id/permissions - Grant a project role (admin)

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use futures::StreamExt;
use serde::Deserialize;

use crate::access::{require_project_permission, visible_projects, CurrentUser};
use crate::db::{CreateProject, Project, ProjectRepository, Role, UserRepository};
use crate::error::{AppError, Result};
use crate::routes::ArtifactResponse;
use crate::state::AppState;
use crate::storage::{FileInfo, ProjectStorage};

/// Create the projects router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_projects).post(create_project))
        .route(
            "/:project_id/files",
            get(list_files)
                .post(upload_file)
                .layer(DefaultBodyLimit::disable()),
        )
        .route("/:project_id/permissions", put(grant_permission))
}

#[derive(Debug, Deserialize)]
pub struct GrantPermission {
    pub user_id: i64,
    pub role: Role,
}

/// GET /api/v1/projects
async fn list_projects(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Project>>> {
    Ok(Json(visible_projects(&state, &user).await?))
}

/// POST /api/v1/projects
async fn create_project(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CreateProject>,
) -> Result<(StatusCode, Json<Project>)> {
    if !user.is_admin() {
        return Err(AppError::Forbidden(
            "Only administrators can create projects".to_string(),
        ));
    }
    if request.name.trim().is_empty() {
        return Err(AppError::BadRequest("project name is required".to_string()));
    }

    let storage_path = ProjectStorage::new_storage_path();
    let project = ProjectRepository::new(state.db())
        .create(&request, &storage_path)
        .await?;
    state.storage().create_project_dir(&storage_path).await?;

    Ok((StatusCode::CREATED, Json(project)))
}

/// PUT /api/v1/projects/:project_id/permissions
async fn grant_permission(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(project_id): Path<i64>,
    Json(request): Json<GrantPermission>,
) -> Result<StatusCode> {
    if !admin.is_admin() {
        return Err(AppError::Forbidden(
            "Only administrators can grant permissions".to_string(),
        ));
    }

    let projects = ProjectRepository::new(state.db());
    if projects.get(project_id).await?.is_none() {
        return Err(AppError::NotFound(format!("project {}", project_id)));
    }
    if UserRepository::new(state.db()).get(request.user_id).await?.is_none() {
        return Err(AppError::NotFound(format!("user {}", request.user_id)));
    }

    projects.grant(request.user_id, project_id, request.role).await?;
    tracing::info!(
        project_id = project_id,
        user_id = request.user_id,
        role = %request.role,
        granted_by = admin.id,
        "Granted project permission"
    );

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/projects/:project_id/files
async fn list_files(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(project_id): Path<i64>,
) -> Result<Json<Vec<FileInfo>>> {
    let access = require_project_permission(&state, &user, project_id, Role::Viewer).await?;
    let files = state.storage().list_files(&access.destination).await?;
    Ok(Json(files))
}

/// POST /api/v1/projects/:project_id/files
///
/// Streams the `file` field of a multipart body to disk. The size ceiling
/// is enforced while streaming, so no body limit applies here.
async fn upload_file(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(project_id): Path<i64>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ArtifactResponse>)> {
    let access = require_project_permission(&state, &user, project_id, Role::Editor).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::BadRequest("file field has no filename".to_string()))?;

        let stream = field.map(|block| {
            block.map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        });

        let artifact = state
            .uploads()
            .upload_direct(stream, &filename, None, &access.destination)
            .await?;

        tracing::info!(
            project_id = project_id,
            user_id = user.id,
            filename = %artifact.filename,
            size = artifact.size,
            "File uploaded"
        );

        return Ok((
            StatusCode::CREATED,
            Json(ArtifactResponse::new(state.storage(), artifact)),
        ));
    }

    Err(AppError::BadRequest("missing file field".to_string()))
}
