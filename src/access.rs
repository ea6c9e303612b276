//! Request identity and project permission checks
//!
//! Requests authenticate with an `Authorization: Bearer <token>` header. When
//! `AUTH_TRUST_USER_HEADER` is enabled, the `x-user-id` header set by an
//! authenticating proxy is accepted as well.

use std::path::PathBuf;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header::AUTHORIZATION, request::Parts};

use crate::auth::INVALID_CREDENTIALS;
use crate::db::{Project, ProjectRepository, Role, User, UserRepository};
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Header carrying a proxy-asserted user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated, active user making the request
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        if let Some(token) = bearer_token(parts) {
            let claims = state.auth().validate_token(token)?;
            return Ok(CurrentUser(authenticate(state, &claims.sub).await?));
        }

        if state.config().auth.trust_user_header {
            if let Some(raw) = parts
                .headers
                .get(USER_ID_HEADER)
                .and_then(|value| value.to_str().ok())
            {
                return Ok(CurrentUser(authenticate(state, raw).await?));
            }
        }

        Err(AppError::Unauthorized("Not authenticated".to_string()))
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

/// Resolve a raw user id to an active user
pub async fn authenticate(state: &AppState, raw_user_id: &str) -> Result<User> {
    let id: i64 = raw_user_id
        .trim()
        .parse()
        .map_err(|_| AppError::Unauthorized(INVALID_CREDENTIALS.to_string()))?;

    UserRepository::new(state.db())
        .get(id)
        .await?
        .filter(|user| user.is_active)
        .ok_or_else(|| AppError::Unauthorized(INVALID_CREDENTIALS.to_string()))
}

/// A project the user may act on, with its directory resolved
#[derive(Debug, Clone)]
pub struct ProjectAccess {
    pub project: Project,
    pub destination: PathBuf,
}

/// Check that `user` holds at least `required` on a project
///
/// Global admins pass every check. Unknown projects are `NotFound`.
pub async fn require_project_permission(
    state: &AppState,
    user: &User,
    project_id: i64,
    required: Role,
) -> Result<ProjectAccess> {
    let projects = ProjectRepository::new(state.db());
    let project = projects
        .get(project_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("project {}", project_id)))?;

    if !user.is_admin() {
        let role = projects
            .permission(user.id, project_id)
            .await?
            .ok_or_else(|| AppError::Forbidden("No access to this project".to_string()))?;

        if !role.satisfies(required) {
            return Err(AppError::Forbidden(format!(
                "Insufficient permissions. Required: {}",
                required
            )));
        }
    }

    let destination = state
        .storage()
        .project_dir(&project.storage_path)
        .ok_or_else(|| {
            AppError::Internal(format!(
                "project {} has an invalid storage path",
                project.id
            ))
        })?;

    Ok(ProjectAccess {
        project,
        destination,
    })
}

/// Projects visible to a user; admins see all
pub async fn visible_projects(state: &AppState, user: &User) -> Result<Vec<Project>> {
    let projects = ProjectRepository::new(state.db());
    if user.is_admin() {
        projects.list_all().await
    } else {
        projects.list_for_user(user.id).await
    }
}
