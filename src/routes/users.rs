//! User routes
//!
//! Endpoints:
//! - GET  /api/v1/users/me - The authenticated user
//! - POST /api/v1/users - Create a user with a password (admin)

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::access::CurrentUser;
use crate::db::{Role, User, UserRepository};
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Create the users router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_user))
        .route("/me", get(current_user))
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub username: String,
    pub email: Option<String>,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::Viewer
}

/// GET /api/v1/users/me
async fn current_user(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

/// POST /api/v1/users
async fn create_user(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Json(request): Json<CreateUser>,
) -> Result<(StatusCode, Json<User>)> {
    if !admin.is_admin() {
        return Err(AppError::Forbidden(
            "Only administrators can create users".to_string(),
        ));
    }
    if request.username.trim().is_empty() {
        return Err(AppError::BadRequest("username is required".to_string()));
    }
    if request.password.is_empty() {
        return Err(AppError::BadRequest("password is required".to_string()));
    }

    let users = UserRepository::new(state.db());
    if users.get_by_username(&request.username).await?.is_some() {
        return Err(AppError::Conflict(format!(
            "user {} already exists",
            request.username
        )));
    }

    let password_hash = state.auth().hash_password(&request.password).await?;
    let user = users
        .create(&request.username, request.email.as_deref(), request.role)
        .await?;
    users.set_password_hash(user.id, &password_hash).await?;

    Ok((StatusCode::CREATED, Json(user)))
}
