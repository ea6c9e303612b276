//! Login route
//!
//! `POST /token` takes an `application/x-www-form-urlencoded` body with
//! `username` and `password` and returns a bearer access token.

use axum::{extract::State, routing::post, Form, Json, Router};
use serde::Deserialize;

use crate::auth::AccessToken;
use crate::db::UserRepository;
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Create the login router
pub fn router() -> Router<AppState> {
    Router::new().route("/token", post(login))
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// POST /token
async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Json<AccessToken>> {
    let rejected = || AppError::Unauthorized("Incorrect username or password".to_string());
    let users = UserRepository::new(state.db());

    let user = users
        .get_by_username(&form.username)
        .await?
        .filter(|user| user.is_active)
        .ok_or_else(rejected)?;
    let stored = users.password_hash(user.id).await?.ok_or_else(rejected)?;

    if !state.auth().verify_password(&form.password, &stored).await? {
        tracing::debug!(username = %form.username, "Login failed");
        return Err(rejected());
    }

    let token = state.auth().issue_token(&user)?;
    tracing::info!(user_id = user.id, username = %user.username, "Issued access token");
    Ok(Json(token))
}
