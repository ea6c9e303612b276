//! Route modules for Depot Server

pub mod auth;
pub mod files;
pub mod health;
pub mod mcp;
pub mod projects;
pub mod upload;
pub mod users;

use axum::{routing::get, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::storage::ProjectStorage;
use crate::upload::{Artifact, FileCategory};

/// Build the application router
pub fn app(state: AppState) -> Router {
    let chunk_limit = usize::try_from(state.config().upload.chunk_size).unwrap_or(usize::MAX);

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .merge(auth::router())
        .nest("/api/v1/users", users::router())
        .nest(
            "/api/v1/projects",
            projects::router().merge(upload::router(chunk_limit)),
        )
        .nest("/api/download", files::router())
        .merge(mcp::router(chunk_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// A stored file as reported to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactResponse {
    pub filename: String,
    pub size: u64,
    /// Path relative to the upload root
    pub path: String,
    pub category: FileCategory,
}

impl ArtifactResponse {
    pub fn new(storage: &ProjectStorage, artifact: Artifact) -> Self {
        Self {
            path: storage.relative_to_root(&artifact.path),
            filename: artifact.filename,
            size: artifact.size,
            category: artifact.category,
        }
    }
}
