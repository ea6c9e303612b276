//! JSON-RPC endpoint
//!
//! `POST /api/mcp` exposes the project and upload operations to tool
//! clients. Every failure is reported inside the JSON-RPC envelope with code
//! `-32000`; the HTTP status stays 200 once the caller is authenticated.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    routing::post,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::access::{require_project_permission, visible_projects, CurrentUser};
use crate::db::{Role, User};
use crate::error::{AppError, Result};
use crate::routes::ArtifactResponse;
use crate::state::AppState;

/// Error code used for every method failure
pub const RPC_ERROR_CODE: i64 = -32000;

/// Create the JSON-RPC router
///
/// Payloads carry base64 data, so the body limit leaves room for the
/// encoding overhead of a full chunk.
pub fn router(chunk_limit: usize) -> Router<AppState> {
    let body_limit = chunk_limit.saturating_mul(2).max(2 * 1024 * 1024);
    Router::new().route(
        "/api/mcp",
        post(handle).layer(DefaultBodyLimit::max(body_limit)),
    )
}

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    fn failure(id: Value, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcError {
                code: RPC_ERROR_CODE,
                message,
            }),
            id,
        }
    }
}

// ============================================================================
// Parameters
// ============================================================================

#[derive(Debug, Deserialize)]
struct ProjectParams {
    project_id: i64,
}

#[derive(Debug, Deserialize)]
struct UploadFileParams {
    project_id: i64,
    filename: String,
    /// Base64 encoded file content
    content: String,
}

#[derive(Debug, Deserialize)]
struct InitiateParams {
    project_id: i64,
    filename: String,
    #[serde(alias = "size")]
    file_size: u64,
}

#[derive(Debug, Deserialize)]
struct ChunkParams {
    project_id: i64,
    #[serde(alias = "upload_id")]
    session_id: String,
    #[serde(alias = "index")]
    chunk_index: u64,
    /// Base64 encoded chunk bytes
    data: String,
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FinalizeParams {
    project_id: i64,
    #[serde(alias = "upload_id")]
    session_id: String,
    total_chunks: u64,
    filename: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/mcp
async fn handle(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<RpcRequest>,
) -> Json<RpcResponse> {
    if request.jsonrpc.as_deref().is_some_and(|v| v != "2.0") {
        tracing::debug!(version = ?request.jsonrpc, "Unexpected JSON-RPC version");
    }

    let id = request.id;
    match dispatch(&state, &user, &request.method, request.params).await {
        Ok(result) => Json(RpcResponse::success(id, result)),
        Err(e) => {
            if e.status_code().is_server_error() {
                tracing::error!(method = %request.method, error = %e, "RPC method failed");
            } else {
                tracing::debug!(method = %request.method, error = %e, "RPC method rejected");
            }
            Json(RpcResponse::failure(id, e.public_message()))
        }
    }
}

async fn dispatch(state: &AppState, user: &User, method: &str, params: Value) -> Result<Value> {
    match method {
        "list_projects" => to_value(visible_projects(state, user).await?),

        "get_project_files" => {
            let params: ProjectParams = parse_params(params)?;
            let access =
                require_project_permission(state, user, params.project_id, Role::Viewer).await?;
            to_value(state.storage().list_files(&access.destination).await?)
        }

        "upload_file" => {
            let params: UploadFileParams = parse_params(params)?;
            let access =
                require_project_permission(state, user, params.project_id, Role::Editor).await?;
            let content = decode_base64(&params.content)?;
            let size = content.len() as u64;

            let stream = futures::stream::once(async move { Ok(Bytes::from(content)) });
            let artifact = state
                .uploads()
                .upload_direct(stream, &params.filename, Some(size), &access.destination)
                .await?;
            to_value(ArtifactResponse::new(state.storage(), artifact))
        }

        "initiate_resumable_upload" => {
            let params: InitiateParams = parse_params(params)?;
            let access =
                require_project_permission(state, user, params.project_id, Role::Editor).await?;
            to_value(
                state
                    .uploads()
                    .initiate(&params.filename, params.file_size, &access.destination)
                    .await?,
            )
        }

        "upload_chunk" => {
            let params: ChunkParams = parse_params(params)?;
            let access =
                require_project_permission(state, user, params.project_id, Role::Editor).await?;
            let data = decode_base64(&params.data)?;
            to_value(
                state
                    .uploads()
                    .accept_chunk(
                        &params.session_id,
                        params.chunk_index,
                        &data,
                        params.filename.as_deref(),
                        &access.destination,
                    )
                    .await?,
            )
        }

        "finalize_upload" => {
            let params: FinalizeParams = parse_params(params)?;
            let access =
                require_project_permission(state, user, params.project_id, Role::Editor).await?;
            let artifact = state
                .uploads()
                .finalize(
                    &params.session_id,
                    params.filename.as_deref(),
                    params.total_chunks,
                    &access.destination,
                )
                .await?;
            to_value(ArtifactResponse::new(state.storage(), artifact))
        }

        "download_file" => Err(AppError::BadRequest(
            "Use dedicated download endpoint /api/download/{project_id}/{file_path}".to_string(),
        )),

        other => Err(AppError::BadRequest(format!("Unknown method: {}", other))),
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| AppError::BadRequest(format!("Invalid params: {}", e)))
}

fn decode_base64(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| AppError::BadRequest(format!("Invalid base64 data: {}", e)))
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| AppError::Internal(e.to_string()))
}
