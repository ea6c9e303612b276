//! File download routes
//!
//! Streams finished project files from the upload root.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Router,
};

use crate::access::{require_project_permission, CurrentUser};
use crate::db::Role;
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Create the download router
pub fn router() -> Router<AppState> {
    Router::new().route("/:project_id/*file_path", get(download_file))
}

/// GET /api/download/:project_id/*file_path
async fn download_file(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((project_id, file_path)): Path<(i64, String)>,
) -> Result<Response> {
    let access = require_project_permission(&state, &user, project_id, Role::Viewer).await?;

    let file_path = file_path.trim_start_matches('/');
    let opened = state
        .uploads()
        .open_download(&access.destination, file_path)
        .await?;

    // Get filename for Content-Disposition
    let filename = file_path.rsplit('/').next().unwrap_or(file_path);
    let content_type = mime_guess::from_path(filename).first_or_octet_stream();

    tracing::debug!(
        project_id = project_id,
        path = %file_path,
        size = opened.size,
        "Streaming download"
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::CONTENT_LENGTH, opened.size)
        .header(header::CONTENT_DISPOSITION, content_disposition(filename))
        .body(Body::from_stream(opened.stream))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Attachment disposition with an ASCII fallback and an RFC 5987 name
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::TestApp;

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            content_disposition("report.pdf"),
            "attachment; filename=\"report.pdf\"; filename*=UTF-8''report.pdf"
        );
        assert_eq!(
            content_disposition("résumé \"v2\".pdf"),
            "attachment; filename=\"r_sum_ _v2_.pdf\"; filename*=UTF-8''r%C3%A9sum%C3%A9%20%22v2%22.pdf"
        );
    }

    #[tokio::test]
    async fn test_download_streams_file() {
        let app = TestApp::new().await;
        let dir = app.project_dir();
        std::fs::create_dir_all(dir.join("assets")).unwrap();
        std::fs::write(dir.join("assets/site.css"), b"body { margin: 0 }").unwrap();

        let (name, value) = app.as_user(&app.viewer);
        let response = app
            .server
            .get(&format!("/api/download/{}/assets/site.css", app.project.id))
            .add_header(name, value)
            .await;

        response.assert_status_ok();
        assert_eq!(response.as_bytes().as_ref(), b"body { margin: 0 }");
        assert_eq!(response.header(header::CONTENT_TYPE), "text/css");
        assert_eq!(response.header(header::CONTENT_LENGTH), "18");
        assert!(response
            .header(header::CONTENT_DISPOSITION)
            .to_str()
            .unwrap()
            .starts_with("attachment; filename=\"site.css\""));
    }

    #[tokio::test]
    async fn test_download_missing_and_hidden_paths() {
        let app = TestApp::new().await;
        app.state
            .uploads()
            .store()
            .save_chunk(&app.project_dir(), "a.txt", 0, b"x")
            .await
            .unwrap();

        for path in ["missing.txt", ".chunks/a.txt/chunk_00000000"] {
            let (name, value) = app.as_user(&app.viewer);
            let response = app
                .server
                .get(&format!("/api/download/{}/{}", app.project.id, path))
                .add_header(name, value)
                .await;
            response.assert_status(StatusCode::NOT_FOUND);
        }
    }
}
