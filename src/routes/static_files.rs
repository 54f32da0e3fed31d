use crate::server::SharedState;
use axum::{
    extract::{Path as UrlPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::path::{Component, Path, PathBuf};
use tracing::instrument;

#[instrument(skip(state))]
pub async fn static_file(
    State(state): State<SharedState>,
    UrlPath(path): UrlPath<String>,
) -> Response {
    let Some(relative) = sanitize(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let full_path = state.static_dir.join(relative);

    match tokio::fs::read(&full_path).await {
        Ok(contents) => (
            [(header::CONTENT_TYPE, content_type_for(&full_path))],
            contents,
        )
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

// Only plain relative components may reach the filesystem.
fn sanitize(path: &str) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            _ => return None,
        }
    }

    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
