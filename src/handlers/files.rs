use std::io::ErrorKind;
use std::path::Path;

use axum::{
    body::Body,
    extract::{Path as PathParam, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
        HeaderValue,
    },
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;

use crate::{
    errors::{AppError, Result},
    handlers::AppState,
};

/// Streams a finished artifact out of the shared output directory as an
/// attachment. The request path is normalized to a bare file name before
/// lookup, so traversal segments never leave the directory.
pub async fn fetch(
    State(state): State<AppState>,
    PathParam(filename): PathParam<String>,
) -> Result<Response> {
    let name = Path::new(&filename)
        .file_name()
        .and_then(|name| name.to_str())
        .map(ToString::to_string)
        .ok_or_else(|| AppError::InvalidInput("Invalid file name".to_string()))?;

    let path = state.gateway.download_dir().join(&name);
    let file = tokio::fs::File::open(&path).await.map_err(|error| {
        if error.kind() == ErrorKind::NotFound {
            AppError::NotFound
        } else {
            AppError::Storage(format!("Failed to open file: {error}"))
        }
    })?;

    let metadata = file
        .metadata()
        .await
        .map_err(|error| AppError::Storage(format!("Failed to read file metadata: {error}")))?;

    let content_type = mime_guess::from_path(&name).first_or_octet_stream();
    let content_type = HeaderValue::from_str(content_type.as_ref())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let body = Body::from_stream(ReaderStream::new(file));
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, content_type);
    if let Ok(length) = HeaderValue::from_str(&metadata.len().to_string()) {
        headers.insert(CONTENT_LENGTH, length);
    }
    if let Ok(disposition) = HeaderValue::from_str(&content_disposition(&name)) {
        headers.insert(CONTENT_DISPOSITION, disposition);
    }

    Ok(response)
}

/// ASCII-safe attachment header; anything a header cannot carry becomes '_'.
fn content_disposition(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}
