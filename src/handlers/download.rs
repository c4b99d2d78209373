use axum::{
    extract::State,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::{
    errors::{AppError, Result},
    handlers::AppState,
    middleware::auth::{attach_session_cookie, Caller},
    models::{ConversionRequest, MediaKind},
};

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: String,
    #[serde(rename = "type", default)]
    pub kind: MediaKind,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_quality")]
    pub quality: String,
}

fn default_format() -> String {
    "mp3".to_string()
}

fn default_quality() -> String {
    "192".to_string()
}

/// One synchronous conversion: admit against the caller's quota, delegate to
/// the engine, and report the placed artifact. A quota slot is reserved up
/// front and returned if the engine fails.
pub async fn convert(
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<DownloadRequest>,
) -> Result<Response> {
    let url = payload.url.trim().to_string();
    if url.is_empty() {
        return Err(AppError::InvalidInput("No URL provided".to_string()));
    }

    let video_height = match payload.kind {
        MediaKind::Video => Some(payload.quality.trim().parse::<u32>().map_err(|_| {
            AppError::InvalidInput("Invalid quality value".to_string())
        })?),
        MediaKind::Audio => None,
    };

    let reservation = state
        .ledger
        .reserve(caller.identity(), payload.kind, video_height)
        .await?;

    let request = ConversionRequest {
        url,
        kind: payload.kind,
        format: payload.format,
        quality: payload.quality,
        video_height,
    };

    let outcome = match state.gateway.convert(&request).await {
        Ok(outcome) => outcome,
        Err(conversion_error) => {
            if let Err(release_error) = state.ledger.release(reservation).await {
                error!("failed to roll back quota reservation: {release_error}");
            }
            return Err(conversion_error);
        }
    };

    let mut body = json!({
        "success": true,
        "filename": outcome.filename,
        "type": outcome.kind.as_str(),
        "size": outcome.size
    });
    if let Some(quality) = &outcome.quality {
        body["quality"] = json!(quality);
    }

    Ok(attach_session_cookie(&caller, Json(body).into_response()))
}
