use axum::{
    extract::State,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

use crate::{
    errors::Result,
    handlers::AppState,
    middleware::auth::{attach_session_cookie, Caller},
};

/// Current quota and plan status for the caller, authenticated or
/// anonymous-by-session.
pub async fn status(State(state): State<AppState>, caller: Caller) -> Result<Response> {
    let report = state.ledger.usage(caller.identity()).await?;

    let body = match &report.account {
        Some(account) => json!({
            "logged_in": true,
            "name": account.display_name,
            "picture": account.avatar_url,
            "plan": account.plan,
            "plan_name": report.plan.name,
            "limits": report.plan,
            "usage": {
                "mp3": report.mp3,
                "mp4": report.mp4
            }
        }),
        None => json!({
            "logged_in": false,
            "plan": report.plan.id,
            "plan_name": report.plan.name,
            "limits": report.plan,
            "usage": {
                "mp3": report.mp3,
                "mp4": report.mp4
            }
        }),
    };

    Ok(attach_session_cookie(&caller, Json(body).into_response()))
}
