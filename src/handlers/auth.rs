use axum::{
    extract::{Query, State},
    http::header::SET_COOKIE,
    response::{AppendHeaders, IntoResponse, Redirect, Response},
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::{
    auth::JwtService,
    errors::{AppError, Result},
    handlers::AppState,
    middleware::auth::{clear_token_cookie, token_cookie},
};

/// Sends the browser to the identity provider's consent screen.
pub async fn login(State(state): State<AppState>) -> Result<Redirect> {
    let url = state.oauth.begin_login(Utc::now().timestamp()).await;
    Ok(Redirect::temporary(&url))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Provider callback: exchanges the code for a verified identity, looks up
/// or creates the account, and starts a signed session.
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response> {
    if let Some(error) = query.error {
        return Err(AppError::Auth(format!("Login failed: {error}")));
    }
    let code = query
        .code
        .ok_or_else(|| AppError::Auth("Login failed: missing authorization code".to_string()))?;
    let login_state = query
        .state
        .ok_or_else(|| AppError::Auth("Login failed: missing state".to_string()))?;

    let identity = state
        .oauth
        .finish_login(&login_state, &code, Utc::now().timestamp())
        .await?;

    let account = state
        .database
        .upsert_account(&identity, Utc::now().timestamp())
        .await?;

    info!(account_id = account.id, "login completed");

    let jwt_service = JwtService::new(&state.config.jwt_secret);
    let token = jwt_service.generate_session_token(account.id, &account.email)?;

    Ok((
        AppendHeaders([(SET_COOKIE, token_cookie(&token))]),
        Redirect::to("/"),
    )
        .into_response())
}

pub async fn logout() -> Response {
    (
        AppendHeaders([(SET_COOKIE, clear_token_cookie())]),
        Redirect::to("/"),
    )
        .into_response()
}
