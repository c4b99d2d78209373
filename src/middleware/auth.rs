use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderValue},
    response::Response,
};
use uuid::Uuid;

use crate::{auth::JwtService, handlers::AppState, services::quota::Identity};

pub const SESSION_COOKIE: &str = "sid";
pub const TOKEN_COOKIE: &str = "token";

#[derive(Debug, Clone)]
pub struct AuthenticatedAccount {
    pub id: i64,
    pub email: String,
}

#[derive(Debug, Clone, Copy)]
pub struct AnonymousSession {
    pub id: Uuid,
    /// Set when no session cookie came with the request; the handler sends
    /// the cookie back so the counters stick to this client.
    pub is_new: bool,
}

/// The resolved caller of a request. Extracted once per request and passed
/// explicitly into the quota ledger; resolution never rejects, it falls back
/// to an anonymous session.
#[derive(Debug, Clone)]
pub enum Caller {
    Account(AuthenticatedAccount),
    Anonymous(AnonymousSession),
}

impl Caller {
    pub fn identity(&self) -> Identity {
        match self {
            Caller::Account(account) => Identity::Account(account.id),
            Caller::Anonymous(session) => Identity::Session(session.id),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let token = bearer_token(parts).or_else(|| cookie_value(parts, TOKEN_COOKIE));

        if let Some(token) = token {
            let jwt_service = JwtService::new(&state.config.jwt_secret);
            if let Ok(claims) = jwt_service.verify_session_token(&token) {
                if let Ok(account_id) = claims.sub.parse::<i64>() {
                    // The account must still exist; a stale token degrades to
                    // an anonymous session rather than failing the request.
                    if let Ok(Some(account)) = state.database.find_by_id(account_id).await {
                        return Ok(Caller::Account(AuthenticatedAccount {
                            id: account.id,
                            email: account.email,
                        }));
                    }
                }
            }
        }

        let session = match cookie_value(parts, SESSION_COOKIE)
            .and_then(|value| Uuid::parse_str(&value).ok())
        {
            Some(id) => AnonymousSession { id, is_new: false },
            None => AnonymousSession {
                id: Uuid::new_v4(),
                is_new: true,
            },
        };

        Ok(Caller::Anonymous(session))
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(ToString::to_string)
}

fn cookie_value(parts: &Parts, name: &str) -> Option<String> {
    let cookies = parts.headers.get(header::COOKIE)?.to_str().ok()?;
    cookies
        .split(';')
        .map(str::trim)
        .find_map(|pair| match pair.split_once('=') {
            Some((key, value)) if key == name => Some(value.to_string()),
            _ => None,
        })
}

pub fn session_cookie(session_id: Uuid) -> String {
    format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax")
}

pub fn token_cookie(token: &str) -> String {
    format!("{TOKEN_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax")
}

pub fn clear_token_cookie() -> String {
    format!("{TOKEN_COOKIE}=; Path=/; HttpOnly; Max-Age=0")
}

/// Sends the session cookie back to first-time anonymous callers.
pub fn attach_session_cookie(caller: &Caller, mut response: Response) -> Response {
    if let Caller::Anonymous(session) = caller {
        if session.is_new {
            if let Ok(value) = HeaderValue::from_str(&session_cookie(session.id)) {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
        }
    }
    response
}
