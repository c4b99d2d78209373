use std::collections::HashMap;
use serde::Deserialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::account::ProviderIdentity;

const AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const USERINFO_ENDPOINT: &str = "https://www.googleapis.com/oauth2/v1/userinfo";

/// A login must return through the callback within this window.
const STATE_TTL_SECONDS: i64 = 5 * 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Authorization-code exchange with the identity provider. The provider is
/// an opaque boundary: it takes a code and returns a verified identity.
pub struct OAuthClient {
    client_id: String,
    client_secret: String,
    redirect_url: String,
    http: reqwest::Client,
    pending_states: Mutex<HashMap<String, i64>>,
}

impl OAuthClient {
    pub fn new(client_id: String, client_secret: String, redirect_url: String) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_url,
            http: reqwest::Client::new(),
            pending_states: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a fresh state nonce and builds the provider redirect URL.
    pub async fn begin_login(&self, now: i64) -> String {
        let state = Uuid::new_v4().simple().to_string();

        {
            let mut pending = self.pending_states.lock().await;
            pending.retain(|_, created_at| now - *created_at <= STATE_TTL_SECONDS);
            pending.insert(state.clone(), now);
        }

        let url = reqwest::Url::parse_with_params(
            AUTHORIZE_ENDPOINT,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", "openid email profile"),
                ("state", state.as_str()),
            ],
        )
        .expect("authorize endpoint is a valid base URL");

        url.into()
    }

    /// Exchanges the callback code for the provider identity. The state
    /// nonce is consumed first; an unknown or expired nonce fails before any
    /// network call.
    pub async fn finish_login(&self, state: &str, code: &str, now: i64) -> Result<ProviderIdentity> {
        if !self.take_state(state, now).await {
            return Err(AppError::Auth(
                "Login session expired or invalid. Please try again.".to_string(),
            ));
        }

        let token: TokenResponse = self
            .http
            .post(TOKEN_ENDPOINT)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let identity: ProviderIdentity = self
            .http
            .get(USERINFO_ENDPOINT)
            .bearer_auth(&token.access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(identity)
    }

    async fn take_state(&self, state: &str, now: i64) -> bool {
        let mut pending = self.pending_states.lock().await;
        match pending.remove(state) {
            Some(created_at) => now - created_at <= STATE_TTL_SECONDS,
            None => false,
        }
    }
}
