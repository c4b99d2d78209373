use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Durable per-identity record. One row per provider identity, created on
/// first login and mutated only by quota accounting and window resets.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub provider_id: String,
    pub email: String,
    pub display_name: String,
    pub avatar_url: String,
    pub plan: String,
    pub mp3_count: i64,
    pub mp4_count: i64,
    /// Start of the rolling 30-day counter window, unix seconds.
    pub window_start: i64,
}

/// Identity fields handed over by the provider after the code exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderIdentity {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub picture: String,
}
