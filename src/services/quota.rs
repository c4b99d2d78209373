use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::database::Database;
use crate::errors::{AppError, Result};
use crate::models::{Account, MediaKind, Plan, PlanCatalog};
use crate::services::session::SessionStore;

/// Rolling counter window.
pub const WINDOW_SECONDS: i64 = 30 * 24 * 60 * 60;

/// The caller a quota decision applies to. Always passed explicitly; there
/// is no ambient current-user state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Account(i64),
    Session(Uuid),
}

/// Proof that a counter slot was taken. Handed back to `release` when the
/// engine fails so the slot is returned.
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    pub identity: Identity,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaMetric {
    pub used: i64,
    pub limit: i64,
    pub remaining: i64,
}

impl QuotaMetric {
    fn new(used: i64, limit: i64) -> Self {
        Self {
            used,
            limit,
            remaining: (limit - used).max(0),
        }
    }
}

/// Per-kind usage against the caller's plan, for the status endpoint.
#[derive(Debug, Clone)]
pub struct UsageReport {
    pub plan: Plan,
    pub account: Option<Account>,
    pub mp3: QuotaMetric,
    pub mp4: QuotaMetric,
}

/// Admission and consumption tracking for both identified and anonymous
/// callers. Admission check and counter advance are a single conditional
/// increment, so concurrent requests cannot push a counter past its limit.
#[derive(Clone)]
pub struct QuotaLedger {
    database: Database,
    sessions: SessionStore,
    catalog: Arc<PlanCatalog>,
}

impl QuotaLedger {
    pub fn new(database: Database, sessions: SessionStore, catalog: Arc<PlanCatalog>) -> Self {
        Self {
            database,
            sessions,
            catalog,
        }
    }

    /// Takes one counter slot for the request, or explains why not.
    /// `video_height` must be set for video requests so the plan's quality
    /// ceiling can be enforced before any slot is taken.
    pub async fn reserve(
        &self,
        identity: Identity,
        kind: MediaKind,
        video_height: Option<u32>,
    ) -> Result<Reservation> {
        let now = Utc::now().timestamp();
        match identity {
            Identity::Account(account_id) => {
                self.reserve_for_account(account_id, kind, video_height, now).await
            }
            Identity::Session(session_id) => {
                self.reserve_for_session(session_id, kind, video_height, now).await
            }
        }
    }

    /// Returns a slot taken by `reserve` after a failed conversion. Work
    /// that produced no artifact never consumes quota.
    pub async fn release(&self, reservation: Reservation) -> Result<()> {
        match reservation.identity {
            Identity::Account(account_id) => {
                self.database.release(account_id, reservation.kind).await
            }
            Identity::Session(session_id) => {
                self.sessions.release(session_id, reservation.kind).await;
                Ok(())
            }
        }
    }

    pub async fn usage(&self, identity: Identity) -> Result<UsageReport> {
        let now = Utc::now().timestamp();
        match identity {
            Identity::Account(account_id) => {
                self.reset_if_window_elapsed(account_id, now).await?;
                let account = self
                    .database
                    .find_by_id(account_id)
                    .await?
                    .ok_or_else(|| AppError::Auth("Account no longer exists".to_string()))?;
                let plan = self.catalog.plan_for(&account.plan).clone();
                let mp3 = QuotaMetric::new(account.mp3_count, plan.mp3_limit);
                let mp4 = QuotaMetric::new(account.mp4_count, plan.mp4_limit);
                Ok(UsageReport {
                    plan,
                    account: Some(account),
                    mp3,
                    mp4,
                })
            }
            Identity::Session(session_id) => {
                let plan = self.catalog.free().clone();
                let usage = self.sessions.usage(session_id).await;
                Ok(UsageReport {
                    mp3: QuotaMetric::new(usage.mp3_count, plan.mp3_limit),
                    mp4: QuotaMetric::new(usage.mp4_count, plan.mp4_limit),
                    plan,
                    account: None,
                })
            }
        }
    }

    /// Zeroes the counters once the window is more than 30 days old. Runs
    /// before every admission check and usage report for an account; the
    /// conditional update in the store makes a concurrent double reset
    /// impossible.
    async fn reset_if_window_elapsed(&self, account_id: i64, now: i64) -> Result<()> {
        self.database
            .reset_window(account_id, now - WINDOW_SECONDS, now)
            .await?;
        Ok(())
    }

    async fn reserve_for_account(
        &self,
        account_id: i64,
        kind: MediaKind,
        video_height: Option<u32>,
        now: i64,
    ) -> Result<Reservation> {
        self.reset_if_window_elapsed(account_id, now).await?;

        let account = self
            .database
            .find_by_id(account_id)
            .await?
            .ok_or_else(|| AppError::Auth("Account no longer exists".to_string()))?;
        let plan = self.catalog.plan_for(&account.plan);

        if let Some(height) = video_height {
            if height > plan.max_quality {
                return Err(AppError::QuotaDenied(format!(
                    "Quality limit exceeded. Your {} plan allows maximum {}p.",
                    plan.name, plan.max_quality
                )));
            }
        }

        let limit = plan.limit_for(kind);
        if !self.database.try_reserve(account_id, kind, limit).await? {
            let label = match kind {
                MediaKind::Audio => "MP3",
                MediaKind::Video => "MP4",
            };
            return Err(AppError::QuotaDenied(format!(
                "{label} download limit reached. Please upgrade your plan."
            )));
        }

        Ok(Reservation {
            identity: Identity::Account(account_id),
            kind,
        })
    }

    async fn reserve_for_session(
        &self,
        session_id: Uuid,
        kind: MediaKind,
        video_height: Option<u32>,
        now: i64,
    ) -> Result<Reservation> {
        let plan = self.catalog.free();

        if let Some(height) = video_height {
            if height > plan.max_quality {
                return Err(AppError::QuotaDenied(format!(
                    "Free plan limited to {}p. Please upgrade to access higher quality.",
                    plan.max_quality
                )));
            }
        }

        let limit = plan.limit_for(kind);
        if !self.sessions.try_reserve(session_id, kind, limit, now).await {
            return Err(AppError::QuotaDenied(format!(
                "Free limit reached ({limit} downloads). Please sign in to continue."
            )));
        }

        Ok(Reservation {
            identity: Identity::Session(session_id),
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::account::ProviderIdentity;

    async fn setup_ledger() -> QuotaLedger {
        let database = Database::connect("sqlite::memory:", 1)
            .await
            .expect("Failed to open in-memory database");
        database.migrate().await.expect("Failed to run migrations");
        QuotaLedger::new(
            database,
            SessionStore::new(3600),
            Arc::new(PlanCatalog::builtin()),
        )
    }

    async fn create_account(ledger: &QuotaLedger, plan: &str) -> Account {
        let identity = ProviderIdentity {
            id: format!("provider-{plan}"),
            email: format!("{plan}@example.com"),
            name: "Test User".to_string(),
            picture: String::new(),
        };
        let account = ledger
            .database
            .upsert_account(&identity, Utc::now().timestamp())
            .await
            .unwrap();
        sqlx::query("UPDATE accounts SET plan = ? WHERE id = ?")
            .bind(plan)
            .bind(account.id)
            .execute(ledger.database.pool())
            .await
            .unwrap();
        ledger.database.find_by_id(account.id).await.unwrap().unwrap()
    }

    async fn set_counter(ledger: &QuotaLedger, account_id: i64, kind: MediaKind, value: i64) {
        let query = match kind {
            MediaKind::Audio => "UPDATE accounts SET mp3_count = ? WHERE id = ?",
            MediaKind::Video => "UPDATE accounts SET mp4_count = ? WHERE id = ?",
        };
        sqlx::query(query)
            .bind(value)
            .bind(account_id)
            .execute(ledger.database.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_counter_tracks_successful_reservations() {
        let ledger = setup_ledger().await;
        let account = create_account(&ledger, "free").await;

        for _ in 0..3 {
            ledger
                .reserve(Identity::Account(account.id), MediaKind::Audio, None)
                .await
                .unwrap();
        }

        let report = ledger.usage(Identity::Account(account.id)).await.unwrap();
        assert_eq!(report.mp3.used, 3);
        assert_eq!(report.mp3.remaining, 2);
        assert_eq!(report.mp4.used, 0);
    }

    #[tokio::test]
    async fn test_last_slot_is_admitted_then_denied() {
        let ledger = setup_ledger().await;
        let account = create_account(&ledger, "free").await;
        set_counter(&ledger, account.id, MediaKind::Audio, 4).await;

        // Pre-increment counter of 4 against a limit of 5 is still allowed.
        ledger
            .reserve(Identity::Account(account.id), MediaKind::Audio, None)
            .await
            .unwrap();

        let denial = ledger
            .reserve(Identity::Account(account.id), MediaKind::Audio, None)
            .await
            .unwrap_err();
        assert!(denial.to_string().contains("limit reached"));

        let report = ledger.usage(Identity::Account(account.id)).await.unwrap();
        assert_eq!(report.mp3.used, 5);
    }

    #[tokio::test]
    async fn test_basic_plan_at_audio_limit_leaves_video_untouched() {
        let ledger = setup_ledger().await;
        let account = create_account(&ledger, "basic").await;
        set_counter(&ledger, account.id, MediaKind::Audio, 100).await;

        let denial = ledger
            .reserve(Identity::Account(account.id), MediaKind::Audio, None)
            .await
            .unwrap_err();
        assert!(denial.to_string().contains("MP3 download limit reached"));

        let report = ledger.usage(Identity::Account(account.id)).await.unwrap();
        assert_eq!(report.mp3.used, 100);
        assert_eq!(report.mp4.used, 0);
    }

    #[tokio::test]
    async fn test_quality_ceiling_beats_remaining_headroom() {
        let ledger = setup_ledger().await;
        let account = create_account(&ledger, "basic").await;

        let denial = ledger
            .reserve(Identity::Account(account.id), MediaKind::Video, Some(1080))
            .await
            .unwrap_err();
        assert!(denial.to_string().contains("Quality limit exceeded"));
        assert!(denial.to_string().contains("720p"));

        // The denial must not have taken a slot.
        let report = ledger.usage(Identity::Account(account.id)).await.unwrap();
        assert_eq!(report.mp4.used, 0);
    }

    #[tokio::test]
    async fn test_release_returns_the_slot() {
        let ledger = setup_ledger().await;
        let account = create_account(&ledger, "free").await;

        let reservation = ledger
            .reserve(Identity::Account(account.id), MediaKind::Video, Some(480))
            .await
            .unwrap();
        ledger.release(reservation).await.unwrap();

        let report = ledger.usage(Identity::Account(account.id)).await.unwrap();
        assert_eq!(report.mp4.used, 0);
    }

    #[tokio::test]
    async fn test_window_reset_precedes_admission() {
        let ledger = setup_ledger().await;
        let account = create_account(&ledger, "free").await;
        set_counter(&ledger, account.id, MediaKind::Audio, 5).await;
        set_counter(&ledger, account.id, MediaKind::Video, 2).await;

        let thirty_one_days_ago = Utc::now().timestamp() - 31 * 24 * 60 * 60;
        sqlx::query("UPDATE accounts SET window_start = ? WHERE id = ?")
            .bind(thirty_one_days_ago)
            .bind(account.id)
            .execute(ledger.database.pool())
            .await
            .unwrap();

        // At the limit, but the elapsed window resets counters first.
        ledger
            .reserve(Identity::Account(account.id), MediaKind::Audio, None)
            .await
            .unwrap();

        let report = ledger.usage(Identity::Account(account.id)).await.unwrap();
        assert_eq!(report.mp3.used, 1);
        assert_eq!(report.mp4.used, 0);
        let account = report.account.unwrap();
        assert!(account.window_start > thirty_one_days_ago);
    }

    #[tokio::test]
    async fn test_anonymous_over_limit_suggests_signing_in() {
        let ledger = setup_ledger().await;
        let session = Uuid::new_v4();

        for _ in 0..5 {
            ledger
                .reserve(Identity::Session(session), MediaKind::Audio, None)
                .await
                .unwrap();
        }

        let denial = ledger
            .reserve(Identity::Session(session), MediaKind::Audio, None)
            .await
            .unwrap_err();
        assert!(denial.to_string().contains("sign in to continue"));
    }

    #[tokio::test]
    async fn test_anonymous_1080p_denial_names_free_ceiling() {
        let ledger = setup_ledger().await;
        let session = Uuid::new_v4();

        let denial = ledger
            .reserve(Identity::Session(session), MediaKind::Video, Some(1080))
            .await
            .unwrap_err();
        assert!(denial.to_string().contains("480p"));

        let report = ledger.usage(Identity::Session(session)).await.unwrap();
        assert_eq!(report.mp4.used, 0);
    }
}
