use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::MediaKind;

/// Ephemeral usage counters for anonymous callers, keyed by session id.
/// Unlike account counters these are never reset by the 30-day window; they
/// live until the session expires.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionUsage {
    pub mp3_count: i64,
    pub mp4_count: i64,
    last_seen: i64,
}

impl SessionUsage {
    pub fn count_for(&self, kind: MediaKind) -> i64 {
        match kind {
            MediaKind::Audio => self.mp3_count,
            MediaKind::Video => self.mp4_count,
        }
    }
}

#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<Uuid, SessionUsage>>>,
    ttl_secs: i64,
}

impl SessionStore {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl_secs,
        }
    }

    /// Advances the counter for `kind` if it is still below `limit`.
    /// The check and the increment happen under one lock.
    pub async fn try_reserve(&self, session_id: Uuid, kind: MediaKind, limit: i64, now: i64) -> bool {
        let mut sessions = self.sessions.lock().await;
        prune_expired(&mut sessions, now, self.ttl_secs);

        let usage = sessions.entry(session_id).or_default();
        usage.last_seen = now;

        let counter = match kind {
            MediaKind::Audio => &mut usage.mp3_count,
            MediaKind::Video => &mut usage.mp4_count,
        };
        if *counter >= limit {
            return false;
        }
        *counter += 1;
        true
    }

    /// Rolls a reservation back after a failed conversion.
    pub async fn release(&self, session_id: Uuid, kind: MediaKind) {
        let mut sessions = self.sessions.lock().await;
        if let Some(usage) = sessions.get_mut(&session_id) {
            let counter = match kind {
                MediaKind::Audio => &mut usage.mp3_count,
                MediaKind::Video => &mut usage.mp4_count,
            };
            *counter = counter.saturating_sub(1);
        }
    }

    pub async fn usage(&self, session_id: Uuid) -> SessionUsage {
        let sessions = self.sessions.lock().await;
        sessions.get(&session_id).copied().unwrap_or_default()
    }
}

fn prune_expired(sessions: &mut HashMap<Uuid, SessionUsage>, now: i64, ttl_secs: i64) {
    sessions.retain(|_, usage| now - usage.last_seen <= ttl_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters_are_per_session() {
        let store = SessionStore::new(3600);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(store.try_reserve(first, MediaKind::Audio, 5, 0).await);
        assert!(store.try_reserve(second, MediaKind::Audio, 5, 0).await);

        assert_eq!(store.usage(first).await.mp3_count, 1);
        assert_eq!(store.usage(second).await.mp3_count, 1);
    }

    #[tokio::test]
    async fn test_reserve_stops_at_limit() {
        let store = SessionStore::new(3600);
        let session = Uuid::new_v4();

        for _ in 0..5 {
            assert!(store.try_reserve(session, MediaKind::Video, 5, 0).await);
        }
        assert!(!store.try_reserve(session, MediaKind::Video, 5, 0).await);
        assert_eq!(store.usage(session).await.mp4_count, 5);
    }

    #[tokio::test]
    async fn test_release_rolls_back() {
        let store = SessionStore::new(3600);
        let session = Uuid::new_v4();

        assert!(store.try_reserve(session, MediaKind::Audio, 5, 0).await);
        store.release(session, MediaKind::Audio).await;
        assert_eq!(store.usage(session).await.mp3_count, 0);

        // Releasing with no reservation left stays at zero.
        store.release(session, MediaKind::Audio).await;
        assert_eq!(store.usage(session).await.mp3_count, 0);
    }

    #[tokio::test]
    async fn test_expired_sessions_are_pruned() {
        let store = SessionStore::new(100);
        let old = Uuid::new_v4();
        let fresh = Uuid::new_v4();

        assert!(store.try_reserve(old, MediaKind::Audio, 5, 0).await);
        assert!(store.try_reserve(fresh, MediaKind::Audio, 5, 200).await);

        assert_eq!(store.usage(old).await.mp3_count, 0);
        assert_eq!(store.usage(fresh).await.mp3_count, 1);
    }
}
