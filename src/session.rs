//! Sessions and the session registry.
//!
//! A [`Session`] is the isolated retrieval context created per uploaded
//! file: a room id, the populated vector index, and eviction bookkeeping.
//! The [`SessionRegistry`] is the only shared mutable state in the service.
//! It is an explicitly constructed value owned by the server state, not a
//! process-wide global, so tests and embedders can run independent
//! instances side by side.
//!
//! Sessions are published atomically: [`SessionRegistry::insert`] takes an
//! already fully built index, so a concurrent reader can never observe a
//! partially ingested session. Unbounded growth is handled by a capacity
//! bound with least-recently-used eviction on insert, plus an explicit
//! idle-TTL sweep ([`SessionRegistry::evict_expired`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use uuid::Uuid;

use crate::config::RegistryConfig;
use crate::index::VectorIndex;

/// Retrieval context for one uploaded file. Read-only after creation
/// except for the `last_used` bookkeeping.
pub struct Session {
    pub room_id: Uuid,
    /// Original upload file name, kept for logging.
    pub source_name: String,
    pub created_at: chrono::DateTime<Utc>,
    index: VectorIndex,
    last_used: AtomicI64,
}

impl Session {
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    fn touch(&self) {
        self.last_used.store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    fn last_used_secs(&self) -> i64 {
        self.last_used.load(Ordering::Relaxed)
    }
}

/// Concurrent map from room id to session.
pub struct SessionRegistry {
    max_sessions: usize,
    ttl_secs: Option<u64>,
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize, ttl_secs: Option<u64>) -> Self {
        Self {
            max_sessions,
            ttl_secs,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(config.max_sessions, config.ttl_secs)
    }

    /// Register a fully built index under a fresh room id and return it.
    /// Evicts the least-recently-used session first when at capacity.
    pub fn insert(&self, index: VectorIndex, source_name: &str) -> Uuid {
        let now = Utc::now();
        let session = Arc::new(Session {
            room_id: Uuid::new_v4(),
            source_name: source_name.to_string(),
            created_at: now,
            index,
            last_used: AtomicI64::new(now.timestamp()),
        });
        let room_id = session.room_id;

        let mut sessions = self.sessions.write().unwrap();
        while sessions.len() >= self.max_sessions {
            let victim = sessions
                .iter()
                .min_by_key(|(_, s)| s.last_used_secs())
                .map(|(id, _)| *id);
            match victim {
                Some(id) => {
                    sessions.remove(&id);
                    tracing::debug!(room_id = %id, "evicted least-recently-used session");
                }
                None => break,
            }
        }
        sessions.insert(room_id, session);
        room_id
    }

    /// Look up a session and mark it as used. Queries clone the `Arc` and
    /// run outside the lock.
    pub fn get(&self, room_id: &Uuid) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().unwrap();
        let session = sessions.get(room_id).cloned();
        if let Some(ref s) = session {
            s.touch();
        }
        session
    }

    /// Remove sessions idle longer than the configured TTL. Returns the
    /// number evicted; a no-op when no TTL is configured.
    pub fn evict_expired(&self) -> usize {
        let Some(ttl) = self.ttl_secs else {
            return 0;
        };
        let cutoff = Utc::now().timestamp() - ttl as i64;

        let mut sessions = self.sessions.write().unwrap();
        let before = sessions.len();
        sessions.retain(|_, s| s.last_used_secs() > cutoff);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_index() -> VectorIndex {
        VectorIndex::new(4)
    }

    #[test]
    fn insert_then_get_round_trips() {
        let registry = SessionRegistry::new(8, None);
        let room_id = registry.insert(empty_index(), "inventory.csv");

        let session = registry.get(&room_id).unwrap();
        assert_eq!(session.room_id, room_id);
        assert_eq!(session.source_name, "inventory.csv");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_room_is_none() {
        let registry = SessionRegistry::new(8, None);
        assert!(registry.get(&Uuid::new_v4()).is_none());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let registry = SessionRegistry::new(2, None);
        let first = registry.insert(empty_index(), "a.csv");
        let second = registry.insert(empty_index(), "b.csv");

        // Make `first` the most recently used, then mark `second` older.
        let old = Utc::now().timestamp() - 100;
        registry
            .get(&second)
            .unwrap()
            .last_used
            .store(old, Ordering::Relaxed);
        registry.get(&first).unwrap();

        let third = registry.insert(empty_index(), "c.csv");
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&second).is_none(), "LRU session should be gone");
        assert!(registry.get(&first).is_some());
        assert!(registry.get(&third).is_some());
    }

    #[test]
    fn ttl_sweep_removes_only_expired() {
        let registry = SessionRegistry::new(8, Some(60));
        let stale = registry.insert(empty_index(), "stale.csv");
        let fresh = registry.insert(empty_index(), "fresh.csv");

        let expired = Utc::now().timestamp() - 120;
        registry
            .get(&stale)
            .unwrap()
            .last_used
            .store(expired, Ordering::Relaxed);

        assert_eq!(registry.evict_expired(), 1);
        assert!(registry.get(&stale).is_none());
        assert!(registry.get(&fresh).is_some());
    }

    #[test]
    fn no_ttl_means_no_sweep() {
        let registry = SessionRegistry::new(8, None);
        registry.insert(empty_index(), "a.csv");
        assert_eq!(registry.evict_expired(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_inserts_get_distinct_rooms() {
        let registry = Arc::new(SessionRegistry::new(64, None));

        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.insert(VectorIndex::new(4), &format!("file-{i}.csv"))
            }));
        }

        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }
        assert_eq!(ids.len(), 16);
        assert_eq!(registry.len(), 16);
    }
}
