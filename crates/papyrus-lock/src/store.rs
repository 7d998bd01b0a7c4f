//! In-memory session lock store
//!
//! Tracks editing leases in a two-level map, file id -> (session id ->
//! lock record), plus an auxiliary session id -> owner map. Multiple live
//! sessions per file are tolerated; deciding whether two locks conflict
//! belongs to the protocol layer (see [`crate::token::locks_compatible`]).
//!
//! Every operation is synchronous. Single-key updates are atomic: a caller
//! losing a replace race gets a retryable result, never a corrupted map.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info, warn};

use papyrus_common::{AnonymousIdentity, IdentityContext, PapyrusError};

use crate::cleanup::StaleSessionCleaner;
use crate::diagnostics::SessionDiagnosticsReporter;
use crate::model::{LeaseClock, LockManagerConfig, SessionLock};
use crate::token::{extract_session_id, resolve_owner};

/// Sessions of a single file, shared between the store and its sweepers
pub(crate) type FileSessions = Arc<DashMap<String, SessionLock>>;

/// In-memory session lock coordinator
pub struct SessionLockManager {
    pub(crate) files: Arc<DashMap<String, FileSessions>>,
    pub(crate) owners: Arc<DashMap<String, String>>,
    clock: LeaseClock,
    reacquire_purge_age_ms: i64,
    identity: Arc<dyn IdentityContext>,
    cleaner: StaleSessionCleaner,
}

impl Default for SessionLockManager {
    fn default() -> Self {
        Self::new(LockManagerConfig::default(), Arc::new(AnonymousIdentity))
    }
}

impl SessionLockManager {
    pub fn new(config: LockManagerConfig, identity: Arc<dyn IdentityContext>) -> Self {
        let files: Arc<DashMap<String, FileSessions>> = Arc::new(DashMap::new());
        let owners: Arc<DashMap<String, String>> = Arc::new(DashMap::new());
        let cleaner = StaleSessionCleaner::from_arc(files.clone(), owners.clone());

        Self {
            files,
            owners,
            clock: LeaseClock::new(config.session_ttl_ms),
            reacquire_purge_age_ms: config.reacquire_purge_age_ms,
            identity,
            cleaner,
        }
    }

    /// Read-only diagnostics over the live session maps
    pub fn diagnostics(&self) -> SessionDiagnosticsReporter {
        SessionDiagnosticsReporter::from_arc(self.files.clone(), self.owners.clone(), self.clock)
    }

    /// Remove every session owned by `user_id`
    ///
    /// A zero `max_age` removes the user's sessions regardless of age; a
    /// positive `max_age` removes only sessions older than the threshold.
    pub fn purge_user(&self, user_id: &str, max_age: Duration) -> usize {
        self.cleaner.purge_user(user_id, max_age)
    }

    /// Look up a live session lock for a file
    ///
    /// Expired sessions discovered here are removed before answering. When
    /// several sessions are live, the most recently created one is
    /// returned.
    pub fn try_get(&self, file_id: &str) -> Option<SessionLock> {
        let sessions = self.files.get(file_id).map(|e| e.value().clone())?;

        self.prune_expired(file_id, &sessions);

        let found = sessions
            .iter()
            .filter(|e| !self.clock.expired(e.value()))
            .max_by_key(|e| e.value().created_at)
            .map(|e| e.value().clone());

        if found.is_none() {
            self.files.remove_if(file_id, |_, s| s.is_empty());
            debug!(file_id = %file_id, "no live sessions for file");
        }

        found
    }

    /// Claim or re-claim an editing lease on a file
    ///
    /// A reacquire for a session id that already holds the file coalesces
    /// into the existing record, replacing token and timestamp. Losing a
    /// race against a concurrent update yields `LockConflict`; retrying is
    /// the caller's call.
    pub fn acquire(&self, file_id: &str, lock_id: &str) -> Result<SessionLock, PapyrusError> {
        if file_id.is_empty() {
            return Err(PapyrusError::IllegalArgument("file_id is empty".to_string()));
        }
        if lock_id.is_empty() {
            return Err(PapyrusError::IllegalArgument("lock_id is empty".to_string()));
        }

        let session_id = extract_session_id(lock_id);
        let owner = resolve_owner(lock_id, self.identity.current_identity().as_deref());

        match &owner {
            Some(user_id) => {
                // Covers client teardown/recreate: the replaced client's
                // aging sessions go away before the new one takes the
                // lock. Clamped above zero, which is the purge-everything
                // sentinel.
                let purge_age = Duration::from_millis(self.reacquire_purge_age_ms.max(1) as u64);
                let cleaned = self.cleaner.purge_user(user_id, purge_age);
                if cleaned > 0 {
                    info!(user_id = %user_id, count = cleaned, "purged stale sessions before acquire");
                }

                self.owners.insert(session_id.clone(), user_id.clone());
            }
            None => {
                warn!(session_id = %session_id, lock_id = %lock_id, "could not determine owner for session");
            }
        }

        let sessions = self.files.entry(file_id.to_string()).or_default().clone();

        self.prune_expired(file_id, &sessions);

        if let Some(existing) = sessions.get(&session_id).map(|e| e.value().clone()) {
            let updated = SessionLock::new(file_id, lock_id);
            let replaced = match sessions.entry(session_id.clone()) {
                Entry::Occupied(mut entry) if *entry.get() == existing => {
                    entry.insert(updated.clone());
                    true
                }
                _ => false,
            };

            return if replaced {
                debug!(file_id = %file_id, session_id = %session_id, "reacquired session lock");
                Ok(updated)
            } else {
                warn!(file_id = %file_id, session_id = %session_id, "reacquire lost a concurrent update");
                Err(PapyrusError::LockConflict(format!(
                    "session '{session_id}' on file '{file_id}' changed concurrently"
                )))
            };
        }

        let live = sessions
            .iter()
            .filter(|e| !self.clock.expired(e.value()))
            .count();
        if live > 0 {
            warn!(file_id = %file_id, count = live, session_id = %session_id, "file already has live sessions, adding another");
        }

        let created = SessionLock::new(file_id, lock_id);
        match sessions.entry(session_id.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(created.clone());
                info!(file_id = %file_id, session_id = %session_id, "added session lock");
                Ok(created)
            }
            Entry::Occupied(_) => {
                warn!(file_id = %file_id, session_id = %session_id, "insert lost a concurrent acquire");
                Err(PapyrusError::LockConflict(format!(
                    "session '{session_id}' on file '{file_id}' was inserted concurrently"
                )))
            }
        }
    }

    /// Extend an existing lease, replacing its token and timestamp
    ///
    /// Returns false when the session is unknown, already expired (in
    /// which case it is pruned), or lost a concurrent update.
    pub fn refresh(&self, file_id: &str, lock_id: &str) -> bool {
        if lock_id.is_empty() {
            warn!(file_id = %file_id, "refresh without a lock id");
            return false;
        }

        let session_id = extract_session_id(lock_id);

        let Some(sessions) = self.files.get(file_id).map(|e| e.value().clone()) else {
            warn!(file_id = %file_id, session_id = %session_id, "refresh for file with no sessions");
            return false;
        };

        let Some(existing) = sessions.get(&session_id).map(|e| e.value().clone()) else {
            warn!(file_id = %file_id, session_id = %session_id, "refresh for unknown session");
            return false;
        };

        if self.clock.expired(&existing) {
            if sessions
                .remove_if(&session_id, |_, lock| self.clock.expired(lock))
                .is_some()
            {
                self.owners.remove(&session_id);
            }
            self.files.remove_if(file_id, |_, s| s.is_empty());
            warn!(file_id = %file_id, session_id = %session_id, "refresh for expired session");
            return false;
        }

        let refreshed = SessionLock::new(file_id, lock_id);
        let replaced = match sessions.entry(session_id.clone()) {
            Entry::Occupied(mut entry) if *entry.get() == existing => {
                entry.insert(refreshed.clone());
                true
            }
            _ => false,
        };

        if replaced {
            debug!(file_id = %file_id, session_id = %session_id, created_at = %refreshed.created_at, "session lock refreshed");
        } else {
            warn!(file_id = %file_id, session_id = %session_id, "refresh lost a concurrent update");
        }

        replaced
    }

    /// Drop every session for a file
    pub fn release_all(&self, file_id: &str) -> bool {
        match self.files.remove(file_id) {
            Some((_, sessions)) => {
                let count = sessions.len();
                for entry in sessions.iter() {
                    self.owners.remove(entry.key());
                }
                info!(file_id = %file_id, count = count, "released all sessions for file");
                true
            }
            None => {
                warn!(file_id = %file_id, "release for file with no sessions");
                false
            }
        }
    }

    /// Drop the single session identified by the lock id
    pub fn release_session(&self, file_id: &str, lock_id: &str) -> bool {
        let session_id = extract_session_id(lock_id);

        let Some(sessions) = self.files.get(file_id).map(|e| e.value().clone()) else {
            warn!(file_id = %file_id, session_id = %session_id, "release for file with no sessions");
            return false;
        };

        if sessions.remove(&session_id).is_some() {
            self.owners.remove(&session_id);
            self.files.remove_if(file_id, |_, s| s.is_empty());
            info!(file_id = %file_id, session_id = %session_id, "released session");
            true
        } else {
            warn!(file_id = %file_id, session_id = %session_id, "release for unknown session");
            false
        }
    }

    fn prune_expired(&self, file_id: &str, sessions: &FileSessions) {
        let expired: Vec<String> = sessions
            .iter()
            .filter(|e| self.clock.expired(e.value()))
            .map(|e| e.key().clone())
            .collect();

        for session_id in expired {
            if sessions
                .remove_if(&session_id, |_, lock| self.clock.expired(lock))
                .is_some()
            {
                self.owners.remove(&session_id);
                info!(session_id = %session_id, file_id = %file_id, "removed expired session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use papyrus_common::StaticIdentity;

    fn manager() -> SessionLockManager {
        SessionLockManager::default()
    }

    fn manager_with_ttl(ttl_ms: i64) -> SessionLockManager {
        SessionLockManager::new(
            LockManagerConfig {
                session_ttl_ms: ttl_ms,
                reacquire_purge_age_ms: 60_000,
            },
            Arc::new(AnonymousIdentity),
        )
    }

    // Plants a session that was created `age_ms` in the past.
    fn plant(mgr: &SessionLockManager, file_id: &str, lock_id: &str, age_ms: i64) {
        let session_id = extract_session_id(lock_id);
        let lock = SessionLock {
            file_id: file_id.to_string(),
            lock_id: lock_id.to_string(),
            created_at: Utc::now() - TimeDelta::milliseconds(age_ms),
        };
        mgr.files
            .entry(file_id.to_string())
            .or_default()
            .insert(session_id, lock);
    }

    #[test]
    fn test_acquire_and_try_get() {
        let mgr = manager();
        let lock = mgr.acquire("f1", r#"{"S":"s1"}"#).unwrap();
        assert_eq!(lock.file_id, "f1");

        let found = mgr.try_get("f1").unwrap();
        assert_eq!(found.lock_id, r#"{"S":"s1"}"#);
    }

    #[test]
    fn test_try_get_unknown_file() {
        assert!(manager().try_get("nope").is_none());
    }

    #[test]
    fn test_reacquire_coalesces() {
        let mgr = manager();
        let first = mgr.acquire("f1", r#"{"S":"s1","F":1}"#).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = mgr.acquire("f1", r#"{"S":"s1","F":2}"#).unwrap();

        assert!(second.created_at > first.created_at);
        assert_eq!(second.lock_id, r#"{"S":"s1","F":2}"#);

        let sessions = mgr.files.get("f1").unwrap().value().clone();
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn test_multiple_sessions_per_file() {
        let mgr = manager();
        mgr.acquire("f1", r#"{"S":"s1"}"#).unwrap();
        mgr.acquire("f1", r#"{"S":"s2"}"#).unwrap();

        let sessions = mgr.files.get("f1").unwrap().value().clone();
        assert_eq!(sessions.len(), 2);
    }

    #[test]
    fn test_try_get_returns_most_recent() {
        let mgr = manager();
        mgr.acquire("f1", r#"{"S":"s1"}"#).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        mgr.acquire("f1", r#"{"S":"s2"}"#).unwrap();

        let found = mgr.try_get("f1").unwrap();
        assert_eq!(extract_session_id(&found.lock_id), "s2");
    }

    #[test]
    fn test_acquire_empty_arguments() {
        let mgr = manager();
        assert!(matches!(
            mgr.acquire("", "tok"),
            Err(PapyrusError::IllegalArgument(_))
        ));
        assert!(matches!(
            mgr.acquire("f1", ""),
            Err(PapyrusError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_acquire_records_owner_from_token() {
        let mgr = manager();
        mgr.acquire("f1", r#"{"S":"s1","U":"u1"}"#).unwrap();
        assert_eq!(mgr.owners.get("s1").unwrap().value(), "u1");
    }

    #[test]
    fn test_acquire_prefers_authenticated_identity() {
        let mgr = SessionLockManager::new(
            LockManagerConfig::default(),
            Arc::new(StaticIdentity("jwt-user".to_string())),
        );
        mgr.acquire("f1", r#"{"S":"s1","U":"token-user"}"#).unwrap();
        assert_eq!(mgr.owners.get("s1").unwrap().value(), "jwt-user");
    }

    #[test]
    fn test_acquire_purges_older_sessions_of_same_user() {
        let mgr = SessionLockManager::new(
            LockManagerConfig {
                session_ttl_ms: 1_800_000,
                reacquire_purge_age_ms: 60_000,
            },
            Arc::new(StaticIdentity("u1".to_string())),
        );

        // An aging session of the same user on another file, well past the
        // reacquire purge threshold but not past the TTL.
        plant(&mgr, "f-old", r#"{"S":"old","U":"u1"}"#, 120_000);
        mgr.owners.insert("old".to_string(), "u1".to_string());

        mgr.acquire("f-new", r#"{"S":"new"}"#).unwrap();

        assert!(mgr.files.get("f-old").is_none());
        assert!(mgr.files.get("f-new").is_some());
    }

    #[test]
    fn test_refresh_updates_record() {
        let mgr = manager();
        let first = mgr.acquire("f1", r#"{"S":"s1","F":1}"#).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert!(mgr.refresh("f1", r#"{"S":"s1","F":2}"#));

        let found = mgr.try_get("f1").unwrap();
        assert_eq!(found.lock_id, r#"{"S":"s1","F":2}"#);
        assert!(found.created_at > first.created_at);
    }

    #[test]
    fn test_refresh_unknown_session() {
        let mgr = manager();
        assert!(!mgr.refresh("f1", r#"{"S":"s1"}"#));

        mgr.acquire("f1", r#"{"S":"s1"}"#).unwrap();
        assert!(!mgr.refresh("f1", r#"{"S":"other"}"#));
    }

    #[test]
    fn test_refresh_empty_lock_id() {
        let mgr = manager();
        mgr.acquire("f1", r#"{"S":"s1"}"#).unwrap();
        assert!(!mgr.refresh("f1", ""));
    }

    #[test]
    fn test_refresh_expired_session_prunes() {
        let mgr = manager_with_ttl(1000);
        plant(&mgr, "f1", r#"{"S":"s1"}"#, 5000);

        assert!(!mgr.refresh("f1", r#"{"S":"s1"}"#));
        assert!(mgr.files.get("f1").is_none());
    }

    #[test]
    fn test_try_get_prunes_expired() {
        let mgr = manager_with_ttl(1000);
        plant(&mgr, "f1", r#"{"S":"s1"}"#, 5000);
        mgr.owners.insert("s1".to_string(), "u1".to_string());

        assert!(mgr.try_get("f1").is_none());
        // The observing call removed the session, its owner mapping, and
        // the emptied file entry.
        assert!(mgr.files.get("f1").is_none());
        assert!(mgr.owners.get("s1").is_none());
    }

    #[test]
    fn test_try_get_skips_expired_returns_live() {
        let mgr = manager_with_ttl(60_000);
        plant(&mgr, "f1", r#"{"S":"stale"}"#, 120_000);
        mgr.acquire("f1", r#"{"S":"live"}"#).unwrap();

        let found = mgr.try_get("f1").unwrap();
        assert_eq!(extract_session_id(&found.lock_id), "live");

        let sessions = mgr.files.get("f1").unwrap().value().clone();
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn test_release_session() {
        let mgr = manager();
        mgr.acquire("f1", r#"{"S":"s1","U":"u1"}"#).unwrap();
        mgr.acquire("f1", r#"{"S":"s2"}"#).unwrap();

        assert!(mgr.release_session("f1", r#"{"S":"s1"}"#));
        assert!(mgr.owners.get("s1").is_none());

        let sessions = mgr.files.get("f1").unwrap().value().clone();
        assert_eq!(sessions.len(), 1);

        // Second release of the same session finds nothing.
        assert!(!mgr.release_session("f1", r#"{"S":"s1"}"#));
    }

    #[test]
    fn test_release_last_session_removes_file_entry() {
        let mgr = manager();
        mgr.acquire("f1", r#"{"S":"s1"}"#).unwrap();

        assert!(mgr.release_session("f1", r#"{"S":"s1"}"#));
        assert!(mgr.files.get("f1").is_none());
    }

    #[test]
    fn test_release_all() {
        let mgr = manager();
        mgr.acquire("f1", r#"{"S":"s1","U":"u1"}"#).unwrap();
        mgr.acquire("f1", r#"{"S":"s2","U":"u2"}"#).unwrap();

        assert!(mgr.release_all("f1"));
        assert!(mgr.files.get("f1").is_none());
        assert!(mgr.owners.get("s1").is_none());
        assert!(mgr.owners.get("s2").is_none());

        assert!(!mgr.release_all("f1"));
    }
}
