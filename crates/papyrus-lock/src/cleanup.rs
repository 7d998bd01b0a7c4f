//! Per-user stale session cleanup
//!
//! Sweeps every session owned by one user across all files, used when an
//! editing client is torn down and recreated and its leases must not
//! linger. The sweep walks a best-effort snapshot with per-entry atomic
//! removal and takes no global lock; a session inserted after the scan
//! begins may survive it.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::model::SessionLock;
use crate::store::FileSessions;
use crate::token::extract_owner_id;

/// Removes a single user's sessions across the whole store
pub struct StaleSessionCleaner {
    files: Arc<DashMap<String, FileSessions>>,
    owners: Arc<DashMap<String, String>>,
}

impl StaleSessionCleaner {
    pub(crate) fn from_arc(
        files: Arc<DashMap<String, FileSessions>>,
        owners: Arc<DashMap<String, String>>,
    ) -> Self {
        Self { files, owners }
    }

    /// Remove sessions owned by `user_id` across all files
    ///
    /// A zero `max_age` is the sentinel for "all ages": every session of
    /// the user goes, regardless of freshness. A positive `max_age`
    /// removes only sessions older than the threshold. Returns how many
    /// sessions were removed.
    pub fn purge_user(&self, user_id: &str, max_age: Duration) -> usize {
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        let purge_all = max_age.is_zero();
        let mut removed = 0usize;

        let file_ids: Vec<String> = self.files.iter().map(|e| e.key().clone()).collect();

        for file_id in file_ids {
            let Some(sessions) = self.files.get(&file_id).map(|e| e.value().clone()) else {
                continue;
            };

            let candidates: Vec<String> = sessions
                .iter()
                .filter(|e| self.matches(user_id, purge_all, max_age, e.key(), e.value()))
                .map(|e| e.key().clone())
                .collect();

            for session_id in candidates {
                let taken = sessions.remove_if(&session_id, |sid, lock| {
                    self.matches(user_id, purge_all, max_age, sid, lock)
                });

                if let Some((_, lock)) = taken {
                    self.owners.remove(&session_id);
                    removed += 1;
                    info!(
                        session_id = %session_id,
                        user_id = %user_id,
                        file_id = %file_id,
                        age_ms = lock.age().num_milliseconds(),
                        "purged session"
                    );
                }
            }

            if self.files.remove_if(&file_id, |_, s| s.is_empty()).is_some() {
                debug!(file_id = %file_id, "removed empty file entry");
            }
        }

        removed
    }

    fn matches(
        &self,
        user_id: &str,
        purge_all: bool,
        max_age: TimeDelta,
        session_id: &str,
        lock: &SessionLock,
    ) -> bool {
        let owned = self
            .session_owner(session_id, lock)
            .is_some_and(|owner| owner.eq_ignore_ascii_case(user_id));

        owned && (purge_all || lock.age() > max_age)
    }

    // Owner map first, token-embedded owner as fallback.
    fn session_owner(&self, session_id: &str, lock: &SessionLock) -> Option<String> {
        self.owners
            .get(session_id)
            .map(|e| e.value().clone())
            .or_else(|| extract_owner_id(&lock.lock_id))
    }
}
