//! Data models for session lock coordination

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;

/// Configuration for the session lock manager
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockManagerConfig {
    /// Lease lifetime in milliseconds; a session older than this is stale
    #[serde(default = "LockManagerConfig::default_session_ttl_ms")]
    pub session_ttl_ms: i64,

    /// Age threshold for the per-user cleanup that runs on acquire
    #[serde(default = "LockManagerConfig::default_reacquire_purge_age_ms")]
    pub reacquire_purge_age_ms: i64,
}

impl LockManagerConfig {
    fn default_session_ttl_ms() -> i64 {
        30 * 60 * 1000
    }

    fn default_reacquire_purge_age_ms() -> i64 {
        60 * 1000
    }
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            session_ttl_ms: Self::default_session_ttl_ms(),
            reacquire_purge_age_ms: Self::default_reacquire_purge_age_ms(),
        }
    }
}

/// An editing session's lock on a file
///
/// Immutable value: acquire and refresh replace the whole record under the
/// same (file id, session id) key rather than mutating in place, so
/// concurrent readers always observe a consistent record.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionLock {
    pub file_id: String,
    pub lock_id: String,
    pub created_at: DateTime<Utc>,
}

impl SessionLock {
    pub fn new(file_id: &str, lock_id: &str) -> Self {
        Self {
            file_id: file_id.to_string(),
            lock_id: lock_id.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Wall-clock age of this lock
    pub fn age(&self) -> TimeDelta {
        Utc::now().signed_duration_since(self.created_at)
    }
}

/// Wall-clock staleness predicate with a fixed process-wide TTL
#[derive(Clone, Copy, Debug)]
pub struct LeaseClock {
    ttl: TimeDelta,
}

impl LeaseClock {
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            ttl: TimeDelta::milliseconds(ttl_ms.max(0)),
        }
    }

    /// A session is expired once its age exceeds the TTL
    pub fn expired(&self, lock: &SessionLock) -> bool {
        lock.age() > self.ttl
    }
}
