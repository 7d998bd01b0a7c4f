//! Read-only session diagnostics
//!
//! Snapshots the live session maps for observability endpoints. Never
//! mutates or prunes: expired sessions show up flagged rather than
//! removed, so a snapshot taken mid-incident reflects what the store
//! actually holds.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::model::{LeaseClock, SessionLock};
use crate::store::FileSessions;
use crate::token::extract_session_id;

/// Owner shown when no user mapping exists for a session
pub const UNKNOWN_USER: &str = "unknown";

/// One session's diagnostic view
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDiagnostic {
    pub session_id: String,
    pub user_id: String,
    pub lock_id: String,
    /// Epoch milliseconds
    pub created_at: i64,
    pub age_ms: i64,
    pub expired: bool,
}

/// Read-only view over the session maps
pub struct SessionDiagnosticsReporter {
    files: Arc<DashMap<String, FileSessions>>,
    owners: Arc<DashMap<String, String>>,
    clock: LeaseClock,
}

impl SessionDiagnosticsReporter {
    pub(crate) fn from_arc(
        files: Arc<DashMap<String, FileSessions>>,
        owners: Arc<DashMap<String, String>>,
        clock: LeaseClock,
    ) -> Self {
        Self {
            files,
            owners,
            clock,
        }
    }

    /// Snapshot every session grouped by file
    ///
    /// Files whose session set is empty are omitted.
    pub fn snapshot(&self) -> HashMap<String, Vec<SessionDiagnostic>> {
        let mut result = HashMap::new();

        let file_ids: Vec<String> = self.files.iter().map(|e| e.key().clone()).collect();

        for file_id in file_ids {
            let Some(sessions) = self.files.get(&file_id).map(|e| e.value().clone()) else {
                continue;
            };

            let diagnostics: Vec<SessionDiagnostic> = sessions
                .iter()
                .map(|entry| self.describe(entry.value()))
                .collect();

            if !diagnostics.is_empty() {
                result.insert(file_id, diagnostics);
            }
        }

        result
    }

    fn describe(&self, lock: &SessionLock) -> SessionDiagnostic {
        let session_id = extract_session_id(&lock.lock_id);
        let user_id = self
            .owners
            .get(&session_id)
            .map(|e| e.value().clone())
            .unwrap_or_else(|| UNKNOWN_USER.to_string());

        SessionDiagnostic {
            session_id,
            user_id,
            lock_id: lock.lock_id.clone(),
            created_at: lock.created_at.timestamp_millis(),
            age_ms: lock.age().num_milliseconds(),
            expired: self.clock.expired(lock),
        }
    }
}
