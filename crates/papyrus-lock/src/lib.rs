//! Papyrus Lock - Session-scoped editing lock coordination
//!
//! This crate provides:
//! - Lock token parsing and compatibility checks
//! - An in-memory session lock store keyed by (file id, session id)
//! - Per-user bulk cleanup of stale sessions
//! - Read-only session diagnostics
//!
//! Office viewers identify an editing lease by the session id embedded in
//! their lock token, not by the raw token string: successive tokens from
//! one editing session differ while carrying the same session id. The
//! store therefore coalesces reacquires per session, tolerates multiple
//! live sessions on one file, and leaves conflict policy to the protocol
//! layer via [`token::locks_compatible`].

pub mod cleanup;
pub mod diagnostics;
pub mod model;
pub mod store;
pub mod token;

pub use cleanup::StaleSessionCleaner;
pub use diagnostics::{SessionDiagnostic, SessionDiagnosticsReporter};
pub use model::{LeaseClock, LockManagerConfig, SessionLock};
pub use store::SessionLockManager;
pub use token::{extract_owner_id, extract_session_id, locks_compatible, resolve_owner};
