//! Lock token parsing and compatibility
//!
//! Office viewers send lock ids that may be JSON objects like
//! `{"S":"session-id","F":4,"E":2}`. The `"S"` field carries the session id
//! and is the unit of lock identity; `"U"` or `"UserId"` may carry the
//! owning user. A token that does not parse as JSON is its own session id;
//! unrecognized fields ride along in the stored raw token untouched.

use serde_json::Value;
use tracing::debug;

/// JSON field carrying the session id
pub const SESSION_ID_FIELD: &str = "S";

/// JSON fields that may carry the owning user id
pub const OWNER_ID_FIELDS: [&str; 2] = ["U", "UserId"];

/// Extract the session id from a lock id
///
/// Total: malformed or non-object input yields the input itself.
pub fn extract_session_id(lock_id: &str) -> String {
    if lock_id.is_empty() {
        return String::new();
    }

    match serde_json::from_str::<Value>(lock_id) {
        Ok(value) => value
            .get(SESSION_ID_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| lock_id.to_string()),
        Err(_) => {
            debug!(lock_id = %lock_id, "lock id is not JSON, using it as the session id");
            lock_id.to_string()
        }
    }
}

/// Extract the owning user id embedded in a lock id, if any
pub fn extract_owner_id(lock_id: &str) -> Option<String> {
    if lock_id.is_empty() {
        return None;
    }

    let value: Value = serde_json::from_str(lock_id).ok()?;

    OWNER_ID_FIELDS
        .iter()
        .find_map(|field| value.get(field).and_then(Value::as_str))
        .map(str::to_string)
}

/// Resolve the owning user for a lock id
///
/// An externally authenticated identity wins over anything embedded in the
/// token.
pub fn resolve_owner(lock_id: &str, current_identity: Option<&str>) -> Option<String> {
    match current_identity {
        Some(identity) if !identity.is_empty() => Some(identity.to_string()),
        _ => extract_owner_id(lock_id),
    }
}

/// Compare two lock ids for compatibility
///
/// Locks match when they are exactly equal or carry the same session id.
/// Protocol layers must use this predicate, not raw string equality, to
/// decide whether a supplied lock matches the stored one.
pub fn locks_compatible(lock_id_a: &str, lock_id_b: &str) -> bool {
    if lock_id_a.is_empty() || lock_id_b.is_empty() {
        return false;
    }

    if lock_id_a == lock_id_b {
        return true;
    }

    extract_session_id(lock_id_a) == extract_session_id(lock_id_b)
}
