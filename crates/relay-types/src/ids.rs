//! Identifier and clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a fresh identifier (32 lowercase hex characters).
///
/// The hex form contains no `.`, so an identifier is always a single topic key.
pub fn unique_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Seconds since the Unix epoch, with sub-second precision.
pub fn timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
