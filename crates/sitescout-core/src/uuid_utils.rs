//! UUID v7 utilities for time-ordered identifiers.
//!
//! Every sitescout record uses UUIDv7 so primary keys sort by creation time.

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
///
/// # Example
///
/// ```
/// use sitescout_core::uuid_utils::new_v7;
///
/// let id = new_v7();
/// assert_eq!(id.get_version_num(), 7);
/// ```
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Extract the embedded creation timestamp of a UUIDv7.
///
/// Returns `None` for other UUID versions.
pub fn extract_timestamp(id: &Uuid) -> Option<DateTime<Utc>> {
    if id.get_version_num() != 7 {
        return None;
    }
    let bytes = id.as_bytes();
    let mut millis: i64 = 0;
    for b in &bytes[0..6] {
        millis = (millis << 8) | (*b as i64);
    }
    Utc.timestamp_millis_opt(millis).single()
}
