use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque, stable identifier of a vault user (the chat platform's account id).
pub type UserId = i64;

/// Current Unix timestamp in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
