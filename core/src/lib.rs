pub mod amount;
pub mod chain;
pub mod comment;
pub mod engine;
pub mod error;
pub mod store;
pub mod types;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in unix seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
