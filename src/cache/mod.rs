//! Month-scoped shared section cache.

mod manager;

use chrono::{DateTime, Utc};

pub use manager::{CacheStatus, SharedCacheManager};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Cache key for a calendar month, e.g. "January 2026".
pub fn month_key(at: DateTime<Utc>) -> String {
    at.format("%B %Y").to_string()
}
