//! Per-user cooldown between self-service crawls.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::config::RateLimitConfig;
use crate::db::Tier;

/// Remembers when each user last triggered a crawl. State lives in memory
/// only and starts empty after a restart.
pub struct CrawlRateLimiter {
    config: RateLimitConfig,
    last_crawl: Mutex<HashMap<i64, DateTime<Utc>>>,
}

impl CrawlRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            last_crawl: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval_minutes(&self, tier: Tier) -> i64 {
        self.config.interval_minutes(tier)
    }

    fn next_allowed(&self, user_id: i64, tier: Tier) -> Option<DateTime<Utc>> {
        let last = *self.last_crawl.lock().get(&user_id)?;
        Some(last + Duration::minutes(self.interval_minutes(tier)))
    }

    /// True if the user never crawled, or `now` is strictly past the cooldown
    pub fn can_crawl(&self, user_id: i64, tier: Tier, now: DateTime<Utc>) -> bool {
        match self.next_allowed(user_id, tier) {
            None => true,
            Some(next) => now > next,
        }
    }

    /// Whole seconds until the next crawl is allowed; 0 when it already is
    pub fn seconds_until_next(&self, user_id: i64, tier: Tier, now: DateTime<Utc>) -> i64 {
        match self.next_allowed(user_id, tier) {
            Some(next) if now <= next => {
                let millis = (next - now).num_milliseconds();
                ((millis + 999) / 1000).max(1)
            }
            _ => 0,
        }
    }

    pub fn record(&self, user_id: i64, now: DateTime<Utc>) {
        self.last_crawl.lock().insert(user_id, now);
    }

    /// Returns true if the user had a recorded crawl
    pub fn reset(&self, user_id: i64) -> bool {
        self.last_crawl.lock().remove(&user_id).is_some()
    }

    /// Forget every user; returns how many entries were dropped
    pub fn clear(&self) -> usize {
        let mut last_crawl = self.last_crawl.lock();
        let count = last_crawl.len();
        last_crawl.clear();
        count
    }
}
