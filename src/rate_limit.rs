use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

pub const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 10;
pub const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 60;
pub const MAX_RATE_LIMIT_ENTRIES: usize = 100_000;
const MAX_WINDOW_SECONDS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after_seconds: u64 },
}

impl RateDecision {
    #[cfg(test)]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    count: u32,
    window_start: DateTime<Utc>,
}

/// Fixed-window counter per client identity.
///
/// Blocked attempts still count, so a client hammering the endpoint stays
/// blocked until its window ends. Entries are reaped lazily once the map
/// reaches `max_entries`: expired windows first, then the oldest live ones
/// until a tenth of the capacity is free again.
#[derive(Debug)]
pub struct RateLimiter {
    entries: Mutex<HashMap<String, RateLimitEntry>>,
    max_requests: u32,
    window: Duration,
    max_entries: usize,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_seconds: u64) -> Self {
        Self::with_capacity(max_requests, window_seconds, MAX_RATE_LIMIT_ENTRIES)
    }

    pub fn with_capacity(max_requests: u32, window_seconds: u64, max_entries: usize) -> Self {
        let window_seconds = window_seconds.clamp(1, MAX_WINDOW_SECONDS) as i64;
        Self {
            entries: Mutex::new(HashMap::new()),
            max_requests: max_requests.max(1),
            window: Duration::seconds(window_seconds),
            max_entries: max_entries.max(1),
        }
    }

    pub async fn check(&self, client_id: &str) -> RateDecision {
        self.check_at(client_id, Utc::now()).await
    }

    pub async fn check_at(&self, client_id: &str, now: DateTime<Utc>) -> RateDecision {
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get_mut(client_id)
            && now < entry.window_start + self.window
        {
            entry.count = entry.count.saturating_add(1);
            if entry.count <= self.max_requests {
                return RateDecision::Allowed;
            }

            let reset_at = entry.window_start + self.window;
            let retry_after_seconds = (reset_at - now).num_seconds().max(1) as u64;
            debug!(
                "Client {client_id} over limit ({} requests), retry in {retry_after_seconds}s",
                entry.count
            );
            return RateDecision::Limited {
                retry_after_seconds,
            };
        }

        if !entries.contains_key(client_id) && entries.len() >= self.max_entries {
            self.evict(&mut entries, now);
        }

        entries.insert(
            client_id.to_string(),
            RateLimitEntry {
                count: 1,
                window_start: now,
            },
        );
        RateDecision::Allowed
    }

    #[cfg(test)]
    pub async fn tracked_clients(&self) -> usize {
        self.entries.lock().await.len()
    }

    fn evict(&self, entries: &mut HashMap<String, RateLimitEntry>, now: DateTime<Utc>) {
        let before = entries.len();
        entries.retain(|_, entry| now < entry.window_start + self.window);

        if entries.len() >= self.max_entries {
            let target = self.max_entries - (self.max_entries / 10).max(1);
            let overflow = entries.len() - target;
            let mut oldest = entries
                .iter()
                .map(|(id, entry)| (entry.window_start, id.clone()))
                .collect::<Vec<_>>();
            if overflow < oldest.len() {
                oldest.select_nth_unstable_by_key(overflow, |(window_start, _)| *window_start);
            }

            for (_, id) in oldest.into_iter().take(overflow) {
                entries.remove(&id);
            }
        }

        debug!(
            "Rate limiter evicted {} of {before} entries",
            before - entries.len()
        );
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT_REQUESTS, DEFAULT_RATE_LIMIT_WINDOW_SECONDS)
    }
}
