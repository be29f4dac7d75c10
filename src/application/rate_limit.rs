use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of recording one attempt against a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

/// Per-process sliding window limiter keyed by arbitrary strings.
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    window: Duration,
    max_requests: u32,
    buckets: Arc<DashMap<String, Vec<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            buckets: Arc::new(DashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    pub(crate) fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let window = self.window;
        let mut entry = self.buckets.entry(key.to_string()).or_default();
        entry.retain(|instant| now.saturating_duration_since(*instant) < window);

        let remaining = self.max_requests.saturating_sub(entry.len() as u32);
        if remaining == 0 {
            let oldest = entry.first().copied().unwrap_or(now);
            let retry_after = window
                .saturating_sub(now.saturating_duration_since(oldest))
                .max(Duration::from_secs(1));
            return RateDecision::Limited { retry_after };
        }

        entry.push(now);
        // after push, one fewer slot remains
        RateDecision::Allowed {
            remaining: remaining.saturating_sub(1),
        }
    }

    /// Drop buckets with no attempt inside the window. Returns how many went.
    pub fn purge_idle(&self) -> usize {
        self.purge_idle_at(Instant::now())
    }

    pub(crate) fn purge_idle_at(&self, now: Instant) -> usize {
        let window = self.window;
        let before = self.buckets.len();
        self.buckets.retain(|_, attempts| {
            attempts
                .last()
                .is_some_and(|last| now.saturating_duration_since(*last) < window)
        });
        before.saturating_sub(self.buckets.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_rejects() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60), 2);
        let now = Instant::now();

        assert_eq!(
            limiter.check_at("ip:1", now),
            RateDecision::Allowed { remaining: 1 }
        );
        assert_eq!(
            limiter.check_at("ip:1", now),
            RateDecision::Allowed { remaining: 0 }
        );
        assert!(matches!(
            limiter.check_at("ip:1", now),
            RateDecision::Limited { .. }
        ));
        assert_eq!(
            limiter.check_at("ip:2", now),
            RateDecision::Allowed { remaining: 1 }
        );
    }

    #[test]
    fn window_slides_past_old_attempts() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(10), 1);
        let start = Instant::now();

        assert_eq!(
            limiter.check_at("k", start),
            RateDecision::Allowed { remaining: 0 }
        );
        match limiter.check_at("k", start + Duration::from_secs(4)) {
            RateDecision::Limited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(6));
            }
            other => panic!("expected limit, got {other:?}"),
        }
        assert_eq!(
            limiter.check_at("k", start + Duration::from_secs(10)),
            RateDecision::Allowed { remaining: 0 }
        );
    }

    #[test]
    fn idle_buckets_are_purged() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(10), 5);
        let start = Instant::now();
        limiter.check_at("old", start);
        limiter.check_at("fresh", start + Duration::from_secs(8));
        assert_eq!(limiter.tracked_keys(), 2);

        let purged = limiter.purge_idle_at(start + Duration::from_secs(12));
        assert_eq!(purged, 1);
        assert_eq!(limiter.tracked_keys(), 1);
        assert_eq!(
            limiter.check_at("fresh", start + Duration::from_secs(12)),
            RateDecision::Allowed { remaining: 3 }
        );
    }
}
