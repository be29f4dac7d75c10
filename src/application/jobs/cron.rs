//! Cron-triggered maintenance: API key expiry, the scheduled-post sweep and
//! rate-limit bucket eviction.

use std::str::FromStr;
use std::sync::Arc;

use apalis::prelude::*;
use apalis_cron::Schedule;
use thiserror::Error;
use time::OffsetDateTime;

use crate::application::admin::posts::AdminPostService;
use crate::application::api_keys::ApiKeyService;
use crate::application::rate_limit::SlidingWindowLimiter;

/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron.
#[derive(Default, Debug, Clone)]
pub struct ExpireApiKeysJob;

impl From<chrono::DateTime<chrono::Utc>> for ExpireApiKeysJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

#[derive(Default, Debug, Clone)]
pub struct SweepScheduledPostsJob;

impl From<chrono::DateTime<chrono::Utc>> for SweepScheduledPostsJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

#[derive(Default, Debug, Clone)]
pub struct PurgeRateLimitsJob;

impl From<chrono::DateTime<chrono::Utc>> for PurgeRateLimitsJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

#[derive(Clone)]
pub struct CronContext {
    pub api_keys: Arc<ApiKeyService>,
    pub posts: Arc<AdminPostService>,
    /// Clones share buckets with the limiters serving requests.
    pub limiters: Vec<SlidingWindowLimiter>,
}

pub async fn process_expire_api_keys_job(
    _job: ExpireApiKeysJob,
    ctx: Data<CronContext>,
) -> Result<(), apalis::prelude::Error> {
    match ctx.api_keys.expire_due(OffsetDateTime::now_utc()).await {
        Ok(count) if count > 0 => {
            tracing::info!(expired_count = count, "expired api keys");
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to expire api keys");
        }
        _ => {}
    }
    Ok(())
}

/// Catches scheduled posts whose delayed job was lost or failed.
pub async fn process_sweep_scheduled_posts_job(
    _job: SweepScheduledPostsJob,
    ctx: Data<CronContext>,
) -> Result<(), apalis::prelude::Error> {
    match ctx.posts.sweep_scheduled(OffsetDateTime::now_utc()).await {
        Ok(count) if count > 0 => {
            tracing::info!(published_count = count, "published overdue scheduled posts");
        }
        Err(err) => {
            tracing::warn!(error = %err, "scheduled post sweep failed");
        }
        _ => {}
    }
    Ok(())
}

pub async fn process_purge_rate_limits_job(
    _job: PurgeRateLimitsJob,
    ctx: Data<CronContext>,
) -> Result<(), apalis::prelude::Error> {
    let (purged, tracked) = purge_limiters(&ctx.limiters);
    if purged > 0 {
        tracing::debug!(purged, tracked, "evicted idle rate limit buckets");
    }
    Ok(())
}

fn purge_limiters(limiters: &[SlidingWindowLimiter]) -> (usize, usize) {
    limiters.iter().fold((0, 0), |(purged, tracked), limiter| {
        (purged + limiter.purge_idle(), tracked + limiter.tracked_keys())
    })
}

#[derive(Debug, Error)]
#[error("invalid cron expression `{expression}`: {reason}")]
pub struct ScheduleError {
    pub expression: &'static str,
    pub reason: String,
}

fn parse_schedule(expression: &'static str) -> Result<Schedule, ScheduleError> {
    Schedule::from_str(expression).map_err(|err| ScheduleError {
        expression,
        reason: err.to_string(),
    })
}

/// Every hour at minute 0.
pub fn expire_api_keys_schedule() -> Result<Schedule, ScheduleError> {
    parse_schedule("0 0 * * * *")
}

/// Every minute.
pub fn sweep_scheduled_posts_schedule() -> Result<Schedule, ScheduleError> {
    parse_schedule("0 * * * * *")
}

/// Every five minutes.
pub fn purge_rate_limits_schedule() -> Result<Schedule, ScheduleError> {
    parse_schedule("0 */5 * * * *")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedules_parse() {
        let hourly = expire_api_keys_schedule().expect("hourly schedule");
        let upcoming: Vec<_> = hourly.upcoming(chrono::Utc).take(3).collect();
        assert_eq!(upcoming.len(), 3);

        let minutely = sweep_scheduled_posts_schedule().expect("minutely schedule");
        let next: Vec<_> = minutely.upcoming(chrono::Utc).take(2).collect();
        assert_eq!((next[1] - next[0]).num_seconds(), 60);

        let purge = purge_rate_limits_schedule().expect("purge schedule");
        let next: Vec<_> = purge.upcoming(chrono::Utc).take(2).collect();
        assert_eq!((next[1] - next[0]).num_seconds(), 300);
    }

    #[test]
    fn purging_reaches_every_limiter() {
        let api = SlidingWindowLimiter::new(std::time::Duration::ZERO, 10);
        let subscribe = SlidingWindowLimiter::new(std::time::Duration::from_secs(3600), 10);
        api.check("key:a");
        api.check("key:b");
        subscribe.check("ip:203.0.113.1");

        let (purged, tracked) = purge_limiters(&[api.clone(), subscribe.clone()]);
        assert_eq!(purged, 2);
        assert_eq!(tracked, 1);
        assert_eq!(api.tracked_keys(), 0);
        assert_eq!(subscribe.tracked_keys(), 1);
    }
}
