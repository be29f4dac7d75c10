mod context;
mod cron;
mod newsletter;
mod publish;
mod queue;

pub use context::{JobWorkerContext, job_failed};
pub use cron::{
    CronContext, ExpireApiKeysJob, PurgeRateLimitsJob, ScheduleError, SweepScheduledPostsJob,
    expire_api_keys_schedule, process_expire_api_keys_job, process_purge_rate_limits_job,
    process_sweep_scheduled_posts_job, purge_rate_limits_schedule, sweep_scheduled_posts_schedule,
};
pub use newsletter::{
    SendNewsletterEmailJobPayload, enqueue_send_newsletter_email_job,
    process_send_newsletter_email_job,
};
pub use publish::{PublishPostJobPayload, enqueue_publish_post_job, process_publish_post_job};
pub use queue::enqueue_job;
