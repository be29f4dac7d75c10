use apalis::prelude::{Data, Error as ApalisError};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::application::repos::{JobsRepo, RepoError};
use crate::domain::types::JobType;

use super::{
    context::{JobWorkerContext, job_failed},
    queue::enqueue_job,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishPostJobPayload {
    pub post_id: Uuid,
}

pub async fn enqueue_publish_post_job<J: JobsRepo + ?Sized>(
    repo: &J,
    post_id: Uuid,
    run_at: OffsetDateTime,
) -> Result<String, RepoError> {
    let payload = PublishPostJobPayload { post_id };
    enqueue_job(repo, JobType::PublishPost, &payload, Some(run_at), 10, 10).await
}

/// Stale jobs (post unscheduled, published early or moved later) finish as no-ops.
pub async fn process_publish_post_job(
    payload: PublishPostJobPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    let outcome = context
        .posts
        .publish_scheduled(payload.post_id, OffsetDateTime::now_utc())
        .await
        .map_err(job_failed)?;

    match outcome {
        Some(post) => info!(
            target = "application::jobs::process_publish_post_job",
            post_id = %post.id,
            slug = %post.slug,
            "scheduled post published"
        ),
        None => info!(
            target = "application::jobs::process_publish_post_job",
            post_id = %payload.post_id,
            "publish job skipped; post no longer due"
        ),
    }

    Ok(())
}
