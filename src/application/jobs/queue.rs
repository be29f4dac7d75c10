use time::OffsetDateTime;

use crate::application::repos::{JobsRepo, RepoError};
use crate::domain::types::JobType;

/// Enqueue a job with the provided payload, returning the assigned job id.
pub async fn enqueue_job<J, P>(
    repo: &J,
    job_type: JobType,
    payload: &P,
    run_at: Option<OffsetDateTime>,
    max_attempts: i32,
    priority: i32,
) -> Result<String, RepoError>
where
    J: JobsRepo + ?Sized,
    P: serde::Serialize,
{
    let payload = serde_json::to_value(payload)
        .map_err(|err| RepoError::from_persistence(err.to_string()))?;

    repo.enqueue_job(job_type, payload, run_at, max_attempts, priority)
        .await
}
