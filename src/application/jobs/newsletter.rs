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
pub struct SendNewsletterEmailJobPayload {
    pub email_id: Uuid,
    /// Send generation at enqueue time; a later send or schedule makes this job stale.
    pub generation: i32,
}

pub async fn enqueue_send_newsletter_email_job<J: JobsRepo + ?Sized>(
    repo: &J,
    email_id: Uuid,
    generation: i32,
    run_at: Option<OffsetDateTime>,
) -> Result<String, RepoError> {
    let payload = SendNewsletterEmailJobPayload {
        email_id,
        generation,
    };
    enqueue_job(repo, JobType::SendNewsletterEmail, &payload, run_at, 5, 5).await
}

/// Deliveries already recorded are skipped, so a retried job resumes where it stopped.
pub async fn process_send_newsletter_email_job(
    payload: SendNewsletterEmailJobPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    let report = context
        .delivery
        .deliver(payload.email_id, payload.generation)
        .await
        .map_err(job_failed)?;

    info!(
        target = "application::jobs::process_send_newsletter_email_job",
        email_id = %payload.email_id,
        generation = payload.generation,
        sent = report.sent,
        skipped = report.skipped,
        failed = report.failed,
        status = report.status.as_str(),
        "newsletter email processed"
    );

    Ok(())
}
