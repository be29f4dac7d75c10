use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    application::repos::{JobsRepo, RepoError},
    domain::types::JobType,
};

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl JobsRepo for PostgresRepositories {
    async fn enqueue_job(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        run_at: Option<OffsetDateTime>,
        max_attempts: i32,
        priority: i32,
    ) -> Result<String, RepoError> {
        let run_at = run_at.unwrap_or_else(OffsetDateTime::now_utc);
        sqlx::query_scalar::<_, String>(
            "SELECT (apalis.push_job($1, $2::json, $3, $4, $5, $6)).id",
        )
        .bind(job_type.as_str())
        .bind(payload)
        .bind("Pending")
        .bind(run_at)
        .bind(max_attempts)
        .bind(priority)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }
}
