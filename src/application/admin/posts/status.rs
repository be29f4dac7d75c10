use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::jobs::enqueue_publish_post_job;
use crate::application::repos::UpdatePostStatusParams;
use crate::domain::entities::PostRecord;
use crate::domain::error::DomainError;
use crate::domain::posts::{PostAction, transition};
use crate::domain::types::PostStatus;

use super::service::AdminPostService;
use super::types::AdminPostError;

/// Actor recorded for publishes performed by the scheduler.
pub const SCHEDULER_ACTOR: &str = "system:scheduler";

const SWEEP_BATCH: u32 = 100;

#[derive(Debug, Serialize)]
struct StatusSnapshot<'a> {
    slug: &'a str,
    from: PostStatus,
    to: PostStatus,
    action: &'static str,
    scheduled_at: Option<OffsetDateTime>,
}

impl AdminPostService {
    /// Apply a lifecycle action following the publish state machine.
    pub async fn change_status(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        id: Uuid,
        action: PostAction,
    ) -> Result<PostRecord, AdminPostError> {
        let post = self.load_post(workspace_id, page_id, id).await?;
        self.apply_action(actor, post, action, OffsetDateTime::now_utc())
            .await
    }

    /// Publish a scheduled post when its time has come. Returns `None` when the
    /// post left `scheduled` or was moved to a later time.
    pub async fn publish_scheduled(
        &self,
        post_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<PostRecord>, AdminPostError> {
        let Some(post) = self.posts.find_post_by_id(post_id).await? else {
            return Ok(None);
        };
        if post.status != PostStatus::Scheduled {
            return Ok(None);
        }
        if post.scheduled_at.is_some_and(|at| at > now) {
            return Ok(None);
        }

        let post = self
            .apply_action(SCHEDULER_ACTOR, post, PostAction::Publish, now)
            .await?;
        Ok(Some(post))
    }

    /// Publish every scheduled post whose time has passed; returns how many were published.
    pub async fn sweep_scheduled(&self, now: OffsetDateTime) -> Result<u64, AdminPostError> {
        let due = self.posts.list_due_scheduled(now, SWEEP_BATCH).await?;
        let mut published = 0;
        for post in due {
            match self.publish_scheduled(post.id, now).await {
                Ok(Some(_)) => published += 1,
                Ok(None) => {}
                Err(err) => warn!(post_id = %post.id, error = %err, "scheduled publish failed"),
            }
        }
        Ok(published)
    }

    async fn apply_action(
        &self,
        actor: &str,
        post: PostRecord,
        action: PostAction,
        now: OffsetDateTime,
    ) -> Result<PostRecord, AdminPostError> {
        let next = transition(post.status, &action, now).map_err(DomainError::from)?;

        let params = match action {
            PostAction::Publish => {
                let (revision, _) = self.record_revision_if_changed(&post, actor).await?;
                let published_at = match post.status {
                    PostStatus::Published => post.published_at.unwrap_or(now),
                    _ => now,
                };
                UpdatePostStatusParams {
                    id: post.id,
                    status: next,
                    published_revision_id: Some(revision.id),
                    scheduled_at: None,
                    published_at: Some(published_at),
                    archived_at: None,
                }
            }
            PostAction::Schedule { publish_at } => UpdatePostStatusParams {
                id: post.id,
                status: next,
                published_revision_id: post.published_revision_id,
                scheduled_at: Some(publish_at),
                published_at: None,
                archived_at: None,
            },
            PostAction::Unschedule => UpdatePostStatusParams {
                id: post.id,
                status: next,
                published_revision_id: post.published_revision_id,
                scheduled_at: None,
                published_at: None,
                archived_at: None,
            },
            PostAction::Unpublish | PostAction::Restore => UpdatePostStatusParams {
                id: post.id,
                status: next,
                published_revision_id: None,
                scheduled_at: None,
                published_at: None,
                archived_at: None,
            },
            PostAction::Archive => UpdatePostStatusParams {
                id: post.id,
                status: next,
                published_revision_id: post.published_revision_id,
                scheduled_at: None,
                published_at: post.published_at,
                archived_at: Some(now),
            },
        };

        let updated = self.posts.update_post_status(params).await?;

        if let PostAction::Schedule { publish_at } = action {
            enqueue_publish_post_job(self.jobs.as_ref(), updated.id, publish_at).await?;
        }

        let snapshot = StatusSnapshot {
            slug: &updated.slug,
            from: post.status,
            to: updated.status,
            action: action.as_str(),
            scheduled_at: updated.scheduled_at,
        };
        self.audit
            .record(
                updated.workspace_id,
                actor,
                "post.status",
                "post",
                Some(&updated.id.to_string()),
                Some(&snapshot),
            )
            .await?;

        info!(
            target = "application::admin::posts::status",
            post_id = %updated.id,
            from = post.status.as_str(),
            to = updated.status.as_str(),
            "post status changed"
        );

        Ok(updated)
    }
}
