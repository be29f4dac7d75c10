use serde::Serialize;
use uuid::Uuid;

use crate::application::repos::UpdatePostContentParams;
use crate::domain::entities::{PostRecord, RevisionRecord};
use crate::domain::revisions::{RevisionContent, RevisionDiff};

use super::service::AdminPostService;
use super::types::{AdminPostError, RevisionSummary};

#[derive(Debug, Serialize)]
struct RestoreSnapshot<'a> {
    slug: &'a str,
    version: i32,
}

impl AdminPostService {
    pub async fn list_revisions(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
        post_id: Uuid,
    ) -> Result<Vec<RevisionSummary>, AdminPostError> {
        let post = self.load_post(workspace_id, page_id, post_id).await?;
        let revisions = self.revisions.list_revisions(post.id).await?;
        Ok(revisions
            .into_iter()
            .map(|record| RevisionSummary::from_record(record, post.published_revision_id))
            .collect())
    }

    pub async fn get_revision(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
        post_id: Uuid,
        revision_id: Uuid,
    ) -> Result<RevisionRecord, AdminPostError> {
        let post = self.load_post(workspace_id, page_id, post_id).await?;
        self.revisions
            .find_revision(post.id, revision_id)
            .await?
            .ok_or(AdminPostError::RevisionNotFound)
    }

    /// Fields that differ between a stored revision and the current draft.
    pub async fn diff_revision(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
        post_id: Uuid,
        revision_id: Uuid,
    ) -> Result<RevisionDiff, AdminPostError> {
        let post = self.load_post(workspace_id, page_id, post_id).await?;
        let revision = self
            .revisions
            .find_revision(post.id, revision_id)
            .await?
            .ok_or(AdminPostError::RevisionNotFound)?;

        Ok(RevisionDiff::between(
            &RevisionContent {
                title: &revision.title,
                excerpt: &revision.excerpt,
                body_html: &revision.body_html,
            },
            &RevisionContent {
                title: &post.title,
                excerpt: &post.excerpt,
                body_html: &post.body_html,
            },
        ))
    }

    /// Copy a revision back into the draft. The usual dedup applies, so
    /// restoring the latest revision records nothing new.
    pub async fn restore_revision(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        post_id: Uuid,
        revision_id: Uuid,
    ) -> Result<PostRecord, AdminPostError> {
        let post = self.load_post(workspace_id, page_id, post_id).await?;
        let revision = self
            .revisions
            .find_revision(post.id, revision_id)
            .await?
            .ok_or(AdminPostError::RevisionNotFound)?;

        let restored = self
            .posts
            .update_post_content(UpdatePostContentParams {
                id: post.id,
                slug: post.slug.clone(),
                title: revision.title.clone(),
                excerpt: revision.excerpt.clone(),
                body_html: revision.body_html.clone(),
            })
            .await?;

        self.record_revision_if_changed(&restored, actor).await?;

        self.audit
            .record(
                workspace_id,
                actor,
                "post.restore_revision",
                "post",
                Some(&restored.id.to_string()),
                Some(&RestoreSnapshot {
                    slug: &restored.slug,
                    version: revision.version,
                }),
            )
            .await?;

        Ok(restored)
    }
}
