use uuid::Uuid;

use crate::application::pagination::{CursorPage, PageRequest, TimeCursor};
use crate::application::repos::{PostListScope, PostQueryFilter};
use crate::domain::entities::PostRecord;
use crate::domain::revisions::RevisionContent;
use crate::domain::types::PostStatus;

use super::service::AdminPostService;
use super::types::{AdminPostError, PostDetail};

impl AdminPostService {
    pub async fn list_posts(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
        status: Option<PostStatus>,
        filter: &PostQueryFilter,
        page: PageRequest<TimeCursor>,
    ) -> Result<CursorPage<PostRecord>, AdminPostError> {
        let blog = self.require_page(workspace_id, page_id).await?;
        self.posts
            .list_posts(blog.id, PostListScope::Admin { status }, filter, page)
            .await
            .map_err(AdminPostError::from)
    }

    pub async fn get_post(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
        id: Uuid,
    ) -> Result<PostDetail, AdminPostError> {
        let post = self.load_post(workspace_id, page_id, id).await?;
        let categories = self.posts.list_post_categories(post.id).await?;
        let authors = self.posts.list_post_authors(post.id).await?;
        let has_unpublished_changes = self.has_unpublished_changes(&post).await?;

        Ok(PostDetail {
            post,
            categories,
            authors,
            has_unpublished_changes,
        })
    }

    /// True when a published post's draft digest differs from its published revision.
    pub async fn has_unpublished_changes(&self, post: &PostRecord) -> Result<bool, AdminPostError> {
        let Some(published_id) = post.published_revision_id else {
            return Ok(false);
        };
        if post.status != PostStatus::Published {
            return Ok(false);
        }

        let draft_digest = RevisionContent {
            title: &post.title,
            excerpt: &post.excerpt,
            body_html: &post.body_html,
        }
        .digest();

        match self.revisions.find_revision(post.id, published_id).await? {
            Some(published) => Ok(published.digest != draft_digest),
            None => Ok(true),
        }
    }
}
