use serde::Serialize;
use uuid::Uuid;

use crate::application::admin::{ensure_non_empty, slug_failure, trim_optional};
use crate::application::repos::{
    CreatePostParams, CreateRevisionParams, RepoError, UpdatePostContentParams,
};
use crate::domain::entities::{PageRecord, PostRecord, RevisionRecord};
use crate::domain::posts::derive_excerpt;
use crate::domain::revisions::{MAX_REVISIONS_PER_POST, RevisionContent};
use crate::domain::slug::{SlugAsyncError, unique_slug, validate_slug};

use super::service::AdminPostService;
use super::types::{AdminPostError, CreatePostCommand, PostSummarySnapshot, UpdateDraftCommand};

#[derive(Debug, Serialize)]
struct AssignmentSnapshot<'a> {
    slug: &'a str,
    ids: &'a [Uuid],
}

impl AdminPostService {
    pub async fn create_post(
        &self,
        actor: &str,
        workspace_id: Uuid,
        command: CreatePostCommand,
    ) -> Result<PostRecord, AdminPostError> {
        let page = self.require_page(workspace_id, command.page_id).await?;

        let title = command.title.trim().to_string();
        ensure_non_empty(&title, "title").map_err(AdminPostError::ConstraintViolation)?;

        let slug = match trim_optional(command.slug) {
            Some(explicit) => {
                let slug = validate_slug(&explicit)
                    .map_err(|err| AdminPostError::ConstraintViolation(slug_failure(&err, "slug")))?;
                self.ensure_slug_free(page.id, &slug, None).await?;
                slug
            }
            None => {
                let posts = self.posts.clone();
                let page_id = page.id;
                unique_slug(&title, move |candidate| {
                    let posts = posts.clone();
                    async move {
                        posts
                            .find_post_by_slug(page_id, &candidate)
                            .await
                            .map(|existing| existing.is_some())
                    }
                })
                .await
                .map_err(|err| match err {
                    SlugAsyncError::Slug(err) => {
                        AdminPostError::ConstraintViolation(slug_failure(&err, "title"))
                    }
                    SlugAsyncError::Predicate(err) => AdminPostError::Repo(err),
                })?
            }
        };

        let body_html = self.sanitizer.post_body(&command.body_html);
        let excerpt = resolve_excerpt(command.excerpt, &body_html);

        let category_ids = dedup_ids(command.category_ids);
        let author_ids = dedup_ids(command.author_ids);
        self.ensure_categories_on_page(page.id, &category_ids).await?;
        self.ensure_authors_on_page(page.id, &author_ids).await?;

        let post = self
            .posts
            .create_post(CreatePostParams {
                workspace_id,
                page_id: page.id,
                slug,
                title,
                excerpt,
                body_html,
            })
            .await
            .map_err(map_slug_conflict)?;

        self.record_revision_if_changed(&post, actor).await?;

        if !category_ids.is_empty() {
            self.posts
                .replace_post_categories(post.id, &category_ids)
                .await?;
        }
        if !author_ids.is_empty() {
            self.posts.replace_post_authors(post.id, &author_ids).await?;
        }

        self.audit
            .record(
                workspace_id,
                actor,
                "post.create",
                "post",
                Some(&post.id.to_string()),
                Some(&PostSummarySnapshot::of(&post)),
            )
            .await?;

        Ok(post)
    }

    /// Save the working draft; a revision is only recorded when the content changed.
    pub async fn update_draft(
        &self,
        actor: &str,
        workspace_id: Uuid,
        command: UpdateDraftCommand,
    ) -> Result<PostRecord, AdminPostError> {
        let existing = self.load_post(workspace_id, command.page_id, command.id).await?;

        let title = command.title.trim().to_string();
        ensure_non_empty(&title, "title").map_err(AdminPostError::ConstraintViolation)?;
        let slug = validate_slug(&command.slug)
            .map_err(|err| AdminPostError::ConstraintViolation(slug_failure(&err, "slug")))?;
        if slug != existing.slug {
            self.ensure_slug_free(existing.page_id, &slug, Some(existing.id))
                .await?;
        }

        let body_html = self.sanitizer.post_body(&command.body_html);
        let excerpt = resolve_excerpt(command.excerpt, &body_html);

        let post = self
            .posts
            .update_post_content(UpdatePostContentParams {
                id: existing.id,
                slug,
                title,
                excerpt,
                body_html,
            })
            .await
            .map_err(map_slug_conflict)?;

        let (_, created) = self.record_revision_if_changed(&post, actor).await?;

        if created || post.slug != existing.slug {
            self.audit
                .record(
                    workspace_id,
                    actor,
                    "post.update",
                    "post",
                    Some(&post.id.to_string()),
                    Some(&PostSummarySnapshot::of(&post)),
                )
                .await?;
        }

        Ok(post)
    }

    pub async fn delete_post(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        id: Uuid,
    ) -> Result<(), AdminPostError> {
        let post = self.load_post(workspace_id, page_id, id).await?;
        self.posts.delete_post(page_id, id).await?;
        self.audit
            .record(
                workspace_id,
                actor,
                "post.delete",
                "post",
                Some(&post.id.to_string()),
                Some(&PostSummarySnapshot::of(&post)),
            )
            .await?;
        Ok(())
    }

    pub async fn replace_categories(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        id: Uuid,
        category_ids: Vec<Uuid>,
    ) -> Result<(), AdminPostError> {
        let post = self.load_post(workspace_id, page_id, id).await?;
        let category_ids = dedup_ids(category_ids);
        self.ensure_categories_on_page(post.page_id, &category_ids)
            .await?;

        self.posts
            .replace_post_categories(post.id, &category_ids)
            .await?;
        self.audit
            .record(
                workspace_id,
                actor,
                "post.categories",
                "post",
                Some(&post.id.to_string()),
                Some(&AssignmentSnapshot {
                    slug: &post.slug,
                    ids: &category_ids,
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn replace_authors(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        id: Uuid,
        author_ids: Vec<Uuid>,
    ) -> Result<(), AdminPostError> {
        let post = self.load_post(workspace_id, page_id, id).await?;
        let author_ids = dedup_ids(author_ids);
        self.ensure_authors_on_page(post.page_id, &author_ids).await?;

        self.posts.replace_post_authors(post.id, &author_ids).await?;
        self.audit
            .record(
                workspace_id,
                actor,
                "post.authors",
                "post",
                Some(&post.id.to_string()),
                Some(&AssignmentSnapshot {
                    slug: &post.slug,
                    ids: &author_ids,
                }),
            )
            .await?;
        Ok(())
    }

    pub(crate) async fn require_page(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
    ) -> Result<PageRecord, AdminPostError> {
        self.pages
            .find_page(workspace_id, page_id)
            .await?
            .ok_or(AdminPostError::PageNotFound)
    }

    /// Load a post through its page so cross-workspace ids resolve to NotFound.
    pub(crate) async fn load_post(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
        id: Uuid,
    ) -> Result<PostRecord, AdminPostError> {
        let page = self.require_page(workspace_id, page_id).await?;
        self.posts
            .find_post(page.id, id)
            .await?
            .ok_or(AdminPostError::NotFound)
    }

    /// Returns the revision matching the current draft and whether it was
    /// created by this call.
    pub(crate) async fn record_revision_if_changed(
        &self,
        post: &PostRecord,
        actor: &str,
    ) -> Result<(RevisionRecord, bool), AdminPostError> {
        let digest = RevisionContent {
            title: &post.title,
            excerpt: &post.excerpt,
            body_html: &post.body_html,
        }
        .digest();

        if let Some(latest) = self.revisions.latest_revision(post.id).await?
            && latest.digest == digest
        {
            return Ok((latest, false));
        }

        let revision = self
            .revisions
            .create_revision(CreateRevisionParams {
                post_id: post.id,
                title: post.title.clone(),
                excerpt: post.excerpt.clone(),
                body_html: post.body_html.clone(),
                digest,
                created_by: actor.to_string(),
            })
            .await?;

        self.revisions
            .prune_revisions(post.id, MAX_REVISIONS_PER_POST, post.published_revision_id)
            .await?;

        Ok((revision, true))
    }

    async fn ensure_slug_free(
        &self,
        page_id: Uuid,
        slug: &str,
        own: Option<Uuid>,
    ) -> Result<(), AdminPostError> {
        match self.posts.find_post_by_slug(page_id, slug).await? {
            Some(other) if Some(other.id) != own => Err(AdminPostError::SlugTaken(slug.to_string())),
            _ => Ok(()),
        }
    }

    async fn ensure_categories_on_page(
        &self,
        page_id: Uuid,
        ids: &[Uuid],
    ) -> Result<(), AdminPostError> {
        if ids.is_empty() {
            return Ok(());
        }
        let found = self.categories.count_categories_in_page(page_id, ids).await?;
        if found != ids.len() as u64 {
            return Err(AdminPostError::UnknownReferences { kind: "category" });
        }
        Ok(())
    }

    async fn ensure_authors_on_page(
        &self,
        page_id: Uuid,
        ids: &[Uuid],
    ) -> Result<(), AdminPostError> {
        if ids.is_empty() {
            return Ok(());
        }
        let found = self.authors.count_authors_in_page(page_id, ids).await?;
        if found != ids.len() as u64 {
            return Err(AdminPostError::UnknownReferences { kind: "author" });
        }
        Ok(())
    }
}

fn resolve_excerpt(excerpt: Option<String>, body_html: &str) -> String {
    trim_optional(excerpt).unwrap_or_else(|| derive_excerpt(body_html))
}

fn dedup_ids(ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut seen = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen
}

fn map_slug_conflict(err: RepoError) -> AdminPostError {
    match err {
        RepoError::Duplicate { .. } => AdminPostError::ConstraintViolation("slug"),
        other => AdminPostError::Repo(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(dedup_ids(vec![b, a, b, a]), vec![b, a]);
    }

    #[test]
    fn blank_excerpt_is_derived_from_body() {
        assert_eq!(resolve_excerpt(Some("  ".into()), "<p>Body text</p>"), "Body text");
        assert_eq!(resolve_excerpt(Some(" Given ".into()), "<p>Body</p>"), "Given");
    }
}
