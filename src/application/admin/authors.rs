use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::application::admin::audit::AdminAuditService;
use crate::application::admin::{ensure_non_empty, slug_failure, trim_optional};
use crate::application::repos::{AuthorParams, AuthorsRepo, PagesRepo, RepoError, WorkspacesRepo};
use crate::domain::entities::AuthorRecord;
use crate::domain::slug::{SlugAsyncError, unique_slug, validate_slug};

#[derive(Debug, Error)]
pub enum AdminAuthorError {
    #[error("{0}")]
    ConstraintViolation(&'static str),
    #[error("page not found")]
    PageNotFound,
    #[error("author not found")]
    NotFound,
    #[error("member not found in this workspace")]
    MemberNotFound,
    #[error("slug `{0}` is already used on this page")]
    SlugTaken(String),
    #[error("author is attached to {count} post(s)")]
    InUse { count: u64 },
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone)]
pub struct AuthorCommand {
    pub name: String,
    pub slug: Option<String>,
    pub member_id: Option<Uuid>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub website_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct AuthorSnapshot<'a> {
    slug: &'a str,
    name: &'a str,
    member_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct AdminAuthorService {
    pages: Arc<dyn PagesRepo>,
    workspaces: Arc<dyn WorkspacesRepo>,
    repo: Arc<dyn AuthorsRepo>,
    audit: AdminAuditService,
}

impl AdminAuthorService {
    pub fn new(
        pages: Arc<dyn PagesRepo>,
        workspaces: Arc<dyn WorkspacesRepo>,
        repo: Arc<dyn AuthorsRepo>,
        audit: AdminAuditService,
    ) -> Self {
        Self {
            pages,
            workspaces,
            repo,
            audit,
        }
    }

    pub async fn list(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
    ) -> Result<Vec<AuthorRecord>, AdminAuthorError> {
        self.require_page(workspace_id, page_id).await?;
        self.repo
            .list_authors(page_id)
            .await
            .map_err(AdminAuthorError::from)
    }

    pub async fn get(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
        id: Uuid,
    ) -> Result<AuthorRecord, AdminAuthorError> {
        self.require_page(workspace_id, page_id).await?;
        self.repo
            .find_author(page_id, id)
            .await?
            .ok_or(AdminAuthorError::NotFound)
    }

    pub async fn create(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        command: AuthorCommand,
    ) -> Result<AuthorRecord, AdminAuthorError> {
        self.require_page(workspace_id, page_id).await?;
        let params = self.build_params(workspace_id, page_id, command, None).await?;
        let author = self.repo.create_author(params).await.map_err(map_duplicate)?;
        self.record(workspace_id, actor, "author.create", &author)
            .await?;
        Ok(author)
    }

    pub async fn update(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        id: Uuid,
        command: AuthorCommand,
    ) -> Result<AuthorRecord, AdminAuthorError> {
        let existing = self.get(workspace_id, page_id, id).await?;
        let mut command = command;
        if command.slug.is_none() {
            command.slug = Some(existing.slug.clone());
        }
        let params = self
            .build_params(workspace_id, page_id, command, Some(existing.id))
            .await?;
        let author = self
            .repo
            .update_author(existing.id, params)
            .await
            .map_err(map_duplicate)?;
        self.record(workspace_id, actor, "author.update", &author)
            .await?;
        Ok(author)
    }

    /// Refuses to drop an author still credited on posts unless `force` is set.
    pub async fn delete(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        id: Uuid,
        force: bool,
    ) -> Result<(), AdminAuthorError> {
        let author = self.get(workspace_id, page_id, id).await?;
        let count = self.repo.count_author_posts(author.id).await?;
        if count > 0 && !force {
            return Err(AdminAuthorError::InUse { count });
        }
        self.repo.delete_author(page_id, author.id).await?;
        self.record(workspace_id, actor, "author.delete", &author)
            .await?;
        Ok(())
    }

    async fn build_params(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
        command: AuthorCommand,
        own: Option<Uuid>,
    ) -> Result<AuthorParams, AdminAuthorError> {
        let name = command.name.trim().to_string();
        ensure_non_empty(&name, "name").map_err(AdminAuthorError::ConstraintViolation)?;

        if let Some(member_id) = command.member_id {
            self.workspaces
                .find_member(workspace_id, member_id)
                .await?
                .ok_or(AdminAuthorError::MemberNotFound)?;
        }

        let slug = self.resolve_slug(page_id, &name, command.slug, own).await?;

        Ok(AuthorParams {
            page_id,
            member_id: command.member_id,
            slug,
            name,
            bio: trim_optional(command.bio),
            avatar_url: normalize_url(command.avatar_url, "avatar_url")?,
            website_url: normalize_url(command.website_url, "website_url")?,
        })
    }

    async fn require_page(&self, workspace_id: Uuid, page_id: Uuid) -> Result<(), AdminAuthorError> {
        self.pages
            .find_page(workspace_id, page_id)
            .await?
            .map(|_| ())
            .ok_or(AdminAuthorError::PageNotFound)
    }

    async fn resolve_slug(
        &self,
        page_id: Uuid,
        name: &str,
        explicit: Option<String>,
        own: Option<Uuid>,
    ) -> Result<String, AdminAuthorError> {
        if let Some(explicit) = trim_optional(explicit) {
            let slug = validate_slug(&explicit)
                .map_err(|err| AdminAuthorError::ConstraintViolation(slug_failure(&err, "slug")))?;
            return match self.repo.find_author_by_slug(page_id, &slug).await? {
                Some(other) if Some(other.id) != own => Err(AdminAuthorError::SlugTaken(slug)),
                _ => Ok(slug),
            };
        }

        let repo = self.repo.clone();
        unique_slug(name, move |candidate| {
            let repo = repo.clone();
            async move {
                repo.find_author_by_slug(page_id, &candidate)
                    .await
                    .map(|existing| existing.is_some())
            }
        })
        .await
        .map_err(|err| match err {
            SlugAsyncError::Slug(err) => {
                AdminAuthorError::ConstraintViolation(slug_failure(&err, "name"))
            }
            SlugAsyncError::Predicate(err) => AdminAuthorError::Repo(err),
        })
    }

    async fn record(
        &self,
        workspace_id: Uuid,
        actor: &str,
        action: &str,
        author: &AuthorRecord,
    ) -> Result<(), RepoError> {
        self.audit
            .record(
                workspace_id,
                actor,
                action,
                "author",
                Some(&author.id.to_string()),
                Some(&AuthorSnapshot {
                    slug: &author.slug,
                    name: &author.name,
                    member_id: author.member_id,
                }),
            )
            .await
    }
}

/// Accepts absolute http(s) URLs only.
pub(crate) fn parse_http_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Some(url.to_string()),
        _ => None,
    }
}

fn normalize_url(
    value: Option<String>,
    field: &'static str,
) -> Result<Option<String>, AdminAuthorError> {
    match trim_optional(value) {
        Some(raw) => parse_http_url(&raw)
            .map(Some)
            .ok_or(AdminAuthorError::ConstraintViolation(field)),
        None => Ok(None),
    }
}

fn map_duplicate(err: RepoError) -> AdminAuthorError {
    match err {
        RepoError::Duplicate { .. } => AdminAuthorError::ConstraintViolation("slug"),
        other => AdminAuthorError::Repo(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_urls_are_accepted() {
        assert_eq!(
            parse_http_url(" https://example.com/me "),
            Some("https://example.com/me".to_string())
        );
        assert_eq!(
            parse_http_url("http://example.com"),
            Some("http://example.com/".to_string())
        );
    }

    #[test]
    fn other_schemes_and_relative_urls_are_rejected() {
        assert_eq!(parse_http_url("ftp://example.com"), None);
        assert_eq!(parse_http_url("javascript:alert(1)"), None);
        assert_eq!(parse_http_url("/relative/path"), None);
    }
}
