use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use url::Host;
use uuid::Uuid;

use crate::application::admin::audit::AdminAuditService;
use crate::application::admin::{ensure_non_empty, slug_failure, trim_optional};
use crate::application::pagination::{CursorPage, PageRequest, TimeCursor};
use crate::application::repos::{
    CreatePageParams, PageQueryFilter, PagesRepo, RepoError, UpdatePageParams,
};
use crate::domain::entities::PageRecord;
use crate::domain::slug::{SlugAsyncError, unique_slug, validate_slug};

const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Error)]
pub enum AdminPageError {
    #[error("{0}")]
    ConstraintViolation(&'static str),
    #[error("page not found")]
    NotFound,
    #[error("slug `{0}` is already taken")]
    SlugTaken(String),
    #[error("domain `{0}` is already attached to another page")]
    DomainTaken(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone)]
pub struct CreatePageCommand {
    pub title: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub custom_domain: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdatePageCommand {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub custom_domain: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
struct PageSnapshot<'a> {
    slug: &'a str,
    title: &'a str,
    custom_domain: Option<&'a str>,
}

#[derive(Clone)]
pub struct AdminPageService {
    repo: Arc<dyn PagesRepo>,
    audit: AdminAuditService,
}

impl AdminPageService {
    pub fn new(repo: Arc<dyn PagesRepo>, audit: AdminAuditService) -> Self {
        Self { repo, audit }
    }

    pub async fn list(
        &self,
        workspace_id: Uuid,
        filter: &PageQueryFilter,
        page: PageRequest<TimeCursor>,
    ) -> Result<CursorPage<PageRecord>, AdminPageError> {
        self.repo
            .list_pages(workspace_id, filter, page)
            .await
            .map_err(AdminPageError::from)
    }

    pub async fn get(&self, workspace_id: Uuid, id: Uuid) -> Result<PageRecord, AdminPageError> {
        self.repo
            .find_page(workspace_id, id)
            .await?
            .ok_or(AdminPageError::NotFound)
    }

    pub async fn create_page(
        &self,
        actor: &str,
        workspace_id: Uuid,
        command: CreatePageCommand,
    ) -> Result<PageRecord, AdminPageError> {
        let title = command.title.trim().to_string();
        ensure_non_empty(&title, "title").map_err(AdminPageError::ConstraintViolation)?;

        let slug = match trim_optional(command.slug) {
            Some(explicit) => {
                let slug = validate_slug(&explicit)
                    .map_err(|err| AdminPageError::ConstraintViolation(slug_failure(&err, "slug")))?;
                self.ensure_slug_free(&slug, None).await?;
                slug
            }
            None => {
                let repo = self.repo.clone();
                unique_slug(&title, move |candidate| {
                    let repo = repo.clone();
                    async move {
                        repo.find_page_by_slug(&candidate)
                            .await
                            .map(|existing| existing.is_some())
                    }
                })
                .await
                .map_err(|err| match err {
                    SlugAsyncError::Slug(err) => {
                        AdminPageError::ConstraintViolation(slug_failure(&err, "title"))
                    }
                    SlugAsyncError::Predicate(err) => AdminPageError::Repo(err),
                })?
            }
        };

        let custom_domain = normalize_domain(command.custom_domain)?;
        if let Some(domain) = custom_domain.as_deref() {
            self.ensure_domain_free(domain, None).await?;
        }

        let page = self
            .repo
            .create_page(CreatePageParams {
                workspace_id,
                slug,
                title,
                description: trim_optional(command.description),
                custom_domain,
                language: normalize_language(command.language)?,
            })
            .await
            .map_err(map_unique)?;

        self.record(actor, "page.create", &page).await?;
        Ok(page)
    }

    pub async fn update_page(
        &self,
        actor: &str,
        workspace_id: Uuid,
        command: UpdatePageCommand,
    ) -> Result<PageRecord, AdminPageError> {
        let existing = self.get(workspace_id, command.id).await?;

        let title = command.title.trim().to_string();
        ensure_non_empty(&title, "title").map_err(AdminPageError::ConstraintViolation)?;
        let slug = validate_slug(&command.slug)
            .map_err(|err| AdminPageError::ConstraintViolation(slug_failure(&err, "slug")))?;
        if slug != existing.slug {
            self.ensure_slug_free(&slug, Some(existing.id)).await?;
        }

        let custom_domain = normalize_domain(command.custom_domain)?;
        if let Some(domain) = custom_domain.as_deref()
            && existing.custom_domain.as_deref() != Some(domain)
        {
            self.ensure_domain_free(domain, Some(existing.id)).await?;
        }

        let page = self
            .repo
            .update_page(UpdatePageParams {
                workspace_id,
                id: existing.id,
                slug,
                title,
                description: trim_optional(command.description),
                custom_domain,
                language: normalize_language(command.language)?,
            })
            .await
            .map_err(map_unique)?;

        self.record(actor, "page.update", &page).await?;
        Ok(page)
    }

    pub async fn delete_page(
        &self,
        actor: &str,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<(), AdminPageError> {
        let page = self.get(workspace_id, id).await?;
        self.repo.delete_page(workspace_id, id).await?;
        self.record(actor, "page.delete", &page).await?;
        Ok(())
    }

    async fn ensure_slug_free(&self, slug: &str, own: Option<Uuid>) -> Result<(), AdminPageError> {
        match self.repo.find_page_by_slug(slug).await? {
            Some(other) if Some(other.id) != own => Err(AdminPageError::SlugTaken(slug.to_string())),
            _ => Ok(()),
        }
    }

    async fn ensure_domain_free(
        &self,
        domain: &str,
        own: Option<Uuid>,
    ) -> Result<(), AdminPageError> {
        match self.repo.find_page_by_domain(domain).await? {
            Some(other) if Some(other.id) != own => {
                Err(AdminPageError::DomainTaken(domain.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn record(&self, actor: &str, action: &str, page: &PageRecord) -> Result<(), RepoError> {
        let snapshot = PageSnapshot {
            slug: &page.slug,
            title: &page.title,
            custom_domain: page.custom_domain.as_deref(),
        };
        self.audit
            .record(
                page.workspace_id,
                actor,
                action,
                "page",
                Some(&page.id.to_string()),
                Some(&snapshot),
            )
            .await
    }
}

fn map_unique(err: RepoError) -> AdminPageError {
    match err {
        RepoError::Duplicate { constraint } if constraint.contains("domain") => {
            AdminPageError::ConstraintViolation("custom_domain")
        }
        RepoError::Duplicate { .. } => AdminPageError::ConstraintViolation("slug"),
        other => AdminPageError::Repo(other),
    }
}

/// Lowercased host name without a trailing dot; IP literals are refused.
pub(crate) fn normalize_domain(value: Option<String>) -> Result<Option<String>, AdminPageError> {
    let Some(raw) = trim_optional(value) else {
        return Ok(None);
    };
    let lowered = raw.trim_end_matches('.').to_lowercase();
    match Host::parse(&lowered) {
        Ok(Host::Domain(domain)) if domain.contains('.') => Ok(Some(domain)),
        _ => Err(AdminPageError::ConstraintViolation("custom_domain")),
    }
}

fn normalize_language(value: Option<String>) -> Result<String, AdminPageError> {
    let Some(language) = trim_optional(value) else {
        return Ok(DEFAULT_LANGUAGE.to_string());
    };
    let valid = (2..=35).contains(&language.len())
        && language
            .split('-')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric()));
    if valid {
        Ok(language)
    } else {
        Err(AdminPageError::ConstraintViolation("language"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domains_are_lowercased_and_validated() {
        assert_eq!(
            normalize_domain(Some(" Blog.Example.COM. ".into())).expect("valid"),
            Some("blog.example.com".to_string())
        );
        assert_eq!(normalize_domain(Some("   ".into())).expect("blank"), None);
        assert!(normalize_domain(Some("127.0.0.1".into())).is_err());
        assert!(normalize_domain(Some("localhost".into())).is_err());
        assert!(normalize_domain(Some("bad domain.com".into())).is_err());
    }

    #[test]
    fn language_defaults_and_validates_tags() {
        assert_eq!(normalize_language(None).expect("default"), "en");
        assert_eq!(normalize_language(Some("pt-BR".into())).expect("tag"), "pt-BR");
        assert!(normalize_language(Some("e".into())).is_err());
        assert!(normalize_language(Some("en_US".into())).is_err());
    }
}
