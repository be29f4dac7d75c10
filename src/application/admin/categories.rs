use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::application::admin::audit::AdminAuditService;
use crate::application::admin::{ensure_non_empty, slug_failure, trim_optional};
use crate::application::repos::{
    CategoriesRepo, CategoryWithCount, CreateCategoryParams, PagesRepo, RepoError,
    UpdateCategoryParams,
};
use crate::domain::entities::CategoryRecord;
use crate::domain::slug::{SlugAsyncError, unique_slug, validate_slug};

#[derive(Debug, Error)]
pub enum AdminCategoryError {
    #[error("{0}")]
    ConstraintViolation(&'static str),
    #[error("page not found")]
    PageNotFound,
    #[error("category not found")]
    NotFound,
    #[error("slug `{0}` is already used on this page")]
    SlugTaken(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone)]
pub struct CategoryCommand {
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub position: Option<i32>,
}

#[derive(Debug, Serialize)]
struct CategorySnapshot<'a> {
    slug: &'a str,
    name: &'a str,
}

#[derive(Clone)]
pub struct AdminCategoryService {
    pages: Arc<dyn PagesRepo>,
    repo: Arc<dyn CategoriesRepo>,
    audit: AdminAuditService,
}

impl AdminCategoryService {
    pub fn new(
        pages: Arc<dyn PagesRepo>,
        repo: Arc<dyn CategoriesRepo>,
        audit: AdminAuditService,
    ) -> Self {
        Self { pages, repo, audit }
    }

    /// Categories with their published post counts, ordered by position.
    pub async fn list(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
    ) -> Result<Vec<CategoryWithCount>, AdminCategoryError> {
        self.require_page(workspace_id, page_id).await?;
        self.repo
            .list_categories(page_id)
            .await
            .map_err(AdminCategoryError::from)
    }

    pub async fn get(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
        id: Uuid,
    ) -> Result<CategoryRecord, AdminCategoryError> {
        self.require_page(workspace_id, page_id).await?;
        self.repo
            .find_category(page_id, id)
            .await?
            .ok_or(AdminCategoryError::NotFound)
    }

    pub async fn create(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        command: CategoryCommand,
    ) -> Result<CategoryRecord, AdminCategoryError> {
        self.require_page(workspace_id, page_id).await?;
        let name = command.name.trim().to_string();
        ensure_non_empty(&name, "name").map_err(AdminCategoryError::ConstraintViolation)?;

        let slug = self.resolve_slug(page_id, &name, command.slug, None).await?;
        let position = match command.position {
            Some(position) => position,
            None => self.repo.list_categories(page_id).await?.len() as i32,
        };

        let category = self
            .repo
            .create_category(CreateCategoryParams {
                page_id,
                slug,
                name,
                description: trim_optional(command.description),
                position,
            })
            .await
            .map_err(map_duplicate)?;

        self.record(workspace_id, actor, "category.create", &category)
            .await?;
        Ok(category)
    }

    pub async fn update(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        id: Uuid,
        command: CategoryCommand,
    ) -> Result<CategoryRecord, AdminCategoryError> {
        let existing = self.get(workspace_id, page_id, id).await?;
        let name = command.name.trim().to_string();
        ensure_non_empty(&name, "name").map_err(AdminCategoryError::ConstraintViolation)?;

        let slug = match command.slug {
            Some(slug) => self.resolve_slug(page_id, &name, Some(slug), Some(id)).await?,
            None => existing.slug.clone(),
        };

        let category = self
            .repo
            .update_category(UpdateCategoryParams {
                page_id,
                id,
                slug,
                name,
                description: trim_optional(command.description),
                position: command.position.unwrap_or(existing.position),
            })
            .await
            .map_err(map_duplicate)?;

        self.record(workspace_id, actor, "category.update", &category)
            .await?;
        Ok(category)
    }

    /// Deleting a category detaches it from every post.
    pub async fn delete(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        id: Uuid,
    ) -> Result<(), AdminCategoryError> {
        let category = self.get(workspace_id, page_id, id).await?;
        self.repo.delete_category(page_id, id).await?;
        self.record(workspace_id, actor, "category.delete", &category)
            .await?;
        Ok(())
    }

    async fn require_page(&self, workspace_id: Uuid, page_id: Uuid) -> Result<(), AdminCategoryError> {
        self.pages
            .find_page(workspace_id, page_id)
            .await?
            .map(|_| ())
            .ok_or(AdminCategoryError::PageNotFound)
    }

    async fn resolve_slug(
        &self,
        page_id: Uuid,
        name: &str,
        explicit: Option<String>,
        own: Option<Uuid>,
    ) -> Result<String, AdminCategoryError> {
        if let Some(explicit) = trim_optional(explicit) {
            let slug = validate_slug(&explicit)
                .map_err(|err| AdminCategoryError::ConstraintViolation(slug_failure(&err, "slug")))?;
            return match self.repo.find_category_by_slug(page_id, &slug).await? {
                Some(other) if Some(other.id) != own => Err(AdminCategoryError::SlugTaken(slug)),
                _ => Ok(slug),
            };
        }

        let repo = self.repo.clone();
        unique_slug(name, move |candidate| {
            let repo = repo.clone();
            async move {
                repo.find_category_by_slug(page_id, &candidate)
                    .await
                    .map(|existing| existing.is_some())
            }
        })
        .await
        .map_err(|err| match err {
            SlugAsyncError::Slug(err) => {
                AdminCategoryError::ConstraintViolation(slug_failure(&err, "name"))
            }
            SlugAsyncError::Predicate(err) => AdminCategoryError::Repo(err),
        })
    }

    async fn record(
        &self,
        workspace_id: Uuid,
        actor: &str,
        action: &str,
        category: &CategoryRecord,
    ) -> Result<(), RepoError> {
        self.audit
            .record(
                workspace_id,
                actor,
                action,
                "category",
                Some(&category.id.to_string()),
                Some(&CategorySnapshot {
                    slug: &category.slug,
                    name: &category.name,
                }),
            )
            .await
    }
}

fn map_duplicate(err: RepoError) -> AdminCategoryError {
    match err {
        RepoError::Duplicate { .. } => AdminCategoryError::ConstraintViolation("slug"),
        other => AdminCategoryError::Repo(other),
    }
}
