use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::application::admin::audit::AdminAuditService;
use crate::application::admin::{ensure_non_empty, slug_failure, trim_optional};
use crate::application::repos::{
    NewsletterParams, NewslettersRepo, PagesRepo, RepoError, SubscriberCounts, SubscribersRepo,
};
use crate::domain::email::normalize_email;
use crate::domain::entities::NewsletterRecord;
use crate::domain::slug::{SlugAsyncError, unique_slug, validate_slug};

#[derive(Debug, Error)]
pub enum AdminNewsletterError {
    #[error("{0}")]
    ConstraintViolation(&'static str),
    #[error("page not found")]
    PageNotFound,
    #[error("newsletter not found")]
    NotFound,
    #[error("slug `{0}` is already used on this page")]
    SlugTaken(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone)]
pub struct NewsletterCommand {
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub sender_name: String,
    pub sender_email: String,
    pub reply_to: Option<String>,
    pub double_opt_in: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewsletterStats {
    pub newsletter: NewsletterRecord,
    pub subscribers: SubscriberCounts,
    pub total: u64,
}

#[derive(Debug, Serialize)]
struct NewsletterSnapshot<'a> {
    slug: &'a str,
    name: &'a str,
    sender_email: &'a str,
    double_opt_in: bool,
}

#[derive(Clone)]
pub struct AdminNewsletterService {
    pages: Arc<dyn PagesRepo>,
    repo: Arc<dyn NewslettersRepo>,
    subscribers: Arc<dyn SubscribersRepo>,
    audit: AdminAuditService,
}

impl AdminNewsletterService {
    pub fn new(
        pages: Arc<dyn PagesRepo>,
        repo: Arc<dyn NewslettersRepo>,
        subscribers: Arc<dyn SubscribersRepo>,
        audit: AdminAuditService,
    ) -> Self {
        Self {
            pages,
            repo,
            subscribers,
            audit,
        }
    }

    pub async fn list(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
    ) -> Result<Vec<NewsletterRecord>, AdminNewsletterError> {
        self.require_page(workspace_id, page_id).await?;
        self.repo
            .list_newsletters(page_id)
            .await
            .map_err(AdminNewsletterError::from)
    }

    pub async fn get(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
        id: Uuid,
    ) -> Result<NewsletterRecord, AdminNewsletterError> {
        self.require_page(workspace_id, page_id).await?;
        self.repo
            .find_newsletter(page_id, id)
            .await?
            .ok_or(AdminNewsletterError::NotFound)
    }

    pub async fn stats(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
        id: Uuid,
    ) -> Result<NewsletterStats, AdminNewsletterError> {
        let newsletter = self.get(workspace_id, page_id, id).await?;
        let subscribers = self.subscribers.count_by_status(newsletter.id).await?;
        Ok(NewsletterStats {
            newsletter,
            total: subscribers.total(),
            subscribers,
        })
    }

    pub async fn create(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        command: NewsletterCommand,
    ) -> Result<NewsletterRecord, AdminNewsletterError> {
        self.require_page(workspace_id, page_id).await?;
        let params = self.build_params(page_id, command, None).await?;
        let newsletter = self
            .repo
            .create_newsletter(params)
            .await
            .map_err(map_duplicate)?;
        self.record(workspace_id, actor, "newsletter.create", &newsletter)
            .await?;
        Ok(newsletter)
    }

    pub async fn update(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        id: Uuid,
        mut command: NewsletterCommand,
    ) -> Result<NewsletterRecord, AdminNewsletterError> {
        let existing = self.get(workspace_id, page_id, id).await?;
        if command.slug.is_none() {
            command.slug = Some(existing.slug.clone());
        }
        let params = self.build_params(page_id, command, Some(existing.id)).await?;
        let newsletter = self
            .repo
            .update_newsletter(existing.id, params)
            .await
            .map_err(map_duplicate)?;
        self.record(workspace_id, actor, "newsletter.update", &newsletter)
            .await?;
        Ok(newsletter)
    }

    /// Removes the newsletter with its subscribers, issues and deliveries.
    pub async fn delete(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        id: Uuid,
    ) -> Result<(), AdminNewsletterError> {
        let newsletter = self.get(workspace_id, page_id, id).await?;
        self.repo.delete_newsletter(page_id, newsletter.id).await?;
        self.record(workspace_id, actor, "newsletter.delete", &newsletter)
            .await?;
        Ok(())
    }

    async fn build_params(
        &self,
        page_id: Uuid,
        command: NewsletterCommand,
        own: Option<Uuid>,
    ) -> Result<NewsletterParams, AdminNewsletterError> {
        let name = command.name.trim().to_string();
        ensure_non_empty(&name, "name").map_err(AdminNewsletterError::ConstraintViolation)?;
        let sender_name = command.sender_name.trim().to_string();
        ensure_non_empty(&sender_name, "sender_name")
            .map_err(AdminNewsletterError::ConstraintViolation)?;
        let sender_email = normalize_email(&command.sender_email)
            .map_err(|_| AdminNewsletterError::ConstraintViolation("sender_email"))?;
        let reply_to = match trim_optional(command.reply_to) {
            Some(raw) => Some(
                normalize_email(&raw)
                    .map_err(|_| AdminNewsletterError::ConstraintViolation("reply_to"))?,
            ),
            None => None,
        };

        let slug = self.resolve_slug(page_id, &name, command.slug, own).await?;

        Ok(NewsletterParams {
            page_id,
            slug,
            name,
            description: trim_optional(command.description),
            sender_name,
            sender_email,
            reply_to,
            double_opt_in: command.double_opt_in,
        })
    }

    async fn require_page(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
    ) -> Result<(), AdminNewsletterError> {
        self.pages
            .find_page(workspace_id, page_id)
            .await?
            .map(|_| ())
            .ok_or(AdminNewsletterError::PageNotFound)
    }

    async fn resolve_slug(
        &self,
        page_id: Uuid,
        name: &str,
        explicit: Option<String>,
        own: Option<Uuid>,
    ) -> Result<String, AdminNewsletterError> {
        if let Some(explicit) = trim_optional(explicit) {
            let slug = validate_slug(&explicit).map_err(|err| {
                AdminNewsletterError::ConstraintViolation(slug_failure(&err, "slug"))
            })?;
            return match self.repo.find_newsletter_by_slug(page_id, &slug).await? {
                Some(other) if Some(other.id) != own => Err(AdminNewsletterError::SlugTaken(slug)),
                _ => Ok(slug),
            };
        }

        let repo = self.repo.clone();
        unique_slug(name, move |candidate| {
            let repo = repo.clone();
            async move {
                repo.find_newsletter_by_slug(page_id, &candidate)
                    .await
                    .map(|existing| existing.is_some())
            }
        })
        .await
        .map_err(|err| match err {
            SlugAsyncError::Slug(err) => {
                AdminNewsletterError::ConstraintViolation(slug_failure(&err, "name"))
            }
            SlugAsyncError::Predicate(err) => AdminNewsletterError::Repo(err),
        })
    }

    async fn record(
        &self,
        workspace_id: Uuid,
        actor: &str,
        action: &str,
        newsletter: &NewsletterRecord,
    ) -> Result<(), RepoError> {
        self.audit
            .record(
                workspace_id,
                actor,
                action,
                "newsletter",
                Some(&newsletter.id.to_string()),
                Some(&NewsletterSnapshot {
                    slug: &newsletter.slug,
                    name: &newsletter.name,
                    sender_email: &newsletter.sender_email,
                    double_opt_in: newsletter.double_opt_in,
                }),
            )
            .await
    }
}

fn map_duplicate(err: RepoError) -> AdminNewsletterError {
    match err {
        RepoError::Duplicate { .. } => AdminNewsletterError::ConstraintViolation("slug"),
        other => AdminNewsletterError::Repo(other),
    }
}
