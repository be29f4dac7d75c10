use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::admin::audit::AdminAuditService;
use crate::application::pagination::{CursorPage, PageRequest, TimeCursor};
use crate::application::repos::{
    CreateSubscriberParams, NewslettersRepo, PagesRepo, RepoError, SubscriberCounts,
    SubscriberQueryFilter, SubscribersRepo,
};
use crate::application::subscriptions::new_subscription_token;
use crate::domain::email::normalize_email;
use crate::domain::entities::{NewsletterRecord, SubscriberRecord};
use crate::domain::types::SubscriberStatus;

const ADMIN_SOURCE: &str = "admin";
const IMPORT_SOURCE: &str = "import";

/// Upper bound on addresses accepted by one import call.
pub const MAX_IMPORT_BATCH: usize = 5_000;

#[derive(Debug, Error)]
pub enum AdminSubscriberError {
    #[error("{0}")]
    ConstraintViolation(&'static str),
    #[error("newsletter not found")]
    NewsletterNotFound,
    #[error("subscriber not found")]
    NotFound,
    #[error("`{0}` is already subscribed")]
    AlreadySubscribed(String),
    #[error("import accepts at most {max} addresses")]
    ImportTooLarge { max: usize },
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub imported: u64,
    pub skipped: u64,
    pub invalid: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ImportSummary<'a> {
    imported: u64,
    skipped: u64,
    invalid: usize,
    newsletter: &'a str,
}

#[derive(Clone)]
pub struct AdminSubscriberService {
    pages: Arc<dyn PagesRepo>,
    newsletters: Arc<dyn NewslettersRepo>,
    repo: Arc<dyn SubscribersRepo>,
    audit: AdminAuditService,
}

impl AdminSubscriberService {
    pub fn new(
        pages: Arc<dyn PagesRepo>,
        newsletters: Arc<dyn NewslettersRepo>,
        repo: Arc<dyn SubscribersRepo>,
        audit: AdminAuditService,
    ) -> Self {
        Self {
            pages,
            newsletters,
            repo,
            audit,
        }
    }

    pub async fn list(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
        newsletter_id: Uuid,
        filter: &SubscriberQueryFilter,
        page: PageRequest<TimeCursor>,
    ) -> Result<CursorPage<SubscriberRecord>, AdminSubscriberError> {
        let newsletter = self
            .require_newsletter(workspace_id, page_id, newsletter_id)
            .await?;
        self.repo
            .list_subscribers(newsletter.id, filter, page)
            .await
            .map_err(AdminSubscriberError::from)
    }

    pub async fn counts(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
        newsletter_id: Uuid,
    ) -> Result<SubscriberCounts, AdminSubscriberError> {
        let newsletter = self
            .require_newsletter(workspace_id, page_id, newsletter_id)
            .await?;
        self.repo
            .count_by_status(newsletter.id)
            .await
            .map_err(AdminSubscriberError::from)
    }

    /// Adds an address as confirmed; no confirmation mail is sent.
    pub async fn add(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        newsletter_id: Uuid,
        email: &str,
    ) -> Result<SubscriberRecord, AdminSubscriberError> {
        let newsletter = self
            .require_newsletter(workspace_id, page_id, newsletter_id)
            .await?;
        let email =
            normalize_email(email).map_err(|_| AdminSubscriberError::ConstraintViolation("email"))?;

        if self
            .repo
            .find_subscriber_by_email(newsletter.id, &email)
            .await?
            .is_some()
        {
            return Err(AdminSubscriberError::AlreadySubscribed(email));
        }

        let subscriber = self
            .repo
            .create_subscriber(confirmed_params(newsletter.id, email, ADMIN_SOURCE))
            .await
            .map_err(|err| match err {
                RepoError::Duplicate { .. } => {
                    AdminSubscriberError::ConstraintViolation("email")
                }
                other => AdminSubscriberError::Repo(other),
            })?;

        self.audit
            .record(
                workspace_id,
                actor,
                "subscriber.create",
                "subscriber",
                Some(&subscriber.id.to_string()),
                Some(&subscriber.email),
            )
            .await?;
        Ok(subscriber)
    }

    pub async fn remove(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        newsletter_id: Uuid,
        id: Uuid,
    ) -> Result<(), AdminSubscriberError> {
        let newsletter = self
            .require_newsletter(workspace_id, page_id, newsletter_id)
            .await?;
        let subscriber = self
            .repo
            .find_subscriber(newsletter.id, id)
            .await?
            .ok_or(AdminSubscriberError::NotFound)?;
        self.repo
            .delete_subscriber(newsletter.id, subscriber.id)
            .await?;
        self.audit
            .record(
                workspace_id,
                actor,
                "subscriber.delete",
                "subscriber",
                Some(&subscriber.id.to_string()),
                Some(&subscriber.email),
            )
            .await?;
        Ok(())
    }

    /// Imports addresses as confirmed subscribers. Addresses already on the
    /// list, in any status, are skipped; malformed ones are reported back.
    pub async fn import(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        newsletter_id: Uuid,
        emails: Vec<String>,
    ) -> Result<ImportReport, AdminSubscriberError> {
        if emails.len() > MAX_IMPORT_BATCH {
            return Err(AdminSubscriberError::ImportTooLarge {
                max: MAX_IMPORT_BATCH,
            });
        }
        let newsletter = self
            .require_newsletter(workspace_id, page_id, newsletter_id)
            .await?;

        let mut report = ImportReport::default();
        let mut seen = HashSet::new();

        for raw in emails {
            let Ok(email) = normalize_email(&raw) else {
                report.invalid.push(raw);
                continue;
            };
            if !seen.insert(email.clone()) {
                report.skipped += 1;
                continue;
            }
            if self
                .repo
                .find_subscriber_by_email(newsletter.id, &email)
                .await?
                .is_some()
            {
                report.skipped += 1;
                continue;
            }

            match self
                .repo
                .create_subscriber(confirmed_params(newsletter.id, email, IMPORT_SOURCE))
                .await
            {
                Ok(_) => report.imported += 1,
                Err(RepoError::Duplicate { .. }) => report.skipped += 1,
                Err(err) => return Err(err.into()),
            }
        }

        self.audit
            .record(
                workspace_id,
                actor,
                "subscriber.import",
                "newsletter",
                Some(&newsletter.id.to_string()),
                Some(&ImportSummary {
                    imported: report.imported,
                    skipped: report.skipped,
                    invalid: report.invalid.len(),
                    newsletter: &newsletter.slug,
                }),
            )
            .await?;

        Ok(report)
    }

    async fn require_newsletter(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
        newsletter_id: Uuid,
    ) -> Result<NewsletterRecord, AdminSubscriberError> {
        self.pages
            .find_page(workspace_id, page_id)
            .await?
            .ok_or(AdminSubscriberError::NewsletterNotFound)?;
        self.newsletters
            .find_newsletter(page_id, newsletter_id)
            .await?
            .ok_or(AdminSubscriberError::NewsletterNotFound)
    }
}

fn confirmed_params(newsletter_id: Uuid, email: String, source: &str) -> CreateSubscriberParams {
    CreateSubscriberParams {
        newsletter_id,
        email,
        status: SubscriberStatus::Confirmed,
        confirmation_token: new_subscription_token(),
        unsubscribe_token: new_subscription_token(),
        source: source.to_string(),
        confirmed_at: Some(OffsetDateTime::now_utc()),
    }
}
