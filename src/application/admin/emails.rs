use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::admin::audit::AdminAuditService;
use crate::application::admin::ensure_non_empty;
use crate::application::content::ContentSanitizer;
use crate::application::jobs::enqueue_send_newsletter_email_job;
use crate::application::pagination::{CursorPage, PageRequest, TimeCursor};
use crate::application::repos::{
    CreateEmailParams, EmailStatusChange, EmailsRepo, JobsRepo, NewslettersRepo, PagesRepo,
    PostsRepo, RepoError, RevisionsRepo, SubscribersRepo,
};
use crate::domain::entities::{EmailRecord, NewsletterRecord};
use crate::domain::types::{EmailStatus, PostStatus};

#[derive(Debug, Error)]
pub enum AdminEmailError {
    #[error("{0}")]
    ConstraintViolation(&'static str),
    #[error("newsletter not found")]
    NewsletterNotFound,
    #[error("email not found")]
    NotFound,
    #[error("post not found")]
    PostNotFound,
    #[error("post has no published revision")]
    PostNotPublished,
    #[error("email is {status} and can no longer be changed")]
    NotEditable { status: &'static str },
    #[error("newsletter has no confirmed subscribers")]
    NoRecipients,
    #[error("email is being sent")]
    Sending,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone)]
pub struct EmailCommand {
    pub subject: String,
    pub body_html: String,
}

#[derive(Debug, Serialize)]
struct EmailSnapshot<'a> {
    subject: &'a str,
    status: &'static str,
    post_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    scheduled_at: Option<OffsetDateTime>,
}

/// Repositories the email service coordinates.
pub struct EmailRepos {
    pub pages: Arc<dyn PagesRepo>,
    pub newsletters: Arc<dyn NewslettersRepo>,
    pub posts: Arc<dyn PostsRepo>,
    pub revisions: Arc<dyn RevisionsRepo>,
    pub subscribers: Arc<dyn SubscribersRepo>,
    pub emails: Arc<dyn EmailsRepo>,
    pub jobs: Arc<dyn JobsRepo>,
}

#[derive(Clone)]
pub struct AdminEmailService {
    pages: Arc<dyn PagesRepo>,
    newsletters: Arc<dyn NewslettersRepo>,
    posts: Arc<dyn PostsRepo>,
    revisions: Arc<dyn RevisionsRepo>,
    subscribers: Arc<dyn SubscribersRepo>,
    emails: Arc<dyn EmailsRepo>,
    jobs: Arc<dyn JobsRepo>,
    sanitizer: Arc<ContentSanitizer>,
    audit: AdminAuditService,
}

impl AdminEmailService {
    pub fn new(
        repos: EmailRepos,
        sanitizer: Arc<ContentSanitizer>,
        audit: AdminAuditService,
    ) -> Self {
        Self {
            pages: repos.pages,
            newsletters: repos.newsletters,
            posts: repos.posts,
            revisions: repos.revisions,
            subscribers: repos.subscribers,
            emails: repos.emails,
            jobs: repos.jobs,
            sanitizer,
            audit,
        }
    }

    pub async fn list(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
        newsletter_id: Uuid,
        page: PageRequest<TimeCursor>,
    ) -> Result<CursorPage<EmailRecord>, AdminEmailError> {
        let newsletter = self
            .require_newsletter(workspace_id, page_id, newsletter_id)
            .await?;
        self.emails
            .list_emails(newsletter.id, page)
            .await
            .map_err(AdminEmailError::from)
    }

    pub async fn get(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
        newsletter_id: Uuid,
        id: Uuid,
    ) -> Result<EmailRecord, AdminEmailError> {
        let newsletter = self
            .require_newsletter(workspace_id, page_id, newsletter_id)
            .await?;
        self.emails
            .find_email(newsletter.id, id)
            .await?
            .ok_or(AdminEmailError::NotFound)
    }

    pub async fn create(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        newsletter_id: Uuid,
        command: EmailCommand,
    ) -> Result<EmailRecord, AdminEmailError> {
        let newsletter = self
            .require_newsletter(workspace_id, page_id, newsletter_id)
            .await?;
        let (subject, body_html) = self.clean_content(command)?;

        let email = self
            .emails
            .create_email(CreateEmailParams {
                newsletter_id: newsletter.id,
                post_id: None,
                subject,
                body_html,
            })
            .await?;
        self.record(workspace_id, actor, "email.create", &email)
            .await?;
        Ok(email)
    }

    /// Drafts an issue from the published revision of a post on the same page.
    pub async fn create_from_post(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        newsletter_id: Uuid,
        post_id: Uuid,
    ) -> Result<EmailRecord, AdminEmailError> {
        let newsletter = self
            .require_newsletter(workspace_id, page_id, newsletter_id)
            .await?;
        let post = self
            .posts
            .find_post(page_id, post_id)
            .await?
            .ok_or(AdminEmailError::PostNotFound)?;
        let revision_id = match (post.status, post.published_revision_id) {
            (PostStatus::Published, Some(id)) => id,
            _ => return Err(AdminEmailError::PostNotPublished),
        };
        let revision = self
            .revisions
            .find_revision(post.id, revision_id)
            .await?
            .ok_or(AdminEmailError::PostNotPublished)?;

        let email = self
            .emails
            .create_email(CreateEmailParams {
                newsletter_id: newsletter.id,
                post_id: Some(post.id),
                subject: revision.title,
                body_html: self.sanitizer.email_body(&revision.body_html),
            })
            .await?;
        self.record(workspace_id, actor, "email.create", &email)
            .await?;
        Ok(email)
    }

    pub async fn update(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        newsletter_id: Uuid,
        id: Uuid,
        command: EmailCommand,
    ) -> Result<EmailRecord, AdminEmailError> {
        let existing = self.get(workspace_id, page_id, newsletter_id, id).await?;
        if !existing.status.is_editable() {
            return Err(AdminEmailError::NotEditable {
                status: existing.status.as_str(),
            });
        }
        let (subject, body_html) = self.clean_content(command)?;

        let email = self
            .emails
            .update_email_content(existing.id, &subject, &body_html)
            .await?;
        self.record(workspace_id, actor, "email.update", &email)
            .await?;
        Ok(email)
    }

    pub async fn delete(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        newsletter_id: Uuid,
        id: Uuid,
    ) -> Result<(), AdminEmailError> {
        let email = self.get(workspace_id, page_id, newsletter_id, id).await?;
        if email.status == EmailStatus::Sending {
            return Err(AdminEmailError::Sending);
        }
        self.emails.delete_email(email.newsletter_id, email.id).await?;
        self.record(workspace_id, actor, "email.delete", &email)
            .await?;
        Ok(())
    }

    /// Sends now, or schedules when `at` is given. A failed issue may be sent
    /// again; recipients that already received it are skipped.
    pub async fn send(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        newsletter_id: Uuid,
        id: Uuid,
        at: Option<OffsetDateTime>,
    ) -> Result<EmailRecord, AdminEmailError> {
        let existing = self.get(workspace_id, page_id, newsletter_id, id).await?;
        match existing.status {
            EmailStatus::Draft | EmailStatus::Scheduled | EmailStatus::Failed => {}
            other => {
                return Err(AdminEmailError::NotEditable {
                    status: other.as_str(),
                });
            }
        }

        let now = OffsetDateTime::now_utc();
        if at.is_some_and(|at| at <= now) {
            return Err(AdminEmailError::ConstraintViolation("scheduled_at"));
        }

        let counts = self.subscribers.count_by_status(existing.newsletter_id).await?;
        if counts.confirmed == 0 {
            return Err(AdminEmailError::NoRecipients);
        }

        let (status, action) = match at {
            Some(_) => (EmailStatus::Scheduled, "email.schedule"),
            None => (EmailStatus::Sending, "email.send"),
        };

        let Some(email) = self
            .emails
            .begin_send(
                existing.id,
                &[EmailStatus::Draft, EmailStatus::Scheduled, EmailStatus::Failed],
                status,
                at,
            )
            .await?
        else {
            let current = self
                .emails
                .find_email_by_id(existing.id)
                .await?
                .ok_or(AdminEmailError::NotFound)?;
            return Err(AdminEmailError::NotEditable {
                status: current.status.as_str(),
            });
        };

        let job_id = match enqueue_send_newsletter_email_job(
            self.jobs.as_ref(),
            email.id,
            email.send_generation,
            at,
        )
        .await
        {
            Ok(job_id) => job_id,
            Err(err) => {
                let reverted = self
                    .emails
                    .revert_send(
                        email.send_generation,
                        EmailStatusChange {
                            id: existing.id,
                            status: existing.status,
                            scheduled_at: existing.scheduled_at,
                            sent_at: existing.sent_at,
                            last_error: existing.last_error.clone(),
                        },
                    )
                    .await?;
                warn!(
                    target = "application::admin::emails",
                    email_id = %email.id,
                    reverted,
                    error = %err,
                    "newsletter email could not be queued"
                );
                return Err(err.into());
            }
        };
        info!(
            target = "application::admin::emails",
            email_id = %email.id,
            job_id = %job_id,
            generation = email.send_generation,
            status = email.status.as_str(),
            "newsletter email queued"
        );

        self.record(workspace_id, actor, action, &email).await?;
        Ok(email)
    }

    /// Returns a scheduled issue to draft; its pending job becomes a no-op.
    pub async fn unschedule(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        newsletter_id: Uuid,
        id: Uuid,
    ) -> Result<EmailRecord, AdminEmailError> {
        let existing = self.get(workspace_id, page_id, newsletter_id, id).await?;
        if existing.status != EmailStatus::Scheduled {
            return Err(AdminEmailError::NotEditable {
                status: existing.status.as_str(),
            });
        }

        let email = self
            .emails
            .update_email_status(EmailStatusChange {
                id: existing.id,
                status: EmailStatus::Draft,
                scheduled_at: None,
                sent_at: None,
                last_error: None,
            })
            .await?;
        self.record(workspace_id, actor, "email.unschedule", &email)
            .await?;
        Ok(email)
    }

    fn clean_content(&self, command: EmailCommand) -> Result<(String, String), AdminEmailError> {
        let subject = command.subject.trim().to_string();
        ensure_non_empty(&subject, "subject").map_err(AdminEmailError::ConstraintViolation)?;
        let body_html = self.sanitizer.email_body(&command.body_html);
        ensure_non_empty(&body_html, "body_html").map_err(AdminEmailError::ConstraintViolation)?;
        Ok((subject, body_html))
    }

    async fn require_newsletter(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
        newsletter_id: Uuid,
    ) -> Result<NewsletterRecord, AdminEmailError> {
        self.pages
            .find_page(workspace_id, page_id)
            .await?
            .ok_or(AdminEmailError::NewsletterNotFound)?;
        self.newsletters
            .find_newsletter(page_id, newsletter_id)
            .await?
            .ok_or(AdminEmailError::NewsletterNotFound)
    }

    async fn record(
        &self,
        workspace_id: Uuid,
        actor: &str,
        action: &str,
        email: &EmailRecord,
    ) -> Result<(), RepoError> {
        self.audit
            .record(
                workspace_id,
                actor,
                action,
                "email",
                Some(&email.id.to_string()),
                Some(&EmailSnapshot {
                    subject: &email.subject,
                    status: email.status.as_str(),
                    post_id: email.post_id,
                    scheduled_at: email.scheduled_at,
                }),
            )
            .await
    }
}
