//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::pagination::{CursorPage, PageRequest, PaginationError, TimeCursor};
use crate::domain::api_keys::{ApiKeyRecord, ApiScope};
use crate::domain::entities::{
    AuditLogRecord, AuthorRecord, CategoryRecord, DeliveryRecord, EmailRecord, LinkRecord,
    MemberRecord, NewsletterRecord, PageRecord, PostRecord, RevisionRecord, SubscriberRecord,
    WorkspaceRecord,
};
use crate::domain::types::{
    DeliveryStatus, EmailStatus, JobType, MemberRole, PostStatus, SubscriberStatus,
};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error(transparent)]
    Pagination(#[from] PaginationError),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CreateWorkspaceParams {
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct CreateMemberParams {
    pub workspace_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: MemberRole,
}

#[async_trait]
pub trait WorkspacesRepo: Send + Sync {
    async fn create_workspace(
        &self,
        params: CreateWorkspaceParams,
    ) -> Result<WorkspaceRecord, RepoError>;

    async fn rename_workspace(&self, id: Uuid, name: &str) -> Result<WorkspaceRecord, RepoError>;

    async fn find_workspace(&self, id: Uuid) -> Result<Option<WorkspaceRecord>, RepoError>;

    async fn find_workspace_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<WorkspaceRecord>, RepoError>;

    async fn list_members(&self, workspace_id: Uuid) -> Result<Vec<MemberRecord>, RepoError>;

    async fn find_member(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Option<MemberRecord>, RepoError>;

    async fn find_member_by_email(
        &self,
        workspace_id: Uuid,
        email: &str,
    ) -> Result<Option<MemberRecord>, RepoError>;

    async fn create_member(&self, params: CreateMemberParams) -> Result<MemberRecord, RepoError>;

    /// Refuses to demote the workspace's only owner.
    async fn update_member_role(
        &self,
        workspace_id: Uuid,
        id: Uuid,
        role: MemberRole,
    ) -> Result<MemberChange<MemberRecord>, RepoError>;

    /// Refuses to remove the workspace's only owner.
    async fn delete_member(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<MemberChange<()>, RepoError>;
}

/// Outcome of a membership change that must leave an owner behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberChange<T> {
    Applied(T),
    LastOwner,
}

#[derive(Debug, Clone)]
pub struct CreateApiKeyParams {
    pub workspace_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub prefix: String,
    pub hashed_secret: Vec<u8>,
    pub scopes: Vec<ApiScope>,
    pub expires_at: Option<OffsetDateTime>,
    pub created_by: String,
}

#[async_trait]
pub trait ApiKeysRepo: Send + Sync {
    async fn create_key(&self, params: CreateApiKeyParams) -> Result<ApiKeyRecord, RepoError>;

    async fn list_keys(&self, workspace_id: Uuid) -> Result<Vec<ApiKeyRecord>, RepoError>;

    async fn find_key(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Option<ApiKeyRecord>, RepoError>;

    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKeyRecord>, RepoError>;

    async fn revoke_key(
        &self,
        workspace_id: Uuid,
        id: Uuid,
        revoked_at: OffsetDateTime,
    ) -> Result<bool, RepoError>;

    async fn update_secret(
        &self,
        workspace_id: Uuid,
        id: Uuid,
        prefix: &str,
        hashed_secret: &[u8],
    ) -> Result<ApiKeyRecord, RepoError>;

    async fn touch_last_used(&self, id: Uuid, at: OffsetDateTime) -> Result<(), RepoError>;

    /// Flip active keys whose `expires_at` passed to `expired`.
    async fn expire_keys(&self, now: OffsetDateTime) -> Result<u64, RepoError>;
}

#[derive(Debug, Clone, Default)]
pub struct PageQueryFilter {
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatePageParams {
    pub workspace_id: Uuid,
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub custom_domain: Option<String>,
    pub language: String,
}

#[derive(Debug, Clone)]
pub struct UpdatePageParams {
    pub workspace_id: Uuid,
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub custom_domain: Option<String>,
    pub language: String,
}

#[async_trait]
pub trait PagesRepo: Send + Sync {
    async fn list_pages(
        &self,
        workspace_id: Uuid,
        filter: &PageQueryFilter,
        page: PageRequest<TimeCursor>,
    ) -> Result<CursorPage<PageRecord>, RepoError>;

    async fn list_all_pages(&self, workspace_id: Uuid) -> Result<Vec<PageRecord>, RepoError>;

    async fn find_page(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Option<PageRecord>, RepoError>;

    async fn find_page_by_slug(&self, slug: &str) -> Result<Option<PageRecord>, RepoError>;

    async fn find_page_by_domain(&self, domain: &str) -> Result<Option<PageRecord>, RepoError>;

    async fn create_page(&self, params: CreatePageParams) -> Result<PageRecord, RepoError>;

    async fn update_page(&self, params: UpdatePageParams) -> Result<PageRecord, RepoError>;

    /// Removes the page and, through cascading keys, everything it owns.
    async fn delete_page(&self, workspace_id: Uuid, id: Uuid) -> Result<(), RepoError>;
}

#[derive(Debug, Clone, Copy)]
pub enum PostListScope {
    Public,
    Admin { status: Option<PostStatus> },
}

#[derive(Debug, Clone, Default)]
pub struct PostQueryFilter {
    pub category: Option<String>,
    pub author: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatePostParams {
    pub workspace_id: Uuid,
    pub page_id: Uuid,
    pub slug: String,
    pub title: String,
    pub excerpt: String,
    pub body_html: String,
}

#[derive(Debug, Clone)]
pub struct UpdatePostContentParams {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub excerpt: String,
    pub body_html: String,
}

#[derive(Debug, Clone)]
pub struct UpdatePostStatusParams {
    pub id: Uuid,
    pub status: PostStatus,
    pub published_revision_id: Option<Uuid>,
    pub scheduled_at: Option<OffsetDateTime>,
    pub published_at: Option<OffsetDateTime>,
    pub archived_at: Option<OffsetDateTime>,
}

/// Timestamp a post sorts by: publish time once published, otherwise last edit.
pub fn post_primary_time(post: &PostRecord) -> OffsetDateTime {
    match (post.status, post.published_at) {
        (PostStatus::Published, Some(at)) => at,
        _ => post.updated_at,
    }
}

#[async_trait]
pub trait PostsRepo: Send + Sync {
    async fn list_posts(
        &self,
        page_id: Uuid,
        scope: PostListScope,
        filter: &PostQueryFilter,
        page: PageRequest<TimeCursor>,
    ) -> Result<CursorPage<PostRecord>, RepoError>;

    async fn list_all_posts(&self, page_id: Uuid) -> Result<Vec<PostRecord>, RepoError>;

    async fn find_post(&self, page_id: Uuid, id: Uuid) -> Result<Option<PostRecord>, RepoError>;

    async fn find_post_by_id(&self, id: Uuid) -> Result<Option<PostRecord>, RepoError>;

    async fn find_post_by_slug(
        &self,
        page_id: Uuid,
        slug: &str,
    ) -> Result<Option<PostRecord>, RepoError>;

    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError>;

    async fn update_post_content(
        &self,
        params: UpdatePostContentParams,
    ) -> Result<PostRecord, RepoError>;

    async fn update_post_status(
        &self,
        params: UpdatePostStatusParams,
    ) -> Result<PostRecord, RepoError>;

    async fn delete_post(&self, page_id: Uuid, id: Uuid) -> Result<(), RepoError>;

    async fn list_due_scheduled(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<PostRecord>, RepoError>;

    async fn replace_post_categories(
        &self,
        post_id: Uuid,
        category_ids: &[Uuid],
    ) -> Result<(), RepoError>;

    async fn replace_post_authors(
        &self,
        post_id: Uuid,
        author_ids: &[Uuid],
    ) -> Result<(), RepoError>;

    async fn list_post_categories(&self, post_id: Uuid)
    -> Result<Vec<CategoryRecord>, RepoError>;

    async fn list_post_authors(&self, post_id: Uuid) -> Result<Vec<AuthorRecord>, RepoError>;
}

#[derive(Debug, Clone)]
pub struct CreateRevisionParams {
    pub post_id: Uuid,
    pub title: String,
    pub excerpt: String,
    pub body_html: String,
    pub digest: String,
    pub created_by: String,
}

#[async_trait]
pub trait RevisionsRepo: Send + Sync {
    async fn latest_revision(&self, post_id: Uuid) -> Result<Option<RevisionRecord>, RepoError>;

    async fn find_revision(
        &self,
        post_id: Uuid,
        id: Uuid,
    ) -> Result<Option<RevisionRecord>, RepoError>;

    /// Newest first.
    async fn list_revisions(&self, post_id: Uuid) -> Result<Vec<RevisionRecord>, RepoError>;

    /// Stores the revision with the next version number for the post.
    async fn create_revision(
        &self,
        params: CreateRevisionParams,
    ) -> Result<RevisionRecord, RepoError>;

    /// Delete the oldest revisions beyond `keep`, never touching `protect`.
    async fn prune_revisions(
        &self,
        post_id: Uuid,
        keep: usize,
        protect: Option<Uuid>,
    ) -> Result<u64, RepoError>;
}

#[derive(Debug, Clone)]
pub struct CreateCategoryParams {
    pub page_id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub position: i32,
}

#[derive(Debug, Clone)]
pub struct UpdateCategoryParams {
    pub page_id: Uuid,
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryWithCount {
    #[serde(flatten)]
    pub category: CategoryRecord,
    pub published_posts: u64,
}

#[async_trait]
pub trait CategoriesRepo: Send + Sync {
    async fn list_categories(&self, page_id: Uuid) -> Result<Vec<CategoryWithCount>, RepoError>;

    async fn find_category(
        &self,
        page_id: Uuid,
        id: Uuid,
    ) -> Result<Option<CategoryRecord>, RepoError>;

    async fn find_category_by_slug(
        &self,
        page_id: Uuid,
        slug: &str,
    ) -> Result<Option<CategoryRecord>, RepoError>;

    async fn create_category(
        &self,
        params: CreateCategoryParams,
    ) -> Result<CategoryRecord, RepoError>;

    async fn update_category(
        &self,
        params: UpdateCategoryParams,
    ) -> Result<CategoryRecord, RepoError>;

    async fn delete_category(&self, page_id: Uuid, id: Uuid) -> Result<(), RepoError>;

    async fn count_categories_in_page(&self, page_id: Uuid, ids: &[Uuid])
    -> Result<u64, RepoError>;
}

#[derive(Debug, Clone)]
pub struct AuthorParams {
    pub page_id: Uuid,
    pub member_id: Option<Uuid>,
    pub slug: String,
    pub name: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub website_url: Option<String>,
}

#[async_trait]
pub trait AuthorsRepo: Send + Sync {
    async fn list_authors(&self, page_id: Uuid) -> Result<Vec<AuthorRecord>, RepoError>;

    async fn find_author(&self, page_id: Uuid, id: Uuid)
    -> Result<Option<AuthorRecord>, RepoError>;

    async fn find_author_by_slug(
        &self,
        page_id: Uuid,
        slug: &str,
    ) -> Result<Option<AuthorRecord>, RepoError>;

    async fn create_author(&self, params: AuthorParams) -> Result<AuthorRecord, RepoError>;

    async fn update_author(&self, id: Uuid, params: AuthorParams)
    -> Result<AuthorRecord, RepoError>;

    async fn delete_author(&self, page_id: Uuid, id: Uuid) -> Result<(), RepoError>;

    async fn count_author_posts(&self, id: Uuid) -> Result<u64, RepoError>;

    async fn count_authors_in_page(&self, page_id: Uuid, ids: &[Uuid]) -> Result<u64, RepoError>;
}

#[derive(Debug, Clone)]
pub struct LinkParams {
    pub page_id: Uuid,
    pub label: String,
    pub url: String,
    pub visible: bool,
}

#[async_trait]
pub trait LinksRepo: Send + Sync {
    /// Ordered by position.
    async fn list_links(&self, page_id: Uuid, visible_only: bool)
    -> Result<Vec<LinkRecord>, RepoError>;

    async fn find_link(&self, page_id: Uuid, id: Uuid) -> Result<Option<LinkRecord>, RepoError>;

    /// Appends the link after the current last position.
    async fn create_link(&self, params: LinkParams) -> Result<LinkRecord, RepoError>;

    async fn update_link(&self, id: Uuid, params: LinkParams) -> Result<LinkRecord, RepoError>;

    async fn delete_link(&self, page_id: Uuid, id: Uuid) -> Result<(), RepoError>;

    /// Rewrites positions `0..n` following `ordered_ids`.
    async fn reorder_links(&self, page_id: Uuid, ordered_ids: &[Uuid]) -> Result<(), RepoError>;
}

#[derive(Debug, Clone)]
pub struct NewsletterParams {
    pub page_id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub sender_name: String,
    pub sender_email: String,
    pub reply_to: Option<String>,
    pub double_opt_in: bool,
}

#[async_trait]
pub trait NewslettersRepo: Send + Sync {
    async fn list_newsletters(&self, page_id: Uuid) -> Result<Vec<NewsletterRecord>, RepoError>;

    async fn find_newsletter(
        &self,
        page_id: Uuid,
        id: Uuid,
    ) -> Result<Option<NewsletterRecord>, RepoError>;

    async fn find_newsletter_by_id(&self, id: Uuid)
    -> Result<Option<NewsletterRecord>, RepoError>;

    async fn find_newsletter_by_slug(
        &self,
        page_id: Uuid,
        slug: &str,
    ) -> Result<Option<NewsletterRecord>, RepoError>;

    async fn create_newsletter(
        &self,
        params: NewsletterParams,
    ) -> Result<NewsletterRecord, RepoError>;

    async fn update_newsletter(
        &self,
        id: Uuid,
        params: NewsletterParams,
    ) -> Result<NewsletterRecord, RepoError>;

    async fn delete_newsletter(&self, page_id: Uuid, id: Uuid) -> Result<(), RepoError>;
}

#[derive(Debug, Clone, Default)]
pub struct SubscriberQueryFilter {
    pub status: Option<SubscriberStatus>,
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateSubscriberParams {
    pub newsletter_id: Uuid,
    pub email: String,
    pub status: SubscriberStatus,
    pub confirmation_token: String,
    pub unsubscribe_token: String,
    pub source: String,
    pub confirmed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct SubscriberStatusChange {
    pub id: Uuid,
    pub status: SubscriberStatus,
    pub confirmed_at: Option<OffsetDateTime>,
    pub unsubscribed_at: Option<OffsetDateTime>,
}

/// Fresh state for a returning subscriber.
#[derive(Debug, Clone)]
pub struct ResubscribeParams {
    pub id: Uuid,
    pub status: SubscriberStatus,
    pub confirmation_token: String,
    pub unsubscribe_token: String,
    pub confirmed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriberCounts {
    pub pending: u64,
    pub confirmed: u64,
    pub unsubscribed: u64,
    pub bounced: u64,
    pub complained: u64,
}

impl SubscriberCounts {
    pub fn add(&mut self, status: SubscriberStatus, count: u64) {
        match status {
            SubscriberStatus::Pending => self.pending += count,
            SubscriberStatus::Confirmed => self.confirmed += count,
            SubscriberStatus::Unsubscribed => self.unsubscribed += count,
            SubscriberStatus::Bounced => self.bounced += count,
            SubscriberStatus::Complained => self.complained += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.confirmed + self.unsubscribed + self.bounced + self.complained
    }
}

#[async_trait]
pub trait SubscribersRepo: Send + Sync {
    async fn list_subscribers(
        &self,
        newsletter_id: Uuid,
        filter: &SubscriberQueryFilter,
        page: PageRequest<TimeCursor>,
    ) -> Result<CursorPage<SubscriberRecord>, RepoError>;

    async fn count_by_status(&self, newsletter_id: Uuid) -> Result<SubscriberCounts, RepoError>;

    async fn find_subscriber(
        &self,
        newsletter_id: Uuid,
        id: Uuid,
    ) -> Result<Option<SubscriberRecord>, RepoError>;

    async fn find_subscriber_by_id(&self, id: Uuid)
    -> Result<Option<SubscriberRecord>, RepoError>;

    async fn find_subscriber_by_email(
        &self,
        newsletter_id: Uuid,
        email: &str,
    ) -> Result<Option<SubscriberRecord>, RepoError>;

    async fn find_by_confirmation_token(
        &self,
        token: &str,
    ) -> Result<Option<SubscriberRecord>, RepoError>;

    async fn find_by_unsubscribe_token(
        &self,
        token: &str,
    ) -> Result<Option<SubscriberRecord>, RepoError>;

    async fn create_subscriber(
        &self,
        params: CreateSubscriberParams,
    ) -> Result<SubscriberRecord, RepoError>;

    async fn update_subscriber_status(
        &self,
        change: SubscriberStatusChange,
    ) -> Result<SubscriberRecord, RepoError>;

    async fn resubscribe(&self, params: ResubscribeParams) -> Result<SubscriberRecord, RepoError>;

    async fn delete_subscriber(&self, newsletter_id: Uuid, id: Uuid) -> Result<(), RepoError>;

    /// Confirmed subscribers ordered by id, strictly after `after`.
    async fn list_confirmed_after(
        &self,
        newsletter_id: Uuid,
        after: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<SubscriberRecord>, RepoError>;
}

#[derive(Debug, Clone)]
pub struct CreateEmailParams {
    pub newsletter_id: Uuid,
    pub post_id: Option<Uuid>,
    pub subject: String,
    pub body_html: String,
}

#[derive(Debug, Clone)]
pub struct EmailStatusChange {
    pub id: Uuid,
    pub status: EmailStatus,
    pub scheduled_at: Option<OffsetDateTime>,
    pub sent_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailCounter {
    Recipients,
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Complained,
}

impl EmailCounter {
    pub fn column(self) -> &'static str {
        match self {
            EmailCounter::Recipients => "recipient_count",
            EmailCounter::Delivered => "delivered_count",
            EmailCounter::Opened => "opened_count",
            EmailCounter::Clicked => "clicked_count",
            EmailCounter::Bounced => "bounced_count",
            EmailCounter::Complained => "complained_count",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub subscriber_id: Uuid,
    pub provider_message_id: Option<String>,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

#[async_trait]
pub trait EmailsRepo: Send + Sync {
    async fn list_emails(
        &self,
        newsletter_id: Uuid,
        page: PageRequest<TimeCursor>,
    ) -> Result<CursorPage<EmailRecord>, RepoError>;

    async fn find_email(
        &self,
        newsletter_id: Uuid,
        id: Uuid,
    ) -> Result<Option<EmailRecord>, RepoError>;

    async fn find_email_by_id(&self, id: Uuid) -> Result<Option<EmailRecord>, RepoError>;

    async fn create_email(&self, params: CreateEmailParams) -> Result<EmailRecord, RepoError>;

    async fn update_email_content(
        &self,
        id: Uuid,
        subject: &str,
        body_html: &str,
    ) -> Result<EmailRecord, RepoError>;

    async fn update_email_status(&self, change: EmailStatusChange)
    -> Result<EmailRecord, RepoError>;

    /// Move an issue from one of `from` into `status` and bump its send
    /// generation. `None` when the issue is no longer in an allowed status.
    async fn begin_send(
        &self,
        id: Uuid,
        from: &[EmailStatus],
        status: EmailStatus,
        scheduled_at: Option<OffsetDateTime>,
    ) -> Result<Option<EmailRecord>, RepoError>;

    /// Undo `begin_send` while `generation` is still current, restoring the
    /// prior status and generation.
    async fn revert_send(&self, generation: i32, prior: EmailStatusChange)
    -> Result<bool, RepoError>;

    /// Mark the issue `sending` for a job of `generation`, provided it is
    /// already sending or its schedule is due at `now`.
    async fn claim_send(
        &self,
        id: Uuid,
        generation: i32,
        now: OffsetDateTime,
    ) -> Result<Option<EmailRecord>, RepoError>;

    /// Final status write of a delivery run; ignored once a newer send began.
    async fn settle_send(&self, generation: i32, change: EmailStatusChange)
    -> Result<bool, RepoError>;

    async fn delete_email(&self, newsletter_id: Uuid, id: Uuid) -> Result<(), RepoError>;

    async fn increment_email_counter(
        &self,
        id: Uuid,
        counter: EmailCounter,
        by: i32,
    ) -> Result<(), RepoError>;

    /// Insert `queued` deliveries for recipients without one yet and return
    /// the subscriber ids this call claimed.
    async fn claim_deliveries(
        &self,
        email_id: Uuid,
        recipients: &[(Uuid, String)],
    ) -> Result<Vec<Uuid>, RepoError>;

    /// Record provider results on claimed deliveries; returns how many became `sent`.
    async fn complete_deliveries(
        &self,
        email_id: Uuid,
        outcomes: Vec<DeliveryOutcome>,
    ) -> Result<u64, RepoError>;

    /// Drop `queued` claims so a later send reaches these recipients.
    async fn release_deliveries(
        &self,
        email_id: Uuid,
        subscriber_ids: &[Uuid],
    ) -> Result<u64, RepoError>;

    async fn find_delivery_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<DeliveryRecord>, RepoError>;

    /// Move a delivery to `to` only when its current status is one of `from`;
    /// returns whether a row changed.
    async fn transition_delivery(
        &self,
        id: Uuid,
        from: &[DeliveryStatus],
        to: DeliveryStatus,
        error: Option<String>,
    ) -> Result<bool, RepoError>;

    /// Sets `opened_at` if unset; returns whether this was the first open.
    async fn mark_delivery_opened(&self, id: Uuid, at: OffsetDateTime) -> Result<bool, RepoError>;

    /// Sets `clicked_at` if unset; returns whether this was the first click.
    async fn mark_delivery_clicked(&self, id: Uuid, at: OffsetDateTime)
    -> Result<bool, RepoError>;

    async fn record_delivery_error(&self, id: Uuid, error: &str) -> Result<(), RepoError>;
}

#[derive(Debug, Clone, Default)]
pub struct AuditQueryFilter {
    pub actor: Option<String>,
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub search: Option<String>,
}

#[async_trait]
pub trait AuditRepo: Send + Sync {
    async fn append_log(&self, record: AuditLogRecord) -> Result<(), RepoError>;

    async fn list_logs(
        &self,
        workspace_id: Uuid,
        filter: &AuditQueryFilter,
        page: PageRequest<TimeCursor>,
    ) -> Result<CursorPage<AuditLogRecord>, RepoError>;
}

#[async_trait]
pub trait JobsRepo: Send + Sync {
    async fn enqueue_job(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        run_at: Option<OffsetDateTime>,
        max_attempts: i32,
        priority: i32,
    ) -> Result<String, RepoError>;
}
