//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::{
    DeliveryStatus, EmailStatus, MemberRole, PostStatus, SubscriberStatus,
};

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct WorkspaceRecord {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct MemberRecord {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: MemberRole,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A blog owned by a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PageRecord {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub custom_domain: Option<String>,
    pub language: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A post holds its working draft inline; published content lives in the
/// revision referenced by `published_revision_id`.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PostRecord {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub page_id: Uuid,
    pub slug: String,
    pub title: String,
    pub excerpt: String,
    pub body_html: String,
    pub status: PostStatus,
    pub published_revision_id: Option<Uuid>,
    pub scheduled_at: Option<OffsetDateTime>,
    pub published_at: Option<OffsetDateTime>,
    pub archived_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct RevisionRecord {
    pub id: Uuid,
    pub post_id: Uuid,
    pub version: i32,
    pub title: String,
    pub excerpt: String,
    pub body_html: String,
    pub digest: String,
    pub created_by: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CategoryRecord {
    pub id: Uuid,
    pub page_id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub position: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct AuthorRecord {
    pub id: Uuid,
    pub page_id: Uuid,
    pub member_id: Option<Uuid>,
    pub slug: String,
    pub name: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub website_url: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct LinkRecord {
    pub id: Uuid,
    pub page_id: Uuid,
    pub label: String,
    pub url: String,
    pub position: i32,
    pub visible: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct NewsletterRecord {
    pub id: Uuid,
    pub page_id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub sender_name: String,
    pub sender_email: String,
    pub reply_to: Option<String>,
    pub double_opt_in: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct SubscriberRecord {
    pub id: Uuid,
    pub newsletter_id: Uuid,
    pub email: String,
    pub status: SubscriberStatus,
    #[serde(skip_serializing)]
    pub confirmation_token: String,
    #[serde(skip_serializing)]
    pub unsubscribe_token: String,
    pub source: String,
    pub confirmed_at: Option<OffsetDateTime>,
    pub unsubscribed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// One newsletter issue and its delivery counters.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct EmailRecord {
    pub id: Uuid,
    pub newsletter_id: Uuid,
    pub post_id: Option<Uuid>,
    pub subject: String,
    pub body_html: String,
    pub status: EmailStatus,
    pub scheduled_at: Option<OffsetDateTime>,
    pub sent_at: Option<OffsetDateTime>,
    pub recipient_count: i32,
    pub delivered_count: i32,
    pub opened_count: i32,
    pub clicked_count: i32,
    pub bounced_count: i32,
    pub complained_count: i32,
    pub last_error: Option<String>,
    /// Bumped by every send or schedule; jobs carry the value they were queued with.
    #[serde(skip_serializing)]
    pub send_generation: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub email_id: Uuid,
    pub subscriber_id: Uuid,
    pub recipient: String,
    pub provider_message_id: Option<String>,
    pub status: DeliveryStatus,
    pub opened_at: Option<OffsetDateTime>,
    pub clicked_at: Option<OffsetDateTime>,
    pub error: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct AuditLogRecord {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub actor: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub payload_text: Option<String>,
    pub created_at: OffsetDateTime,
}
