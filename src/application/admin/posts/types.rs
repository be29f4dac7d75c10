use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::RepoError;
use crate::domain::entities::{AuthorRecord, CategoryRecord, PostRecord, RevisionRecord};
use crate::domain::error::DomainError;
use crate::domain::types::PostStatus;

#[derive(Debug, Error)]
pub enum AdminPostError {
    #[error("{0}")]
    ConstraintViolation(&'static str),
    #[error("page not found")]
    PageNotFound,
    #[error("post not found")]
    NotFound,
    #[error("revision not found")]
    RevisionNotFound,
    #[error("slug `{0}` is already used on this page")]
    SlugTaken(String),
    #[error("{kind} ids do not all belong to this page")]
    UnknownReferences { kind: &'static str },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone)]
pub struct CreatePostCommand {
    pub page_id: Uuid,
    pub title: String,
    pub slug: Option<String>,
    pub excerpt: Option<String>,
    pub body_html: String,
    pub category_ids: Vec<Uuid>,
    pub author_ids: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct UpdateDraftCommand {
    pub page_id: Uuid,
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub excerpt: Option<String>,
    pub body_html: String,
}

/// A post together with its assignments and publish drift.
#[derive(Debug, Clone, Serialize)]
pub struct PostDetail {
    pub post: PostRecord,
    pub categories: Vec<CategoryRecord>,
    pub authors: Vec<AuthorRecord>,
    pub has_unpublished_changes: bool,
}

/// Revision listing entry without the body.
#[derive(Debug, Clone, Serialize)]
pub struct RevisionSummary {
    pub id: Uuid,
    pub version: i32,
    pub title: String,
    pub digest: String,
    pub created_by: String,
    pub created_at: OffsetDateTime,
    pub published: bool,
}

impl RevisionSummary {
    pub(crate) fn from_record(record: RevisionRecord, published_id: Option<Uuid>) -> Self {
        Self {
            published: published_id == Some(record.id),
            id: record.id,
            version: record.version,
            title: record.title,
            digest: record.digest,
            created_by: record.created_by,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct PostSummarySnapshot<'a> {
    pub slug: &'a str,
    pub title: &'a str,
    pub status: PostStatus,
}

impl<'a> PostSummarySnapshot<'a> {
    pub(crate) fn of(post: &'a PostRecord) -> Self {
        Self {
            slug: &post.slug,
            title: &post.title,
            status: post.status,
        }
    }
}
