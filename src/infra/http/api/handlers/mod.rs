//! API handlers organized by resource type.
//!
//! Each submodule contains handlers for a specific resource (pages, posts, etc.).
//! Helper functions for error conversion are defined here and shared across modules.

mod api_keys;
mod audit;
mod authors;
mod categories;
mod emails;
mod links;
mod newsletters;
mod pages;
mod posts;
mod subscribers;
mod workspace;

pub use api_keys::*;
pub use audit::*;
pub use authors::*;
pub use categories::*;
pub use emails::*;
pub use links::*;
pub use newsletters::*;
pub use pages::*;
pub use posts::*;
pub use subscribers::*;
pub use workspace::*;

// ----- Shared query structs -----

use serde::Deserialize;

use crate::application::pagination::{CursorKind, PageRequest, TimeCursor};
use crate::domain::types::{PostStatus, SubscriberStatus};

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct CursorQuery {
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PageListQuery {
    pub search: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PostListQuery {
    pub status: Option<PostStatus>,
    pub category: Option<String>,
    pub author: Option<String>,
    pub search: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SubscriberListQuery {
    pub status: Option<SubscriberStatus>,
    pub search: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct AuditListQuery {
    pub actor: Option<String>,
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub search: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ForceQuery {
    #[serde(default)]
    pub force: bool,
}

pub(crate) fn page_request(
    kind: CursorKind,
    cursor: Option<&str>,
    limit: Option<u32>,
) -> Result<PageRequest<TimeCursor>, ApiError> {
    let cursor = cursor
        .map(|raw| TimeCursor::decode(kind, raw))
        .transpose()
        .map_err(|err| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_CURSOR,
                "Invalid cursor",
                Some(err.to_string()),
            )
        })?;
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    Ok(PageRequest::new(limit, cursor))
}

// ----- Shared error conversions -----

use axum::http::StatusCode;

use crate::application::admin::authors::AdminAuthorError;
use crate::application::admin::categories::AdminCategoryError;
use crate::application::admin::emails::AdminEmailError;
use crate::application::admin::links::AdminLinkError;
use crate::application::admin::newsletters::AdminNewsletterError;
use crate::application::admin::pages::AdminPageError;
use crate::application::admin::posts::AdminPostError;
use crate::application::admin::subscribers::AdminSubscriberError;
use crate::application::admin::workspaces::WorkspaceError;
use crate::application::api_keys::ApiKeyError;
use crate::application::repos::RepoError;
use crate::domain::error::DomainError;

use super::error::{ApiError, codes};

pub(crate) fn repo_to_api(err: RepoError) -> ApiError {
    match err {
        RepoError::Duplicate { constraint } => {
            ApiError::conflict(codes::DUPLICATE, "Duplicate record", Some(constraint))
        }
        RepoError::Pagination(p) => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_CURSOR,
            "Invalid cursor",
            Some(p.to_string()),
        ),
        RepoError::NotFound => ApiError::not_found("resource not found"),
        RepoError::InvalidInput { message } => ApiError::invalid_input("Invalid input", message),
        RepoError::Integrity { message } => ApiError::conflict(
            codes::INTEGRITY,
            "Integrity constraint violated",
            Some(message),
        ),
        RepoError::Timeout => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::DB_TIMEOUT,
            "Database timeout",
            None,
        ),
        RepoError::Persistence(msg) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::REPO,
            "Persistence error",
            Some(msg),
        ),
    }
}

pub(crate) fn domain_to_api(err: DomainError) -> ApiError {
    match err {
        DomainError::NotFound { entity } => ApiError::new(
            StatusCode::NOT_FOUND,
            codes::NOT_FOUND,
            "Resource not found",
            Some(entity.to_string()),
        ),
        DomainError::Validation { message } => ApiError::invalid_input("Invalid input", message),
        DomainError::Invariant { message } => ApiError::conflict(
            codes::INVALID_TRANSITION,
            "Operation not allowed in the current state",
            Some(message),
        ),
    }
}

fn slug_taken(slug: String) -> ApiError {
    ApiError::conflict(codes::SLUG_TAKEN, "Slug already in use", Some(slug))
}

pub(crate) fn workspace_to_api(err: WorkspaceError) -> ApiError {
    match err {
        WorkspaceError::ConstraintViolation(field) => {
            ApiError::invalid_input("Invalid workspace", field)
        }
        WorkspaceError::NotFound => ApiError::not_found("workspace not found"),
        WorkspaceError::MemberNotFound => ApiError::not_found("member not found"),
        WorkspaceError::DuplicateMember(email) => {
            ApiError::conflict(codes::DUPLICATE, "Member already exists", Some(email))
        }
        WorkspaceError::LastOwner => ApiError::conflict(
            codes::LAST_OWNER,
            "A workspace must keep at least one owner",
            None,
        ),
        WorkspaceError::Domain(domain) => domain_to_api(domain),
        WorkspaceError::Repo(repo) => repo_to_api(repo),
    }
}

pub(crate) fn api_key_to_api(err: ApiKeyError) -> ApiError {
    match err {
        ApiKeyError::InvalidScopes => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_INPUT,
            "Invalid API key scopes",
            None,
        ),
        ApiKeyError::ConstraintViolation(field) => {
            ApiError::invalid_input("Invalid API key", field)
        }
        ApiKeyError::NotFound => ApiError::not_found("api key not found"),
        ApiKeyError::Repo(repo) => repo_to_api(repo),
    }
}

pub(crate) fn page_to_api(err: AdminPageError) -> ApiError {
    match err {
        AdminPageError::ConstraintViolation(field) => ApiError::invalid_input("Invalid page", field),
        AdminPageError::NotFound => ApiError::not_found("page not found"),
        AdminPageError::SlugTaken(slug) => slug_taken(slug),
        AdminPageError::DomainTaken(domain) => ApiError::conflict(
            codes::DUPLICATE,
            "Custom domain already in use",
            Some(domain),
        ),
        AdminPageError::Repo(repo) => repo_to_api(repo),
    }
}

pub(crate) fn post_to_api(err: AdminPostError) -> ApiError {
    match err {
        AdminPostError::ConstraintViolation(field) => ApiError::invalid_input("Invalid post", field),
        AdminPostError::PageNotFound => ApiError::not_found("page not found"),
        AdminPostError::NotFound => ApiError::not_found("post not found"),
        AdminPostError::RevisionNotFound => ApiError::not_found("revision not found"),
        AdminPostError::SlugTaken(slug) => slug_taken(slug),
        AdminPostError::UnknownReferences { kind } => ApiError::invalid_input(
            "Referenced ids do not belong to this page",
            kind,
        ),
        AdminPostError::Domain(domain) => domain_to_api(domain),
        AdminPostError::Repo(repo) => repo_to_api(repo),
    }
}

pub(crate) fn category_to_api(err: AdminCategoryError) -> ApiError {
    match err {
        AdminCategoryError::ConstraintViolation(field) => {
            ApiError::invalid_input("Invalid category", field)
        }
        AdminCategoryError::PageNotFound => ApiError::not_found("page not found"),
        AdminCategoryError::NotFound => ApiError::not_found("category not found"),
        AdminCategoryError::SlugTaken(slug) => slug_taken(slug),
        AdminCategoryError::Repo(repo) => repo_to_api(repo),
    }
}

pub(crate) fn author_to_api(err: AdminAuthorError) -> ApiError {
    match err {
        AdminAuthorError::ConstraintViolation(field) => {
            ApiError::invalid_input("Invalid author", field)
        }
        AdminAuthorError::PageNotFound => ApiError::not_found("page not found"),
        AdminAuthorError::NotFound => ApiError::not_found("author not found"),
        AdminAuthorError::MemberNotFound => ApiError::not_found("member not found"),
        AdminAuthorError::SlugTaken(slug) => slug_taken(slug),
        AdminAuthorError::InUse { count } => ApiError::conflict(
            codes::IN_USE,
            "Author is attached to posts",
            Some(format!("{count} post(s); retry with force=true")),
        ),
        AdminAuthorError::Repo(repo) => repo_to_api(repo),
    }
}

pub(crate) fn link_to_api(err: AdminLinkError) -> ApiError {
    match err {
        AdminLinkError::ConstraintViolation(field) => ApiError::invalid_input("Invalid link", field),
        AdminLinkError::PageNotFound => ApiError::not_found("page not found"),
        AdminLinkError::NotFound => ApiError::not_found("link not found"),
        AdminLinkError::ReorderMismatch => ApiError::invalid_input(
            "Reorder must list every link of the page exactly once",
            "ids",
        ),
        AdminLinkError::Repo(repo) => repo_to_api(repo),
    }
}

pub(crate) fn newsletter_to_api(err: AdminNewsletterError) -> ApiError {
    match err {
        AdminNewsletterError::ConstraintViolation(field) => {
            ApiError::invalid_input("Invalid newsletter", field)
        }
        AdminNewsletterError::PageNotFound => ApiError::not_found("page not found"),
        AdminNewsletterError::NotFound => ApiError::not_found("newsletter not found"),
        AdminNewsletterError::SlugTaken(slug) => slug_taken(slug),
        AdminNewsletterError::Repo(repo) => repo_to_api(repo),
    }
}

pub(crate) fn subscriber_to_api(err: AdminSubscriberError) -> ApiError {
    match err {
        AdminSubscriberError::ConstraintViolation(field) => {
            ApiError::invalid_input("Invalid subscriber", field)
        }
        AdminSubscriberError::NewsletterNotFound => ApiError::not_found("newsletter not found"),
        AdminSubscriberError::NotFound => ApiError::not_found("subscriber not found"),
        AdminSubscriberError::AlreadySubscribed(email) => {
            ApiError::conflict(codes::DUPLICATE, "Address already subscribed", Some(email))
        }
        AdminSubscriberError::ImportTooLarge { max } => ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            codes::INVALID_INPUT,
            "Import batch too large",
            Some(format!("at most {max} addresses per request")),
        ),
        AdminSubscriberError::Repo(repo) => repo_to_api(repo),
    }
}

pub(crate) fn email_to_api(err: AdminEmailError) -> ApiError {
    match err {
        AdminEmailError::ConstraintViolation(field) => {
            ApiError::invalid_input("Invalid email", field)
        }
        AdminEmailError::NewsletterNotFound => ApiError::not_found("newsletter not found"),
        AdminEmailError::NotFound => ApiError::not_found("email not found"),
        AdminEmailError::PostNotFound => ApiError::not_found("post not found"),
        AdminEmailError::PostNotPublished => ApiError::conflict(
            codes::INVALID_TRANSITION,
            "Post has no published revision",
            None,
        ),
        AdminEmailError::NotEditable { status } => ApiError::conflict(
            codes::NOT_EDITABLE,
            "Email can no longer be changed",
            Some(status.to_string()),
        ),
        AdminEmailError::NoRecipients => ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            codes::NO_RECIPIENTS,
            "Newsletter has no confirmed subscribers",
            None,
        ),
        AdminEmailError::Sending => ApiError::conflict(
            codes::NOT_EDITABLE,
            "Email is being sent",
            Some("sending".to_string()),
        ),
        AdminEmailError::Repo(repo) => repo_to_api(repo),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_for_another_listing_is_a_bad_request() {
        let cursor = TimeCursor::new(
            CursorKind::Audit,
            time::OffsetDateTime::now_utc(),
            uuid::Uuid::new_v4(),
        )
        .encode();
        let err = page_request(CursorKind::Posts, Some(&cursor), None).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), codes::INVALID_CURSOR);
    }

    #[test]
    fn limit_is_clamped() {
        let request = page_request(CursorKind::Pages, None, Some(10_000)).unwrap();
        assert_eq!(request.limit, MAX_PAGE_SIZE);
        let request = page_request(CursorKind::Pages, None, Some(0)).unwrap();
        assert_eq!(request.limit, 1);
    }

    #[test]
    fn last_owner_maps_to_conflict() {
        let err = workspace_to_api(WorkspaceError::LastOwner);
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), codes::LAST_OWNER);
    }

    #[test]
    fn empty_audience_is_unprocessable() {
        let err = email_to_api(AdminEmailError::NoRecipients);
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
