//! Newsletter email (issue) handlers

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::application::admin::emails::EmailCommand;
use crate::application::api_keys::ApiPrincipal;
use crate::application::pagination::CursorKind;
use crate::domain::api_keys::ApiScope;

use super::{CursorQuery, email_to_api, page_request};
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::{EmailFromPostRequest, EmailRequest, EmailSendRequest};
use crate::infra::http::api::state::ApiState;

impl From<EmailRequest> for EmailCommand {
    fn from(payload: EmailRequest) -> Self {
        Self {
            subject: payload.subject,
            body_html: payload.body_html,
        }
    }
}

pub async fn list_emails(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, newsletter_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<CursorQuery>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::NewsletterRead)?;

    let request = page_request(CursorKind::Emails, query.cursor.as_deref(), query.limit)?;
    let emails = state
        .emails
        .list(principal.workspace_id, page_id, newsletter_id, request)
        .await
        .map_err(email_to_api)?;
    Ok(Json(emails))
}

pub async fn get_email(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, newsletter_id, id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::NewsletterRead)?;

    let email = state
        .emails
        .get(principal.workspace_id, page_id, newsletter_id, id)
        .await
        .map_err(email_to_api)?;
    Ok(Json(email))
}

pub async fn create_email(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, newsletter_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<EmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::NewsletterWrite)?;
    let actor = principal.actor_label();

    let email = state
        .emails
        .create(
            &actor,
            principal.workspace_id,
            page_id,
            newsletter_id,
            payload.into(),
        )
        .await
        .map_err(email_to_api)?;
    Ok((StatusCode::CREATED, Json(email)))
}

pub async fn create_email_from_post(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, newsletter_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<EmailFromPostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::NewsletterWrite)?;
    let actor = principal.actor_label();

    let email = state
        .emails
        .create_from_post(
            &actor,
            principal.workspace_id,
            page_id,
            newsletter_id,
            payload.post_id,
        )
        .await
        .map_err(email_to_api)?;
    Ok((StatusCode::CREATED, Json(email)))
}

pub async fn update_email(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, newsletter_id, id)): Path<(Uuid, Uuid, Uuid)>,
    Json(payload): Json<EmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::NewsletterWrite)?;
    let actor = principal.actor_label();

    let email = state
        .emails
        .update(
            &actor,
            principal.workspace_id,
            page_id,
            newsletter_id,
            id,
            payload.into(),
        )
        .await
        .map_err(email_to_api)?;
    Ok(Json(email))
}

pub async fn delete_email(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, newsletter_id, id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::NewsletterWrite)?;
    let actor = principal.actor_label();

    state
        .emails
        .delete(&actor, principal.workspace_id, page_id, newsletter_id, id)
        .await
        .map_err(email_to_api)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Queues delivery now, or schedules it when `at` is present. Answers 202.
pub async fn send_email(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, newsletter_id, id)): Path<(Uuid, Uuid, Uuid)>,
    payload: Option<Json<EmailSendRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::NewsletterWrite)?;
    let actor = principal.actor_label();
    let at = payload.and_then(|Json(request)| request.at);

    let email = state
        .emails
        .send(
            &actor,
            principal.workspace_id,
            page_id,
            newsletter_id,
            id,
            at,
        )
        .await
        .map_err(email_to_api)?;
    Ok((StatusCode::ACCEPTED, Json(email)))
}

pub async fn unschedule_email(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, newsletter_id, id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::NewsletterWrite)?;
    let actor = principal.actor_label();

    let email = state
        .emails
        .unschedule(&actor, principal.workspace_id, page_id, newsletter_id, id)
        .await
        .map_err(email_to_api)?;
    Ok(Json(email))
}
