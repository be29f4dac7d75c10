//! Newsletter handlers

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::application::admin::newsletters::NewsletterCommand;
use crate::application::api_keys::ApiPrincipal;
use crate::domain::api_keys::ApiScope;

use super::newsletter_to_api;
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::NewsletterRequest;
use crate::infra::http::api::state::ApiState;

impl From<NewsletterRequest> for NewsletterCommand {
    fn from(payload: NewsletterRequest) -> Self {
        Self {
            name: payload.name,
            slug: payload.slug,
            description: payload.description,
            sender_name: payload.sender_name,
            sender_email: payload.sender_email,
            reply_to: payload.reply_to,
            double_opt_in: payload.double_opt_in,
        }
    }
}

pub async fn list_newsletters(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(page_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::NewsletterRead)?;

    let newsletters = state
        .newsletters
        .list(principal.workspace_id, page_id)
        .await
        .map_err(newsletter_to_api)?;
    Ok(Json(newsletters))
}

pub async fn create_newsletter(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(page_id): Path<Uuid>,
    Json(payload): Json<NewsletterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::NewsletterWrite)?;
    let actor = principal.actor_label();

    let newsletter = state
        .newsletters
        .create(&actor, principal.workspace_id, page_id, payload.into())
        .await
        .map_err(newsletter_to_api)?;
    Ok((StatusCode::CREATED, Json(newsletter)))
}

pub async fn get_newsletter(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::NewsletterRead)?;

    let newsletter = state
        .newsletters
        .get(principal.workspace_id, page_id, id)
        .await
        .map_err(newsletter_to_api)?;
    Ok(Json(newsletter))
}

pub async fn newsletter_stats(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::NewsletterRead)?;

    let stats = state
        .newsletters
        .stats(principal.workspace_id, page_id, id)
        .await
        .map_err(newsletter_to_api)?;
    Ok(Json(stats))
}

pub async fn update_newsletter(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<NewsletterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::NewsletterWrite)?;
    let actor = principal.actor_label();

    let newsletter = state
        .newsletters
        .update(&actor, principal.workspace_id, page_id, id, payload.into())
        .await
        .map_err(newsletter_to_api)?;
    Ok(Json(newsletter))
}

pub async fn delete_newsletter(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::NewsletterWrite)?;
    let actor = principal.actor_label();

    state
        .newsletters
        .delete(&actor, principal.workspace_id, page_id, id)
        .await
        .map_err(newsletter_to_api)?;
    Ok(StatusCode::NO_CONTENT)
}
