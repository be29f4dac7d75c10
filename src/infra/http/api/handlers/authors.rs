//! Author handlers

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::application::admin::authors::AuthorCommand;
use crate::application::api_keys::ApiPrincipal;
use crate::domain::api_keys::ApiScope;

use super::{ForceQuery, author_to_api};
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::AuthorRequest;
use crate::infra::http::api::state::ApiState;

impl From<AuthorRequest> for AuthorCommand {
    fn from(payload: AuthorRequest) -> Self {
        Self {
            name: payload.name,
            slug: payload.slug,
            member_id: payload.member_id,
            bio: payload.bio,
            avatar_url: payload.avatar_url,
            website_url: payload.website_url,
        }
    }
}

pub async fn list_authors(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(page_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageRead)?;

    let authors = state
        .authors
        .list(principal.workspace_id, page_id)
        .await
        .map_err(author_to_api)?;
    Ok(Json(authors))
}

pub async fn create_author(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(page_id): Path<Uuid>,
    Json(payload): Json<AuthorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageWrite)?;
    let actor = principal.actor_label();

    let author = state
        .authors
        .create(&actor, principal.workspace_id, page_id, payload.into())
        .await
        .map_err(author_to_api)?;
    Ok((StatusCode::CREATED, Json(author)))
}

pub async fn get_author(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageRead)?;

    let author = state
        .authors
        .get(principal.workspace_id, page_id, id)
        .await
        .map_err(author_to_api)?;
    Ok(Json(author))
}

pub async fn update_author(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<AuthorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageWrite)?;
    let actor = principal.actor_label();

    let author = state
        .authors
        .update(&actor, principal.workspace_id, page_id, id, payload.into())
        .await
        .map_err(author_to_api)?;
    Ok(Json(author))
}

/// Refused with 409 while posts reference the author, unless `force=true`.
pub async fn delete_author(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
    Query(query): Query<ForceQuery>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageWrite)?;
    let actor = principal.actor_label();

    state
        .authors
        .delete(&actor, principal.workspace_id, page_id, id, query.force)
        .await
        .map_err(author_to_api)?;
    Ok(StatusCode::NO_CONTENT)
}
