//! Pages handlers

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::application::admin::pages::{CreatePageCommand, UpdatePageCommand};
use crate::application::api_keys::ApiPrincipal;
use crate::application::pagination::CursorKind;
use crate::application::repos::PageQueryFilter;
use crate::domain::api_keys::ApiScope;

use super::{PageListQuery, page_request, page_to_api};
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::*;
use crate::infra::http::api::state::ApiState;

pub async fn list_pages(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Query(query): Query<PageListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageRead)?;

    let request = page_request(CursorKind::Pages, query.cursor.as_deref(), query.limit)?;
    let filter = PageQueryFilter {
        search: query.search,
    };

    let page = state
        .pages
        .list(principal.workspace_id, &filter, request)
        .await
        .map_err(page_to_api)?;

    Ok(Json(page))
}

pub async fn get_page(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageRead)?;

    let page = state
        .pages
        .get(principal.workspace_id, id)
        .await
        .map_err(page_to_api)?;
    Ok(Json(page))
}

pub async fn create_page(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Json(payload): Json<PageCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageWrite)?;
    let actor = principal.actor_label();

    let command = CreatePageCommand {
        title: payload.title,
        slug: payload.slug,
        description: payload.description,
        custom_domain: payload.custom_domain,
        language: payload.language,
    };

    let page = state
        .pages
        .create_page(&actor, principal.workspace_id, command)
        .await
        .map_err(page_to_api)?;

    Ok((StatusCode::CREATED, Json(page)))
}

pub async fn update_page(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PageUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageWrite)?;
    let actor = principal.actor_label();

    let command = UpdatePageCommand {
        id,
        title: payload.title,
        slug: payload.slug,
        description: payload.description,
        custom_domain: payload.custom_domain,
        language: payload.language,
    };

    let page = state
        .pages
        .update_page(&actor, principal.workspace_id, command)
        .await
        .map_err(page_to_api)?;

    Ok(Json(page))
}

pub async fn delete_page(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageWrite)?;
    let actor = principal.actor_label();

    state
        .pages
        .delete_page(&actor, principal.workspace_id, id)
        .await
        .map_err(page_to_api)?;

    Ok(StatusCode::NO_CONTENT)
}
