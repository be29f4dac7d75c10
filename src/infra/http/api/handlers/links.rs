//! Link handlers

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::application::admin::links::LinkCommand;
use crate::application::api_keys::ApiPrincipal;
use crate::domain::api_keys::ApiScope;

use super::link_to_api;
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::{IdListRequest, LinkRequest};
use crate::infra::http::api::state::ApiState;

impl From<LinkRequest> for LinkCommand {
    fn from(payload: LinkRequest) -> Self {
        Self {
            label: payload.label,
            url: payload.url,
            visible: payload.visible,
        }
    }
}

pub async fn list_links(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(page_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageRead)?;

    let links = state
        .links
        .list(principal.workspace_id, page_id)
        .await
        .map_err(link_to_api)?;
    Ok(Json(links))
}

pub async fn create_link(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(page_id): Path<Uuid>,
    Json(payload): Json<LinkRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageWrite)?;
    let actor = principal.actor_label();

    let link = state
        .links
        .create(&actor, principal.workspace_id, page_id, payload.into())
        .await
        .map_err(link_to_api)?;
    Ok((StatusCode::CREATED, Json(link)))
}

pub async fn update_link(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<LinkRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageWrite)?;
    let actor = principal.actor_label();

    let link = state
        .links
        .update(&actor, principal.workspace_id, page_id, id, payload.into())
        .await
        .map_err(link_to_api)?;
    Ok(Json(link))
}

pub async fn delete_link(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageWrite)?;
    let actor = principal.actor_label();

    state
        .links
        .delete(&actor, principal.workspace_id, page_id, id)
        .await
        .map_err(link_to_api)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reorder_links(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(page_id): Path<Uuid>,
    Json(payload): Json<IdListRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageWrite)?;
    let actor = principal.actor_label();

    let links = state
        .links
        .reorder(&actor, principal.workspace_id, page_id, payload.ids)
        .await
        .map_err(link_to_api)?;
    Ok(Json(links))
}
