//! Category handlers

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::application::admin::categories::CategoryCommand;
use crate::application::api_keys::ApiPrincipal;
use crate::domain::api_keys::ApiScope;

use super::category_to_api;
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::CategoryRequest;
use crate::infra::http::api::state::ApiState;

impl From<CategoryRequest> for CategoryCommand {
    fn from(payload: CategoryRequest) -> Self {
        Self {
            name: payload.name,
            slug: payload.slug,
            description: payload.description,
            position: payload.position,
        }
    }
}

pub async fn list_categories(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(page_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageRead)?;

    let categories = state
        .categories
        .list(principal.workspace_id, page_id)
        .await
        .map_err(category_to_api)?;
    Ok(Json(categories))
}

pub async fn create_category(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(page_id): Path<Uuid>,
    Json(payload): Json<CategoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageWrite)?;
    let actor = principal.actor_label();

    let category = state
        .categories
        .create(&actor, principal.workspace_id, page_id, payload.into())
        .await
        .map_err(category_to_api)?;
    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn get_category(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageRead)?;

    let category = state
        .categories
        .get(principal.workspace_id, page_id, id)
        .await
        .map_err(category_to_api)?;
    Ok(Json(category))
}

pub async fn update_category(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<CategoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageWrite)?;
    let actor = principal.actor_label();

    let category = state
        .categories
        .update(&actor, principal.workspace_id, page_id, id, payload.into())
        .await
        .map_err(category_to_api)?;
    Ok(Json(category))
}

pub async fn delete_category(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PageWrite)?;
    let actor = principal.actor_label();

    state
        .categories
        .delete(&actor, principal.workspace_id, page_id, id)
        .await
        .map_err(category_to_api)?;
    Ok(StatusCode::NO_CONTENT)
}
