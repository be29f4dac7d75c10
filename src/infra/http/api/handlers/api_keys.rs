//! API Key handlers

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::application::api_keys::{ApiPrincipal, IssueApiKeyCommand};
use crate::domain::api_keys::ApiScope;

use super::api_key_to_api;
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::{ApiKeyCreateRequest, ApiKeyIssuedResponse};
use crate::infra::http::api::state::ApiState;

/// The calling key itself; needs no scope.
pub async fn get_api_key_info(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .api_keys
        .get(principal.workspace_id, principal.key_id)
        .await
        .map_err(api_key_to_api)?;
    Ok(Json(record))
}

pub async fn list_api_keys(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::WorkspaceAdmin)?;

    let keys = state
        .api_keys
        .list(principal.workspace_id)
        .await
        .map_err(api_key_to_api)?;
    Ok(Json(keys))
}

pub async fn issue_api_key(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Json(payload): Json<ApiKeyCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::WorkspaceAdmin)?;

    let issued = state
        .api_keys
        .issue(IssueApiKeyCommand {
            workspace_id: principal.workspace_id,
            name: payload.name,
            description: payload.description,
            scopes: payload.scopes,
            expires_at: payload.expires_at,
            created_by: principal.actor_label(),
        })
        .await
        .map_err(api_key_to_api)?;

    Ok((
        StatusCode::CREATED,
        Json(ApiKeyIssuedResponse {
            key: issued.record,
            token: issued.token,
        }),
    ))
}

pub async fn rotate_api_key(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::WorkspaceAdmin)?;
    let actor = principal.actor_label();

    let issued = state
        .api_keys
        .rotate(principal.workspace_id, id, &actor)
        .await
        .map_err(api_key_to_api)?;

    Ok(Json(ApiKeyIssuedResponse {
        key: issued.record,
        token: issued.token,
    }))
}

pub async fn revoke_api_key(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::WorkspaceAdmin)?;
    let actor = principal.actor_label();

    state
        .api_keys
        .revoke(principal.workspace_id, id, &actor)
        .await
        .map_err(api_key_to_api)?;
    Ok(StatusCode::NO_CONTENT)
}
