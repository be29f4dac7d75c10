//! Workspace and member handlers

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::application::admin::workspaces::InviteMemberCommand;
use crate::application::api_keys::ApiPrincipal;
use crate::domain::api_keys::ApiScope;

use super::workspace_to_api;
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::*;
use crate::infra::http::api::state::ApiState;

/// Any valid key may read its own workspace.
pub async fn get_workspace(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = state
        .workspaces
        .get_workspace(principal.workspace_id)
        .await
        .map_err(workspace_to_api)?;
    Ok(Json(workspace))
}

pub async fn rename_workspace(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Json(payload): Json<WorkspaceRenameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::WorkspaceAdmin)?;
    let actor = principal.actor_label();

    let workspace = state
        .workspaces
        .rename_workspace(&actor, principal.workspace_id, &payload.name)
        .await
        .map_err(workspace_to_api)?;
    Ok(Json(workspace))
}

pub async fn list_members(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::WorkspaceAdmin)?;

    let members = state
        .workspaces
        .list_members(principal.workspace_id)
        .await
        .map_err(workspace_to_api)?;
    Ok(Json(members))
}

pub async fn invite_member(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Json(payload): Json<MemberInviteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::WorkspaceAdmin)?;
    let actor = principal.actor_label();

    let member = state
        .workspaces
        .invite_member(
            &actor,
            principal.workspace_id,
            InviteMemberCommand {
                email: payload.email,
                name: payload.name,
                role: payload.role,
            },
        )
        .await
        .map_err(workspace_to_api)?;
    Ok((StatusCode::CREATED, Json(member)))
}

pub async fn update_member_role(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(member_id): Path<Uuid>,
    Json(payload): Json<MemberRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::WorkspaceAdmin)?;
    let actor = principal.actor_label();

    let member = state
        .workspaces
        .update_member_role(&actor, principal.workspace_id, member_id, payload.role)
        .await
        .map_err(workspace_to_api)?;
    Ok(Json(member))
}

pub async fn remove_member(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(member_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::WorkspaceAdmin)?;
    let actor = principal.actor_label();

    state
        .workspaces
        .remove_member(&actor, principal.workspace_id, member_id)
        .await
        .map_err(workspace_to_api)?;
    Ok(StatusCode::NO_CONTENT)
}
