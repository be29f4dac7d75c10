//! Audit handlers

use axum::Json;
use axum::extract::{Extension, Query, State};
use axum::response::IntoResponse;

use crate::application::api_keys::ApiPrincipal;
use crate::application::pagination::CursorKind;
use crate::application::repos::AuditQueryFilter;
use crate::domain::api_keys::ApiScope;

use super::{AuditListQuery, page_request, repo_to_api};
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::state::ApiState;

pub async fn list_audit_logs(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Query(query): Query<AuditListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::AuditRead)?;

    let request = page_request(CursorKind::Audit, query.cursor.as_deref(), query.limit)?;
    let filter = AuditQueryFilter {
        actor: query.actor,
        action: query.action,
        entity_type: query.entity_type,
        search: query.search,
    };

    let page = state
        .audit
        .list(principal.workspace_id, &filter, request)
        .await
        .map_err(repo_to_api)?;

    Ok(Json(page))
}
