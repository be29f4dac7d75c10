//! Subscriber handlers

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::application::api_keys::ApiPrincipal;
use crate::application::pagination::CursorKind;
use crate::application::repos::SubscriberQueryFilter;
use crate::domain::api_keys::ApiScope;

use super::{SubscriberListQuery, page_request, subscriber_to_api};
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::{SubscriberCreateRequest, SubscriberImportRequest};
use crate::infra::http::api::state::ApiState;

pub async fn list_subscribers(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, newsletter_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<SubscriberListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::SubscriberRead)?;

    let request = page_request(
        CursorKind::Subscribers,
        query.cursor.as_deref(),
        query.limit,
    )?;
    let filter = SubscriberQueryFilter {
        status: query.status,
        search: query.search,
    };

    let subscribers = state
        .subscribers
        .list(
            principal.workspace_id,
            page_id,
            newsletter_id,
            &filter,
            request,
        )
        .await
        .map_err(subscriber_to_api)?;
    Ok(Json(subscribers))
}

pub async fn subscriber_counts(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, newsletter_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::SubscriberRead)?;

    let counts = state
        .subscribers
        .counts(principal.workspace_id, page_id, newsletter_id)
        .await
        .map_err(subscriber_to_api)?;
    Ok(Json(counts))
}

/// Admin-added addresses skip double opt-in.
pub async fn add_subscriber(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, newsletter_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<SubscriberCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::SubscriberWrite)?;
    let actor = principal.actor_label();

    let subscriber = state
        .subscribers
        .add(
            &actor,
            principal.workspace_id,
            page_id,
            newsletter_id,
            &payload.email,
        )
        .await
        .map_err(subscriber_to_api)?;
    Ok((StatusCode::CREATED, Json(subscriber)))
}

pub async fn import_subscribers(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, newsletter_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<SubscriberImportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::SubscriberWrite)?;
    let actor = principal.actor_label();

    let report = state
        .subscribers
        .import(
            &actor,
            principal.workspace_id,
            page_id,
            newsletter_id,
            payload.emails,
        )
        .await
        .map_err(subscriber_to_api)?;
    Ok(Json(report))
}

pub async fn remove_subscriber(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, newsletter_id, id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::SubscriberWrite)?;
    let actor = principal.actor_label();

    state
        .subscribers
        .remove(&actor, principal.workspace_id, page_id, newsletter_id, id)
        .await
        .map_err(subscriber_to_api)?;
    Ok(StatusCode::NO_CONTENT)
}
