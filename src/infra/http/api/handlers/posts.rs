//! Posts handlers: drafts, lifecycle, taxonomy and revisions.

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::application::admin::posts::{CreatePostCommand, UpdateDraftCommand};
use crate::application::api_keys::ApiPrincipal;
use crate::application::pagination::CursorKind;
use crate::application::repos::PostQueryFilter;
use crate::domain::api_keys::ApiScope;
use crate::domain::posts::PostAction;

use super::{PostListQuery, page_request, post_to_api};
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::*;
use crate::infra::http::api::state::ApiState;

pub async fn list_posts(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(page_id): Path<Uuid>,
    Query(query): Query<PostListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PostRead)?;

    let request = page_request(CursorKind::Posts, query.cursor.as_deref(), query.limit)?;
    let filter = PostQueryFilter {
        category: query.category,
        author: query.author,
        search: query.search,
    };

    let posts = state
        .posts
        .list_posts(
            principal.workspace_id,
            page_id,
            query.status,
            &filter,
            request,
        )
        .await
        .map_err(post_to_api)?;

    Ok(Json(posts))
}

pub async fn get_post(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PostRead)?;

    let detail = state
        .posts
        .get_post(principal.workspace_id, page_id, id)
        .await
        .map_err(post_to_api)?;
    Ok(Json(detail))
}

pub async fn create_post(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(page_id): Path<Uuid>,
    Json(payload): Json<PostCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PostWrite)?;
    let actor = principal.actor_label();

    let command = CreatePostCommand {
        page_id,
        title: payload.title,
        slug: payload.slug,
        excerpt: payload.excerpt,
        body_html: payload.body_html,
        category_ids: payload.category_ids,
        author_ids: payload.author_ids,
    };

    let post = state
        .posts
        .create_post(&actor, principal.workspace_id, command)
        .await
        .map_err(post_to_api)?;

    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn update_post(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<PostUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PostWrite)?;
    let actor = principal.actor_label();

    let command = UpdateDraftCommand {
        page_id,
        id,
        title: payload.title,
        slug: payload.slug,
        excerpt: payload.excerpt,
        body_html: payload.body_html,
    };

    let post = state
        .posts
        .update_draft(&actor, principal.workspace_id, command)
        .await
        .map_err(post_to_api)?;

    Ok(Json(post))
}

pub async fn delete_post(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PostWrite)?;
    let actor = principal.actor_label();

    state
        .posts
        .delete_post(&actor, principal.workspace_id, page_id, id)
        .await
        .map_err(post_to_api)?;

    Ok(StatusCode::NO_CONTENT)
}

/// Body is a tagged action, e.g. `{"action":"schedule","publish_at":"..."}`.
pub async fn update_post_status(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
    Json(action): Json<PostAction>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PostWrite)?;
    let actor = principal.actor_label();

    let post = state
        .posts
        .change_status(&actor, principal.workspace_id, page_id, id, action)
        .await
        .map_err(post_to_api)?;

    Ok(Json(post))
}

pub async fn replace_post_categories(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<IdListRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PostWrite)?;
    let actor = principal.actor_label();

    state
        .posts
        .replace_categories(&actor, principal.workspace_id, page_id, id, payload.ids)
        .await
        .map_err(post_to_api)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn replace_post_authors(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<IdListRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PostWrite)?;
    let actor = principal.actor_label();

    state
        .posts
        .replace_authors(&actor, principal.workspace_id, page_id, id, payload.ids)
        .await
        .map_err(post_to_api)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_post_revisions(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PostRead)?;

    let revisions = state
        .posts
        .list_revisions(principal.workspace_id, page_id, id)
        .await
        .map_err(post_to_api)?;
    Ok(Json(revisions))
}

pub async fn get_post_revision(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id, revision_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PostRead)?;

    let revision = state
        .posts
        .get_revision(principal.workspace_id, page_id, id, revision_id)
        .await
        .map_err(post_to_api)?;
    Ok(Json(revision))
}

pub async fn diff_post_revision(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id, revision_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PostRead)?;

    let diff = state
        .posts
        .diff_revision(principal.workspace_id, page_id, id, revision_id)
        .await
        .map_err(post_to_api)?;
    Ok(Json(diff))
}

pub async fn restore_post_revision(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path((page_id, id, revision_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.requires(ApiScope::PostWrite)?;
    let actor = principal.actor_label();

    let post = state
        .posts
        .restore_revision(&actor, principal.workspace_id, page_id, id, revision_id)
        .await
        .map_err(post_to_api)?;
    Ok(Json(post))
}
