pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod state;

pub use state::ApiState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, patch, post, put},
};

use crate::infra::http::RouterState;
use crate::infra::http::middleware::{log_responses, set_request_context};

pub fn build_api_router(state: RouterState) -> Router<RouterState> {
    let auth_state = state.api.clone();
    let rate_state = state.api.clone();

    Router::new()
        .route(
            "/api/v1/workspace",
            get(handlers::get_workspace).patch(handlers::rename_workspace),
        )
        .route(
            "/api/v1/members",
            get(handlers::list_members).post(handlers::invite_member),
        )
        .route(
            "/api/v1/members/{id}",
            patch(handlers::update_member_role).delete(handlers::remove_member),
        )
        .route(
            "/api/v1/api-keys",
            get(handlers::list_api_keys).post(handlers::issue_api_key),
        )
        .route("/api/v1/api-keys/me", get(handlers::get_api_key_info))
        .route(
            "/api/v1/api-keys/{id}",
            delete(handlers::revoke_api_key),
        )
        .route(
            "/api/v1/api-keys/{id}/rotate",
            post(handlers::rotate_api_key),
        )
        .route(
            "/api/v1/pages",
            get(handlers::list_pages).post(handlers::create_page),
        )
        .route(
            "/api/v1/pages/{page_id}",
            get(handlers::get_page)
                .patch(handlers::update_page)
                .delete(handlers::delete_page),
        )
        .route(
            "/api/v1/pages/{page_id}/posts",
            get(handlers::list_posts).post(handlers::create_post),
        )
        .route(
            "/api/v1/pages/{page_id}/posts/{id}",
            get(handlers::get_post)
                .patch(handlers::update_post)
                .delete(handlers::delete_post),
        )
        .route(
            "/api/v1/pages/{page_id}/posts/{id}/status",
            post(handlers::update_post_status),
        )
        .route(
            "/api/v1/pages/{page_id}/posts/{id}/categories",
            put(handlers::replace_post_categories),
        )
        .route(
            "/api/v1/pages/{page_id}/posts/{id}/authors",
            put(handlers::replace_post_authors),
        )
        .route(
            "/api/v1/pages/{page_id}/posts/{id}/revisions",
            get(handlers::list_post_revisions),
        )
        .route(
            "/api/v1/pages/{page_id}/posts/{id}/revisions/{revision_id}",
            get(handlers::get_post_revision),
        )
        .route(
            "/api/v1/pages/{page_id}/posts/{id}/revisions/{revision_id}/diff",
            get(handlers::diff_post_revision),
        )
        .route(
            "/api/v1/pages/{page_id}/posts/{id}/revisions/{revision_id}/restore",
            post(handlers::restore_post_revision),
        )
        .route(
            "/api/v1/pages/{page_id}/categories",
            get(handlers::list_categories).post(handlers::create_category),
        )
        .route(
            "/api/v1/pages/{page_id}/categories/{id}",
            get(handlers::get_category)
                .patch(handlers::update_category)
                .delete(handlers::delete_category),
        )
        .route(
            "/api/v1/pages/{page_id}/authors",
            get(handlers::list_authors).post(handlers::create_author),
        )
        .route(
            "/api/v1/pages/{page_id}/authors/{id}",
            get(handlers::get_author)
                .patch(handlers::update_author)
                .delete(handlers::delete_author),
        )
        .route(
            "/api/v1/pages/{page_id}/links",
            get(handlers::list_links).post(handlers::create_link),
        )
        .route(
            "/api/v1/pages/{page_id}/links/reorder",
            post(handlers::reorder_links),
        )
        .route(
            "/api/v1/pages/{page_id}/links/{id}",
            patch(handlers::update_link).delete(handlers::delete_link),
        )
        .route(
            "/api/v1/pages/{page_id}/newsletters",
            get(handlers::list_newsletters).post(handlers::create_newsletter),
        )
        .route(
            "/api/v1/pages/{page_id}/newsletters/{newsletter_id}",
            get(handlers::get_newsletter)
                .patch(handlers::update_newsletter)
                .delete(handlers::delete_newsletter),
        )
        .route(
            "/api/v1/pages/{page_id}/newsletters/{newsletter_id}/stats",
            get(handlers::newsletter_stats),
        )
        .route(
            "/api/v1/pages/{page_id}/newsletters/{newsletter_id}/subscribers",
            get(handlers::list_subscribers).post(handlers::add_subscriber),
        )
        .route(
            "/api/v1/pages/{page_id}/newsletters/{newsletter_id}/subscribers/counts",
            get(handlers::subscriber_counts),
        )
        .route(
            "/api/v1/pages/{page_id}/newsletters/{newsletter_id}/subscribers/import",
            post(handlers::import_subscribers),
        )
        .route(
            "/api/v1/pages/{page_id}/newsletters/{newsletter_id}/subscribers/{id}",
            delete(handlers::remove_subscriber),
        )
        .route(
            "/api/v1/pages/{page_id}/newsletters/{newsletter_id}/emails",
            get(handlers::list_emails).post(handlers::create_email),
        )
        .route(
            "/api/v1/pages/{page_id}/newsletters/{newsletter_id}/emails/from-post",
            post(handlers::create_email_from_post),
        )
        .route(
            "/api/v1/pages/{page_id}/newsletters/{newsletter_id}/emails/{id}",
            get(handlers::get_email)
                .patch(handlers::update_email)
                .delete(handlers::delete_email),
        )
        .route(
            "/api/v1/pages/{page_id}/newsletters/{newsletter_id}/emails/{id}/send",
            post(handlers::send_email),
        )
        .route(
            "/api/v1/pages/{page_id}/newsletters/{newsletter_id}/emails/{id}/unschedule",
            post(handlers::unschedule_email),
        )
        .route("/api/v1/audit", get(handlers::list_audit_logs))
        .with_state(state)
        .layer(axum_middleware::from_fn_with_state(
            rate_state,
            middleware::api_rate_limit,
        ))
        .layer(axum_middleware::from_fn_with_state(
            auth_state,
            middleware::api_auth,
        ))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
