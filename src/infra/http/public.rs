use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{ConnectInfo, Extension, Path, Query, State},
    http::{
        HeaderMap, StatusCode,
        header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::{
    application::{
        error::HttpError,
        pagination::{CursorKind, PageRequest, TimeCursor},
        public::{PublicPage, PublicSiteService},
        repos::PostQueryFilter,
        subscriptions::{SubscribeOutcome, SubscriptionService},
        syndication::SyndicationService,
        webhooks::{WebhookEvent, WebhookService},
    },
    infra::db::PostgresRepositories,
};

use super::{
    RouterState, db_health_response,
    middleware::{log_responses, set_request_context},
};

const WEBHOOK_TOKEN_HEADER: &str = "x-webhook-token";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const DEFAULT_PUBLIC_PAGE_SIZE: u32 = 20;
const MAX_PUBLIC_PAGE_SIZE: u32 = 50;

#[derive(Clone)]
pub struct PublicState {
    pub site: Arc<PublicSiteService>,
    pub syndication: Arc<SyndicationService>,
    pub subscriptions: Arc<SubscriptionService>,
    pub webhooks: Arc<WebhookService>,
    /// Shared secret the email provider presents; webhooks are refused when unset.
    pub webhook_token: Option<String>,
    /// Take the client address from the right-most `X-Forwarded-For` hop
    /// instead of the socket peer. Only safe behind a proxy that appends it.
    pub trust_forwarded_for: bool,
    pub db: Arc<PostgresRepositories>,
}

pub fn build_router(state: RouterState) -> Router<RouterState> {
    let site_routes = Router::new()
        .route("/p/{page_slug}", get(page_detail))
        .route("/p/{page_slug}/posts", get(post_index))
        .route("/p/{page_slug}/posts/{post_slug}", get(post_detail))
        .route("/p/{page_slug}/rss.xml", get(rss_feed))
        .route("/p/{page_slug}/links", get(link_index))
        .route("/p/{page_slug}/categories", get(category_index));

    let subscription_routes = Router::new()
        .route(
            "/p/{page_slug}/newsletters/{newsletter_slug}/subscribe",
            post(subscribe),
        )
        .route(
            "/subscriptions/confirm/{token}",
            get(confirm_subscription).post(confirm_subscription),
        )
        .route(
            "/subscriptions/unsubscribe/{token}",
            get(unsubscribe).post(unsubscribe),
        )
        .route("/webhooks/email", post(email_webhook));

    site_routes
        .merge(subscription_routes)
        .route("/_health/db", get(public_health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PostIndexQuery {
    cursor: Option<String>,
    category: Option<String>,
    author: Option<String>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    email: String,
}

#[derive(Debug, Serialize)]
struct SubscribeResponse {
    status: SubscribeOutcome,
}

#[derive(Debug, Serialize)]
struct WebhookResponse {
    outcome: &'static str,
}

async fn page_detail(
    State(state): State<PublicState>,
    Path(page_slug): Path<String>,
) -> Result<Response, HttpError> {
    let page = state.site.page(&page_slug).await?;
    Ok(Json(PublicPage::from(&page)).into_response())
}

async fn post_index(
    State(state): State<PublicState>,
    Path(page_slug): Path<String>,
    Query(query): Query<PostIndexQuery>,
) -> Result<Response, HttpError> {
    let cursor = query
        .cursor
        .as_deref()
        .map(|raw| TimeCursor::decode(CursorKind::Posts, raw))
        .transpose()
        .map_err(|err| {
            HttpError::from_error(
                "infra::http::public::post_index",
                StatusCode::BAD_REQUEST,
                "invalid_cursor",
                "Invalid cursor",
                &err,
            )
        })?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PUBLIC_PAGE_SIZE)
        .clamp(1, MAX_PUBLIC_PAGE_SIZE);
    let filter = PostQueryFilter {
        category: query.category,
        author: query.author,
        search: None,
    };

    let posts = state
        .site
        .list_posts(&page_slug, &filter, PageRequest::new(limit, cursor))
        .await?;
    Ok(Json(posts).into_response())
}

async fn post_detail(
    State(state): State<PublicState>,
    Path((page_slug, post_slug)): Path<(String, String)>,
) -> Result<Response, HttpError> {
    let post = state.site.get_post(&page_slug, &post_slug).await?;
    Ok(Json(post).into_response())
}

async fn link_index(
    State(state): State<PublicState>,
    Path(page_slug): Path<String>,
) -> Result<Response, HttpError> {
    let links = state.site.list_links(&page_slug).await?;
    Ok(Json(links).into_response())
}

async fn category_index(
    State(state): State<PublicState>,
    Path(page_slug): Path<String>,
) -> Result<Response, HttpError> {
    let categories = state.site.list_categories(&page_slug).await?;
    Ok(Json(categories).into_response())
}

async fn rss_feed(
    State(state): State<PublicState>,
    Path(page_slug): Path<String>,
) -> Result<Response, HttpError> {
    let body = state.syndication.rss_feed(&page_slug).await?;
    Ok(xml_response(body, "application/rss+xml; charset=utf-8"))
}

async fn subscribe(
    State(state): State<PublicState>,
    Path((page_slug, newsletter_slug)): Path<(String, String)>,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    headers: HeaderMap,
    Json(payload): Json<SubscribeRequest>,
) -> Result<Response, HttpError> {
    let peer = connect_info.map(|Extension(ConnectInfo(addr))| addr.ip());
    let client_ip = client_ip(peer, &headers, state.trust_forwarded_for);

    let outcome = state
        .subscriptions
        .subscribe(&page_slug, &newsletter_slug, &payload.email, client_ip)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubscribeResponse { status: outcome }),
    )
        .into_response())
}

async fn confirm_subscription(
    State(state): State<PublicState>,
    Path(token): Path<String>,
) -> Result<Response, HttpError> {
    let view = state.subscriptions.confirm(&token).await?;
    Ok(Json(view).into_response())
}

async fn unsubscribe(
    State(state): State<PublicState>,
    Path(token): Path<String>,
) -> Result<Response, HttpError> {
    let view = state.subscriptions.unsubscribe(&token).await?;
    Ok(Json(view).into_response())
}

async fn email_webhook(
    State(state): State<PublicState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    if !webhook_authorized(state.webhook_token.as_deref(), &headers) {
        return Err(HttpError::new(
            "infra::http::public::email_webhook",
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Webhook token required",
            "webhook token missing or mismatched",
        ));
    }

    let event = WebhookEvent::parse(&body)?;
    let record_type = event.record_type();
    let outcome = state.webhooks.handle(event).await?;
    debug!(
        target = "quire::http::webhooks",
        record_type,
        outcome = outcome.as_str(),
        "webhook processed"
    );

    Ok(Json(WebhookResponse {
        outcome: outcome.as_str(),
    })
    .into_response())
}

async fn public_health(State(state): State<PublicState>) -> Response {
    db_health_response(state.db.health_check().await)
}

fn client_ip(
    peer: Option<IpAddr>,
    headers: &HeaderMap,
    trust_forwarded_for: bool,
) -> Option<IpAddr> {
    if !trust_forwarded_for {
        return peer;
    }
    last_forwarded_hop(headers).or(peer)
}

/// The hop appended by the nearest proxy. Earlier entries are client-supplied.
fn last_forwarded_hop(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .next_back()
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.rsplit(',').next())
        .and_then(|hop| hop.trim().parse().ok())
}

fn webhook_authorized(expected: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(expected) = expected else {
        info!(
            target = "quire::http::webhooks",
            "webhook refused: no webhook token configured"
        );
        return false;
    };

    let presented = headers
        .get(WEBHOOK_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| basic_auth_password(headers));

    match presented {
        Some(token) => bool::from(token.as_bytes().ct_eq(expected.as_bytes())),
        None => false,
    }
}

fn basic_auth_password(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = raw.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (_, password) = decoded.split_once(':')?;
    Some(password.to_string())
}

fn xml_response(body: String, content_type: &str) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .header(CACHE_CONTROL, "public, max-age=300")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
