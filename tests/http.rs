mod support;

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use sqlx::PgPool;

use quire::application::admin::workspaces::{InviteMemberCommand, WorkspaceError};
use quire::domain::api_keys::ApiScope;
use quire::domain::types::MemberRole;

use support::{ACTOR, TestApp, TestLimits, WEBHOOK_TOKEN, empty_request, json_request};

fn error_code(body: &serde_json::Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}

fn webhook_request(token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/email")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header("x-webhook-token", token);
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

fn subscribe_request(uri: &str, email: &str, peer: [u8; 4], forwarded: &str) -> Request<Body> {
    let mut request = json_request("POST", uri, None, json!({ "email": email }));
    request
        .headers_mut()
        .insert("x-forwarded-for", forwarded.parse().expect("header"));
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((peer, 40_000))));
    request
}

#[sqlx::test(migrations = "./migrations")]
async fn admin_api_requires_a_valid_key(pool: PgPool) {
    let app = TestApp::new(pool);
    let tenant = app.workspace("Keys", &[ApiScope::PageRead]).await;

    let (response, body) = app.send(empty_request("GET", "/api/v1/pages", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "unauthorized");

    let (response, _) = app
        .send(empty_request("GET", "/api/v1/pages", Some("Bearer qk_bogus")))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (response, body) = app
        .send(empty_request("GET", "/api/v1/pages", Some(&tenant.bearer())))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body["items"], json!([]));

    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/api-keys/me")
        .header("x-api-key", &tenant.token)
        .body(Body::empty())
        .expect("request");
    let (response, body) = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body["id"], json!(tenant.principal.key_id));
}

#[sqlx::test(migrations = "./migrations")]
async fn missing_scope_is_forbidden_with_a_hint(pool: PgPool) {
    let app = TestApp::new(pool);
    let tenant = app.workspace("Readers", &[ApiScope::PageRead]).await;

    let (response, body) = app
        .send(json_request(
            "POST",
            "/api/v1/pages",
            Some(&tenant.bearer()),
            json!({ "title": "Not Allowed" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "forbidden");
    assert_eq!(body["error"]["hint"], json!("page_write"));

    let (response, _) = app
        .send(empty_request("GET", "/api/v1/api-keys", Some(&tenant.bearer())))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[sqlx::test(migrations = "./migrations")]
async fn revoked_keys_are_refused(pool: PgPool) {
    let app = TestApp::new(pool);
    let admin = app.workspace("Revocations", &[ApiScope::WorkspaceAdmin]).await;
    let token = app.issue_key(admin.workspace.id, &[ApiScope::PostRead]).await;
    let principal = app
        .api()
        .api_keys
        .authenticate(&token)
        .await
        .expect("authenticate");

    let (response, _) = app
        .send(empty_request(
            "DELETE",
            &format!("/api/v1/api-keys/{}", principal.key_id),
            Some(&admin.bearer()),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let (response, body) = app
        .send(empty_request(
            "GET",
            "/api/v1/api-keys/me",
            Some(&format!("Bearer {token}")),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "revoked");

    let (response, _) = app
        .send(empty_request(
            "DELETE",
            &format!("/api/v1/api-keys/{}", principal.key_id),
            Some(&admin.bearer()),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "./migrations")]
async fn api_requests_are_rate_limited_per_route(pool: PgPool) {
    let app = TestApp::with_limits(
        pool,
        TestLimits {
            api_max_requests: 2,
            ..TestLimits::default()
        },
    );
    let tenant = app.workspace("Busy", &[ApiScope::PageRead]).await;
    let auth = tenant.bearer();

    for remaining in ["1", "0"] {
        let (response, _) = app
            .send(empty_request("GET", "/api/v1/pages", Some(&auth)))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|value| value.to_str().ok()),
            Some(remaining)
        );
    }

    let (response, body) = app
        .send(empty_request("GET", "/api/v1/pages", Some(&auth)))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error_code(&body), "rate_limited");
    let retry_after: u64 = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .expect("retry-after header");
    assert!((1..=60).contains(&retry_after));

    let (response, _) = app
        .send(empty_request("GET", "/api/v1/api-keys/me", Some(&auth)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[sqlx::test(migrations = "./migrations")]
async fn published_posts_reach_the_public_site(pool: PgPool) {
    let app = TestApp::new(pool);
    let tenant = app
        .workspace("Travel", &[ApiScope::PageWrite, ApiScope::PostWrite])
        .await;
    let auth = tenant.bearer();

    let (response, page) = app
        .send(json_request(
            "POST",
            "/api/v1/pages",
            Some(&auth),
            json!({ "title": "Travel Log", "description": "Notes from the road" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let page_id = page["id"].as_str().expect("page id").to_string();
    let page_slug = page["slug"].as_str().expect("page slug").to_string();

    let (response, post) = app
        .send(json_request(
            "POST",
            &format!("/api/v1/pages/{page_id}/posts"),
            Some(&auth),
            json!({ "title": "Lisbon in Spring", "body_html": "<p>Trams & tiles</p>" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(post["status"], json!("draft"));
    let post_id = post["id"].as_str().expect("post id").to_string();
    let post_slug = post["slug"].as_str().expect("post slug").to_string();

    let (response, _) = app
        .send(empty_request(
            "GET",
            &format!("/p/{page_slug}/posts/{post_slug}"),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let status_uri = format!("/api/v1/pages/{page_id}/posts/{post_id}/status");
    let (response, published) = app
        .send(json_request(
            "POST",
            &status_uri,
            Some(&auth),
            json!({ "action": "publish" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(published["status"], json!("published"));

    let (response, body) = app
        .send(json_request(
            "POST",
            &status_uri,
            Some(&auth),
            json!({ "action": "unschedule" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "invalid_transition");

    let (response, site) = app
        .send(empty_request("GET", &format!("/p/{page_slug}"), None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(site["title"], json!("Travel Log"));

    let (response, listing) = app
        .send(empty_request("GET", &format!("/p/{page_slug}/posts"), None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(listing["items"][0]["slug"], json!(post_slug));
    assert!(listing["items"][0].get("body_html").is_none());

    let (response, detail) = app
        .send(empty_request(
            "GET",
            &format!("/p/{page_slug}/posts/{post_slug}"),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(detail["title"], json!("Lisbon in Spring"));
    assert!(
        detail["body_html"]
            .as_str()
            .is_some_and(|body| body.contains("Trams"))
    );

    let (response, feed) = app
        .send(empty_request("GET", &format!("/p/{page_slug}/rss.xml"), None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/rss+xml"))
    );
    let feed = feed.as_str().expect("xml body");
    assert!(feed.contains("<title>Lisbon in Spring</title>"));
    assert!(feed.contains(&format!(
        "<link>{}/p/{page_slug}/posts/{post_slug}</link>",
        support::PUBLIC_BASE_URL
    )));

    let (response, body) = app
        .send(empty_request(
            "GET",
            &format!("/p/{page_slug}/posts?cursor=garbage"),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "invalid_cursor");

    let (response, _) = app.send(empty_request("GET", "/p/nowhere", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "./migrations")]
async fn workspaces_cannot_see_each_other(pool: PgPool) {
    let app = TestApp::new(pool);
    let alpha = app.workspace("Alpha", &[ApiScope::WorkspaceAdmin]).await;
    let beta = app.workspace("Beta", &[ApiScope::WorkspaceAdmin]).await;
    let page = app.page(&alpha, "Alpha Journal").await;

    let (response, _) = app
        .send(empty_request(
            "GET",
            &format!("/api/v1/pages/{}", page.id),
            Some(&alpha.bearer()),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let (response, body) = app
        .send(empty_request(
            "GET",
            &format!("/api/v1/pages/{}", page.id),
            Some(&beta.bearer()),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "not_found");

    let (response, _) = app
        .send(json_request(
            "POST",
            &format!("/api/v1/pages/{}/posts", page.id),
            Some(&beta.bearer()),
            json!({ "title": "Intruder", "body_html": "<p>x</p>" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let (_, listing) = app
        .send(empty_request("GET", "/api/v1/pages", Some(&beta.bearer())))
        .await;
    assert_eq!(listing["items"], json!([]));
}

#[sqlx::test(migrations = "./migrations")]
async fn public_subscription_endpoints(pool: PgPool) {
    let app = TestApp::new(pool);
    let tenant = app.workspace("Letters", &[ApiScope::WorkspaceAdmin]).await;
    let page = app.page(&tenant, "Letters").await;
    let newsletter = app.newsletter(&tenant, &page, true).await;
    let uri = format!("/p/{}/newsletters/{}/subscribe", page.slug, newsletter.slug);

    let mut request = json_request("POST", &uri, None, json!({ "email": "fan@example.com" }));
    request
        .headers_mut()
        .insert("x-forwarded-for", "198.51.100.4".parse().expect("header"));
    let (response, body) = app.send(request).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body, json!({ "status": "confirmation_sent" }));

    let (response, body) = app
        .send(json_request("POST", &uri, None, json!({ "email": "nope" })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "invalid_email");

    let mail = app.provider.sent_to("fan@example.com").await;
    let link = mail[0]
        .html_body
        .split('"')
        .find(|part| part.contains("/subscriptions/confirm/"))
        .expect("confirm link")
        .to_string();
    let path = link.trim_start_matches(support::PUBLIC_BASE_URL);

    let (response, body) = app.send(empty_request("GET", path, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body["status"], json!("confirmed"));
    assert_eq!(body["email"], json!("fan@example.com"));

    let (response, _) = app
        .send(empty_request("GET", "/subscriptions/confirm/unknown", None))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "./migrations")]
async fn forged_forwarded_for_does_not_reset_the_subscribe_limit(pool: PgPool) {
    let app = TestApp::with_limits(
        pool,
        TestLimits {
            subscribe_per_ip: 2,
            ..TestLimits::default()
        },
    );
    let tenant = app.workspace("Letters", &[ApiScope::WorkspaceAdmin]).await;
    let page = app.page(&tenant, "Letters").await;
    let newsletter = app.newsletter(&tenant, &page, false).await;
    let uri = format!("/p/{}/newsletters/{}/subscribe", page.slug, newsletter.slug);
    let peer = [198, 51, 100, 9];

    for (n, forged) in ["203.0.113.1", "203.0.113.2"].into_iter().enumerate() {
        let email = format!("reader{n}@example.com");
        let (response, _) = app.send(subscribe_request(&uri, &email, peer, forged)).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let (response, body) = app
        .send(subscribe_request(&uri, "reader9@example.com", peer, "203.0.113.3"))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error_code(&body), "rate_limited");

    // Another peer has its own budget.
    let (response, _) = app
        .send(subscribe_request(&uri, "other@example.com", [192, 0, 2, 1], "203.0.113.3"))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[sqlx::test(migrations = "./migrations")]
async fn trusted_proxy_hop_identifies_the_client(pool: PgPool) {
    let app = TestApp::with_limits(
        pool,
        TestLimits {
            subscribe_per_ip: 1,
            trust_forwarded_for: true,
            ..TestLimits::default()
        },
    );
    let tenant = app.workspace("Letters", &[ApiScope::WorkspaceAdmin]).await;
    let page = app.page(&tenant, "Letters").await;
    let newsletter = app.newsletter(&tenant, &page, false).await;
    let uri = format!("/p/{}/newsletters/{}/subscribe", page.slug, newsletter.slug);
    let proxy = [10, 0, 0, 2];

    let (response, _) = app
        .send(subscribe_request(&uri, "a@example.com", proxy, "1.1.1.1, 203.0.113.5"))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // Prepending entries does not change the hop the proxy appended.
    let (response, _) = app
        .send(subscribe_request(&uri, "b@example.com", proxy, "2.2.2.2, 203.0.113.5"))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let (response, _) = app
        .send(subscribe_request(&uri, "c@example.com", proxy, "203.0.113.6"))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[sqlx::test(migrations = "./migrations")]
async fn workspace_keeps_at_least_one_owner(pool: PgPool) {
    let app = TestApp::new(pool);
    let tenant = app.workspace("Owners", &[ApiScope::WorkspaceAdmin]).await;
    let auth = tenant.bearer();
    let members = app
        .api()
        .workspaces
        .list_members(tenant.workspace.id)
        .await
        .expect("members");
    let founder = &members[0];
    assert_eq!(founder.role, MemberRole::Owner);
    let founder_uri = format!("/api/v1/members/{}", founder.id);

    let (response, body) = app
        .send(json_request("PATCH", &founder_uri, Some(&auth), json!({ "role": "admin" })))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "last_owner");

    let (response, body) = app
        .send(empty_request("DELETE", &founder_uri, Some(&auth)))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "last_owner");

    let (response, second) = app
        .send(json_request(
            "POST",
            "/api/v1/members",
            Some(&auth),
            json!({ "email": "second@owners.test", "name": "Second", "role": "owner" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let (response, body) = app
        .send(json_request("PATCH", &founder_uri, Some(&auth), json!({ "role": "admin" })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body["role"], json!("admin"));

    let second_uri = format!("/api/v1/members/{}", second["id"].as_str().expect("id"));
    let (response, _) = app
        .send(empty_request("DELETE", &second_uri, Some(&auth)))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Non-owners can always go.
    let (response, _) = app
        .send(empty_request("DELETE", &founder_uri, Some(&auth)))
        .await;
    assert!(response.status().is_success());
}

#[sqlx::test(migrations = "./migrations")]
async fn concurrent_owner_demotions_leave_one_owner(pool: PgPool) {
    let app = TestApp::new(pool);
    let tenant = app.workspace("Race", &[ApiScope::WorkspaceAdmin]).await;
    let workspaces = &app.api().workspaces;
    let ws = tenant.workspace.id;
    workspaces
        .invite_member(
            ACTOR,
            ws,
            InviteMemberCommand {
                email: "co-owner@race.test".to_string(),
                name: "Co-owner".to_string(),
                role: MemberRole::Owner,
            },
        )
        .await
        .expect("second owner");
    let owners = workspaces.list_members(ws).await.expect("members");
    assert_eq!(owners.len(), 2);

    let (left, right) = tokio::join!(
        workspaces.update_member_role(ACTOR, ws, owners[0].id, MemberRole::Editor),
        workspaces.remove_member(ACTOR, ws, owners[1].id),
    );
    let refused = [left.is_err(), right.is_err()];
    assert_eq!(refused.iter().filter(|failed| **failed).count(), 1);
    if let Err(err) = left {
        assert!(matches!(err, WorkspaceError::LastOwner));
    }
    if let Err(err) = right {
        assert!(matches!(err, WorkspaceError::LastOwner));
    }

    let remaining = workspaces.list_members(ws).await.expect("members");
    let owner_count = remaining
        .iter()
        .filter(|member| member.role == MemberRole::Owner)
        .count();
    assert_eq!(owner_count, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn webhook_endpoint_requires_the_shared_token(pool: PgPool) {
    let app = TestApp::new(pool);
    let payload = r#"{"RecordType":"Open","MessageID":"msg-404"}"#;

    let (response, _) = app.send(webhook_request(None, payload)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (response, _) = app.send(webhook_request(Some("wrong"), payload)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (response, body) = app
        .send(webhook_request(Some(WEBHOOK_TOKEN), payload))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body, json!({ "outcome": "ignored" }));

    let basic = format!("Basic {}", STANDARD.encode(format!("provider:{WEBHOOK_TOKEN}")));
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/email")
        .header(header::AUTHORIZATION, basic)
        .body(Body::from(payload))
        .expect("request");
    let (response, _) = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let (response, body) = app
        .send(webhook_request(Some(WEBHOOK_TOKEN), "{ not json"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "malformed_payload");
}

#[sqlx::test(migrations = "./migrations")]
async fn database_health_endpoint(pool: PgPool) {
    let app = TestApp::new(pool);
    let (response, _) = app.send(empty_request("GET", "/_health/db", None)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
