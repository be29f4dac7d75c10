mod support;

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};

use quire::application::api_keys::{ApiAuthError, ApiKeyError, IssueApiKeyCommand};
use quire::domain::api_keys::{ApiKeyStatus, ApiScope};

use support::{ACTOR, TestApp};

fn command(workspace_id: uuid::Uuid, scopes: Vec<ApiScope>) -> IssueApiKeyCommand {
    IssueApiKeyCommand {
        workspace_id,
        name: "deploy".to_string(),
        description: Some("CI publishing".to_string()),
        scopes,
        expires_at: None,
        created_by: ACTOR.to_string(),
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn issue_validates_scopes_and_name(pool: PgPool) {
    let app = TestApp::new(pool);
    let tenant = app.workspace("Keys Inc", &[ApiScope::WorkspaceAdmin]).await;
    let service = &app.api().api_keys;

    let err = service
        .issue(command(tenant.workspace.id, Vec::new()))
        .await
        .expect_err("no scopes");
    assert!(matches!(err, ApiKeyError::InvalidScopes));

    let mut blank = command(tenant.workspace.id, vec![ApiScope::PostRead]);
    blank.name = "   ".to_string();
    let err = service.issue(blank).await.expect_err("blank name");
    assert!(matches!(err, ApiKeyError::ConstraintViolation("name")));

    let issued = service
        .issue(command(
            tenant.workspace.id,
            vec![ApiScope::PostWrite, ApiScope::PostRead, ApiScope::PostWrite],
        ))
        .await
        .expect("issue");
    assert_eq!(issued.record.scopes, vec![ApiScope::PostRead, ApiScope::PostWrite]);
    assert!(issued.token.starts_with("qk_"));

    let principal = service.authenticate(&issued.token).await.expect("auth");
    assert_eq!(principal.workspace_id, tenant.workspace.id);
    assert!(principal.requires(ApiScope::PostRead).is_ok());
    assert_eq!(
        principal.requires(ApiScope::NewsletterWrite),
        Err(ApiAuthError::Forbidden(ApiScope::NewsletterWrite))
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn rotation_replaces_the_secret(pool: PgPool) {
    let app = TestApp::new(pool);
    let tenant = app.workspace("Rotators", &[ApiScope::WorkspaceAdmin]).await;
    let service = &app.api().api_keys;

    let issued = service
        .issue(command(tenant.workspace.id, vec![ApiScope::PageRead]))
        .await
        .expect("issue");
    let rotated = service
        .rotate(tenant.workspace.id, issued.record.id, ACTOR)
        .await
        .expect("rotate");
    assert_eq!(rotated.record.id, issued.record.id);
    assert_ne!(rotated.token, issued.token);

    assert!(matches!(
        service.authenticate(&issued.token).await,
        Err(ApiAuthError::Invalid)
    ));
    service
        .authenticate(&rotated.token)
        .await
        .expect("rotated token works");

    service
        .revoke(tenant.workspace.id, issued.record.id, ACTOR)
        .await
        .expect("revoke");
    assert!(matches!(
        service.authenticate(&rotated.token).await,
        Err(ApiAuthError::Revoked)
    ));
    let err = service
        .rotate(tenant.workspace.id, issued.record.id, ACTOR)
        .await
        .expect_err("rotate revoked");
    assert!(matches!(err, ApiKeyError::ConstraintViolation("revoked")));
    let err = service
        .revoke(tenant.workspace.id, issued.record.id, ACTOR)
        .await
        .expect_err("revoke twice");
    assert!(matches!(err, ApiKeyError::NotFound));
}

#[sqlx::test(migrations = "./migrations")]
async fn expired_keys_are_refused_and_swept(pool: PgPool) {
    let app = TestApp::new(pool);
    let tenant = app.workspace("Expiry", &[ApiScope::WorkspaceAdmin]).await;
    let service = &app.api().api_keys;

    let mut lapsed = command(tenant.workspace.id, vec![ApiScope::PageRead]);
    lapsed.expires_at = Some(OffsetDateTime::now_utc() - Duration::minutes(1));
    let issued = service.issue(lapsed).await.expect("issue");

    assert!(matches!(
        service.authenticate(&issued.token).await,
        Err(ApiAuthError::Expired)
    ));

    let swept = service
        .expire_due(OffsetDateTime::now_utc())
        .await
        .expect("sweep");
    assert_eq!(swept, 1);
    let record = service
        .get(tenant.workspace.id, issued.record.id)
        .await
        .expect("record");
    assert_eq!(record.status, ApiKeyStatus::Expired);
    assert!(matches!(
        service.authenticate(&issued.token).await,
        Err(ApiAuthError::Expired)
    ));

    // The owner's own key is untouched.
    service
        .authenticate(&tenant.token)
        .await
        .expect("active key survives the sweep");
}

#[sqlx::test(migrations = "./migrations")]
async fn keys_are_scoped_to_their_workspace(pool: PgPool) {
    let app = TestApp::new(pool);
    let alpha = app.workspace("Alpha Keys", &[ApiScope::WorkspaceAdmin]).await;
    let beta = app.workspace("Beta Keys", &[ApiScope::WorkspaceAdmin]).await;
    let service = &app.api().api_keys;

    let err = service
        .get(beta.workspace.id, alpha.principal.key_id)
        .await
        .expect_err("foreign key");
    assert!(matches!(err, ApiKeyError::NotFound));
    let err = service
        .revoke(beta.workspace.id, alpha.principal.key_id, ACTOR)
        .await
        .expect_err("foreign revoke");
    assert!(matches!(err, ApiKeyError::NotFound));

    let listed = service.list(alpha.workspace.id).await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, alpha.principal.key_id);
}
