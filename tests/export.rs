mod support;

use sqlx::PgPool;

use quire::application::admin::categories::CategoryCommand;
use quire::application::admin::links::LinkCommand;
use quire::application::admin::posts::CreatePostCommand;
use quire::application::export::{
    ExportError, ExportSources, WorkspaceArchive, encode_archive, export_workspace,
    gather_archive,
};
use quire::domain::api_keys::ApiScope;
use quire::domain::posts::PostAction;
use quire::domain::types::{MemberRole, PostStatus};

use support::{ACTOR, TestApp};

fn sources(app: &TestApp) -> ExportSources {
    let repos = &app.repos;
    ExportSources {
        workspaces: repos.clone(),
        pages: repos.clone(),
        posts: repos.clone(),
        categories: repos.clone(),
        authors: repos.clone(),
        links: repos.clone(),
        newsletters: repos.clone(),
        subscribers: repos.clone(),
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn archive_captures_content_and_confirmed_audience(pool: PgPool) {
    let app = TestApp::new(pool);
    let tenant = app.workspace("Archive Co", &[ApiScope::WorkspaceAdmin]).await;
    let ws = tenant.workspace.id;
    let page = app.page(&tenant, "Garden Diary").await;
    let api = app.api();

    let category = api
        .categories
        .create(
            ACTOR,
            ws,
            page.id,
            CategoryCommand {
                name: "Roses".to_string(),
                slug: None,
                description: None,
                position: None,
            },
        )
        .await
        .expect("category");
    api.links
        .create(
            ACTOR,
            ws,
            page.id,
            LinkCommand {
                label: "Seed shop".to_string(),
                url: "https://seeds.example.com".to_string(),
                visible: true,
            },
        )
        .await
        .expect("link");

    let post = api
        .posts
        .create_post(
            ACTOR,
            ws,
            CreatePostCommand {
                page_id: page.id,
                title: "Pruning in March".to_string(),
                slug: None,
                excerpt: None,
                body_html: "<p>Cut above the bud.</p>".to_string(),
                category_ids: vec![category.id],
                author_ids: Vec::new(),
            },
        )
        .await
        .expect("post");
    api.posts
        .change_status(ACTOR, ws, page.id, post.id, PostAction::Publish)
        .await
        .expect("publish");

    let newsletter = app.newsletter(&tenant, &page, true).await;
    api.subscribers
        .import(
            ACTOR,
            ws,
            page.id,
            newsletter.id,
            vec!["kept@example.com".to_string()],
        )
        .await
        .expect("import");
    app.public()
        .subscriptions
        .subscribe(&page.slug, &newsletter.slug, "pending@example.com", None)
        .await
        .expect("pending subscriber");

    let archive = gather_archive(&sources(&app), &tenant.workspace.slug)
        .await
        .expect("gather");
    assert_eq!(archive.format_version, 1);
    assert_eq!(archive.workspace.name, "Archive Co");
    assert_eq!(archive.members.len(), 1);
    assert_eq!(archive.members[0].role, MemberRole::Owner);

    let page_archive = &archive.pages[0];
    assert_eq!(page_archive.slug, page.slug);
    assert_eq!(page_archive.categories[0].name, "Roses");
    assert_eq!(page_archive.links[0].url, "https://seeds.example.com");
    assert_eq!(page_archive.posts.len(), 1);
    let exported = &page_archive.posts[0];
    assert_eq!(exported.status, PostStatus::Published);
    assert!(exported.published_at.is_some());
    assert_eq!(exported.categories, vec![category.slug.clone()]);
    assert_eq!(
        page_archive.newsletters[0].confirmed_subscribers,
        vec!["kept@example.com".to_string()]
    );

    let encoded = encode_archive(&archive).expect("encode");
    let decoded: WorkspaceArchive = toml::from_str(&encoded).expect("decode");
    assert_eq!(decoded.pages[0].posts[0].title, "Pruning in March");
    assert_eq!(decoded.pages[0].posts[0].published_at, exported.published_at);
}

#[sqlx::test(migrations = "./migrations")]
async fn export_writes_the_archive_file(pool: PgPool) {
    let app = TestApp::new(pool);
    let tenant = app.workspace("Writers", &[ApiScope::WorkspaceAdmin]).await;
    app.page(&tenant, "Notebook").await;

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("writers.toml");
    let archive = export_workspace(&sources(&app), &tenant.workspace.slug, &path)
        .await
        .expect("export");

    let written = std::fs::read_to_string(&path).expect("read archive");
    assert!(written.contains("format_version = 1"));
    assert!(written.contains("Notebook"));
    assert_eq!(archive.pages.len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn unknown_workspace_is_reported(pool: PgPool) {
    let app = TestApp::new(pool);
    let err = gather_archive(&sources(&app), "nobody")
        .await
        .expect_err("missing workspace");
    assert!(matches!(err, ExportError::WorkspaceNotFound(slug) if slug == "nobody"));
}
