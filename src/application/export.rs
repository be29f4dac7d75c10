//! Workspace export to a TOML archive.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{
    AuthorsRepo, CategoriesRepo, LinksRepo, NewslettersRepo, PagesRepo, PostsRepo, RepoError,
    SubscribersRepo, WorkspacesRepo,
};
use crate::domain::entities::{NewsletterRecord, PageRecord};
use crate::domain::types::{MemberRole, PostStatus};

const ARCHIVE_FORMAT_VERSION: u32 = 1;
const SUBSCRIBER_PAGE: u32 = 1_000;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("workspace `{0}` not found")]
    WorkspaceNotFound(String),
    #[error("failed to encode archive: {0}")]
    Encode(String),
    #[error("failed to write archive: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Repositories read during an export.
#[derive(Clone)]
pub struct ExportSources {
    pub workspaces: Arc<dyn WorkspacesRepo>,
    pub pages: Arc<dyn PagesRepo>,
    pub posts: Arc<dyn PostsRepo>,
    pub categories: Arc<dyn CategoriesRepo>,
    pub authors: Arc<dyn AuthorsRepo>,
    pub links: Arc<dyn LinksRepo>,
    pub newsletters: Arc<dyn NewslettersRepo>,
    pub subscribers: Arc<dyn SubscribersRepo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkspaceArchive {
    pub format_version: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub exported_at: OffsetDateTime,
    pub workspace: WorkspaceSnapshot,
    pub members: Vec<MemberSnapshot>,
    pub pages: Vec<PageArchive>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub email: String,
    pub name: String,
    pub role: MemberRole,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PageArchive {
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub custom_domain: Option<String>,
    pub language: String,
    pub categories: Vec<CategorySnapshot>,
    pub authors: Vec<AuthorSnapshot>,
    pub links: Vec<LinkSnapshot>,
    pub posts: Vec<PostSnapshot>,
    pub newsletters: Vec<NewsletterArchive>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CategorySnapshot {
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub position: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorSnapshot {
    pub slug: String,
    pub name: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub website_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LinkSnapshot {
    pub label: String,
    pub url: String,
    pub position: i32,
    pub visible: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostSnapshot {
    pub slug: String,
    pub title: String,
    pub excerpt: String,
    pub body_html: String,
    pub status: PostStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    pub categories: Vec<String>,
    pub authors: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewsletterArchive {
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub sender_name: String,
    pub sender_email: String,
    pub reply_to: Option<String>,
    pub double_opt_in: bool,
    pub confirmed_subscribers: Vec<String>,
}

/// Export a workspace, found by slug, to `path`.
pub async fn export_workspace(
    sources: &ExportSources,
    workspace_slug: &str,
    path: &Path,
) -> Result<WorkspaceArchive, ExportError> {
    let archive = gather_archive(sources, workspace_slug).await?;
    let encoded = encode_archive(&archive)?;
    tokio::fs::write(path, encoded).await?;
    Ok(archive)
}

pub fn encode_archive(archive: &WorkspaceArchive) -> Result<String, ExportError> {
    toml::to_string_pretty(archive).map_err(|err| ExportError::Encode(err.to_string()))
}

pub async fn gather_archive(
    sources: &ExportSources,
    workspace_slug: &str,
) -> Result<WorkspaceArchive, ExportError> {
    let workspace = sources
        .workspaces
        .find_workspace_by_slug(workspace_slug)
        .await?
        .ok_or_else(|| ExportError::WorkspaceNotFound(workspace_slug.to_string()))?;

    let members = sources
        .workspaces
        .list_members(workspace.id)
        .await?
        .into_iter()
        .map(|member| MemberSnapshot {
            email: member.email,
            name: member.name,
            role: member.role,
        })
        .collect();

    let mut pages = Vec::new();
    let mut records = sources.pages.list_all_pages(workspace.id).await?;
    records.sort_by(|a, b| a.slug.cmp(&b.slug));
    for page in records {
        pages.push(gather_page(sources, page).await?);
    }

    Ok(WorkspaceArchive {
        format_version: ARCHIVE_FORMAT_VERSION,
        exported_at: OffsetDateTime::now_utc(),
        workspace: WorkspaceSnapshot {
            slug: workspace.slug,
            name: workspace.name,
        },
        members,
        pages,
    })
}

async fn gather_page(sources: &ExportSources, page: PageRecord) -> Result<PageArchive, ExportError> {
    let categories = sources
        .categories
        .list_categories(page.id)
        .await?
        .into_iter()
        .map(|entry| CategorySnapshot {
            slug: entry.category.slug,
            name: entry.category.name,
            description: entry.category.description,
            position: entry.category.position,
        })
        .collect();

    let authors = sources
        .authors
        .list_authors(page.id)
        .await?
        .into_iter()
        .map(|author| AuthorSnapshot {
            slug: author.slug,
            name: author.name,
            bio: author.bio,
            avatar_url: author.avatar_url,
            website_url: author.website_url,
        })
        .collect();

    let links = sources
        .links
        .list_links(page.id, false)
        .await?
        .into_iter()
        .map(|link| LinkSnapshot {
            label: link.label,
            url: link.url,
            position: link.position,
            visible: link.visible,
        })
        .collect();

    let mut posts = Vec::new();
    let mut post_records = sources.posts.list_all_posts(page.id).await?;
    post_records.sort_by(|a, b| a.slug.cmp(&b.slug));
    for post in post_records {
        let categories = sources
            .posts
            .list_post_categories(post.id)
            .await?
            .into_iter()
            .map(|category| category.slug)
            .collect();
        let authors = sources
            .posts
            .list_post_authors(post.id)
            .await?
            .into_iter()
            .map(|author| author.slug)
            .collect();
        posts.push(PostSnapshot {
            slug: post.slug,
            title: post.title,
            excerpt: post.excerpt,
            body_html: post.body_html,
            status: post.status,
            published_at: post.published_at,
            categories,
            authors,
        });
    }

    let mut newsletters = Vec::new();
    for newsletter in sources.newsletters.list_newsletters(page.id).await? {
        newsletters.push(gather_newsletter(sources, newsletter).await?);
    }

    Ok(PageArchive {
        slug: page.slug,
        title: page.title,
        description: page.description,
        custom_domain: page.custom_domain,
        language: page.language,
        categories,
        authors,
        links,
        posts,
        newsletters,
    })
}

async fn gather_newsletter(
    sources: &ExportSources,
    newsletter: NewsletterRecord,
) -> Result<NewsletterArchive, ExportError> {
    let mut confirmed_subscribers = Vec::new();
    let mut after: Option<Uuid> = None;
    loop {
        let batch = sources
            .subscribers
            .list_confirmed_after(newsletter.id, after, SUBSCRIBER_PAGE)
            .await?;
        let Some(last) = batch.last() else {
            break;
        };
        after = Some(last.id);
        let done = batch.len() < SUBSCRIBER_PAGE as usize;
        confirmed_subscribers.extend(batch.into_iter().map(|subscriber| subscriber.email));
        if done {
            break;
        }
    }
    confirmed_subscribers.sort();

    Ok(NewsletterArchive {
        slug: newsletter.slug,
        name: newsletter.name,
        description: newsletter.description,
        sender_name: newsletter.sender_name,
        sender_email: newsletter.sender_email,
        reply_to: newsletter.reply_to,
        double_opt_in: newsletter.double_opt_in,
        confirmed_subscribers,
    })
}
