//! Read-only views served to readers. Published posts are always rendered
//! from their pinned revision, never from the working draft.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::application::pagination::{CursorPage, PageRequest, TimeCursor};
use crate::application::repos::{
    CategoriesRepo, LinksRepo, PagesRepo, PostListScope, PostQueryFilter, PostsRepo, RepoError,
    RevisionsRepo,
};
use crate::domain::entities::{PageRecord, PostRecord};
use crate::domain::types::PostStatus;

#[derive(Debug, Error)]
pub enum PublicError {
    #[error("page not found")]
    PageNotFound,
    #[error("post not found")]
    PostNotFound,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicPage {
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub language: String,
}

impl From<&PageRecord> for PublicPage {
    fn from(page: &PageRecord) -> Self {
        Self {
            slug: page.slug.clone(),
            title: page.title.clone(),
            description: page.description.clone(),
            language: page.language.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicTerm {
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicAuthor {
    pub slug: String,
    pub name: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub website_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicPost {
    pub slug: String,
    pub title: String,
    pub excerpt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_html: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
    pub categories: Vec<PublicTerm>,
    pub authors: Vec<PublicAuthor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicCategory {
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub published_posts: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicLink {
    pub label: String,
    pub url: String,
}

#[derive(Clone)]
pub struct PublicSiteService {
    pages: Arc<dyn PagesRepo>,
    posts: Arc<dyn PostsRepo>,
    revisions: Arc<dyn RevisionsRepo>,
    categories: Arc<dyn CategoriesRepo>,
    links: Arc<dyn LinksRepo>,
}

impl PublicSiteService {
    pub fn new(
        pages: Arc<dyn PagesRepo>,
        posts: Arc<dyn PostsRepo>,
        revisions: Arc<dyn RevisionsRepo>,
        categories: Arc<dyn CategoriesRepo>,
        links: Arc<dyn LinksRepo>,
    ) -> Self {
        Self {
            pages,
            posts,
            revisions,
            categories,
            links,
        }
    }

    pub async fn page(&self, slug: &str) -> Result<PageRecord, PublicError> {
        self.pages
            .find_page_by_slug(slug)
            .await?
            .ok_or(PublicError::PageNotFound)
    }

    pub async fn list_posts(
        &self,
        page_slug: &str,
        filter: &PostQueryFilter,
        request: PageRequest<TimeCursor>,
    ) -> Result<CursorPage<PublicPost>, PublicError> {
        let page = self.page(page_slug).await?;
        let listed = self
            .posts
            .list_posts(page.id, PostListScope::Public, filter, request)
            .await?;

        let mut items = Vec::with_capacity(listed.items.len());
        for post in listed.items {
            if let Some(view) = self.render(post, false).await? {
                items.push(view);
            }
        }
        Ok(CursorPage::new(items, listed.next_cursor))
    }

    pub async fn get_post(&self, page_slug: &str, post_slug: &str) -> Result<PublicPost, PublicError> {
        let page = self.page(page_slug).await?;
        let post = self
            .posts
            .find_post_by_slug(page.id, post_slug)
            .await?
            .ok_or(PublicError::PostNotFound)?;
        self.render(post, true)
            .await?
            .ok_or(PublicError::PostNotFound)
    }

    pub async fn list_categories(&self, page_slug: &str) -> Result<Vec<PublicCategory>, PublicError> {
        let page = self.page(page_slug).await?;
        let categories = self.categories.list_categories(page.id).await?;
        Ok(categories
            .into_iter()
            .map(|entry| PublicCategory {
                slug: entry.category.slug,
                name: entry.category.name,
                description: entry.category.description,
                published_posts: entry.published_posts,
            })
            .collect())
    }

    pub async fn list_links(&self, page_slug: &str) -> Result<Vec<PublicLink>, PublicError> {
        let page = self.page(page_slug).await?;
        let links = self.links.list_links(page.id, true).await?;
        Ok(links
            .into_iter()
            .map(|link| PublicLink {
                label: link.label,
                url: link.url,
            })
            .collect())
    }

    /// `None` when the post is not published or its revision is missing.
    async fn render(
        &self,
        post: PostRecord,
        with_body: bool,
    ) -> Result<Option<PublicPost>, PublicError> {
        let (Some(revision_id), Some(published_at)) =
            (post.published_revision_id, post.published_at)
        else {
            return Ok(None);
        };
        if post.status != PostStatus::Published {
            return Ok(None);
        }
        let Some(revision) = self.revisions.find_revision(post.id, revision_id).await? else {
            return Ok(None);
        };

        let categories = self
            .posts
            .list_post_categories(post.id)
            .await?
            .into_iter()
            .map(|category| PublicTerm {
                slug: category.slug,
                name: category.name,
            })
            .collect();
        let authors = self
            .posts
            .list_post_authors(post.id)
            .await?
            .into_iter()
            .map(|author| PublicAuthor {
                slug: author.slug,
                name: author.name,
                bio: author.bio,
                avatar_url: author.avatar_url,
                website_url: author.website_url,
            })
            .collect();

        Ok(Some(PublicPost {
            slug: post.slug,
            title: revision.title,
            excerpt: revision.excerpt,
            body_html: with_body.then_some(revision.body_html),
            published_at,
            categories,
            authors,
        }))
    }
}
