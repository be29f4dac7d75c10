use std::sync::Arc;

use crate::application::admin::audit::AdminAuditService;
use crate::application::content::ContentSanitizer;
use crate::application::repos::{
    AuthorsRepo, CategoriesRepo, JobsRepo, PagesRepo, PostsRepo, RevisionsRepo,
};

#[derive(Clone)]
pub struct AdminPostService {
    pub(crate) pages: Arc<dyn PagesRepo>,
    pub(crate) posts: Arc<dyn PostsRepo>,
    pub(crate) revisions: Arc<dyn RevisionsRepo>,
    pub(crate) categories: Arc<dyn CategoriesRepo>,
    pub(crate) authors: Arc<dyn AuthorsRepo>,
    pub(crate) jobs: Arc<dyn JobsRepo>,
    pub(crate) sanitizer: Arc<ContentSanitizer>,
    pub(crate) audit: AdminAuditService,
}

/// Repositories the post service coordinates.
pub struct PostRepos {
    pub pages: Arc<dyn PagesRepo>,
    pub posts: Arc<dyn PostsRepo>,
    pub revisions: Arc<dyn RevisionsRepo>,
    pub categories: Arc<dyn CategoriesRepo>,
    pub authors: Arc<dyn AuthorsRepo>,
    pub jobs: Arc<dyn JobsRepo>,
}

impl AdminPostService {
    pub fn new(repos: PostRepos, sanitizer: Arc<ContentSanitizer>, audit: AdminAuditService) -> Self {
        Self {
            pages: repos.pages,
            posts: repos.posts,
            revisions: repos.revisions,
            categories: repos.categories,
            authors: repos.authors,
            jobs: repos.jobs,
            sanitizer,
            audit,
        }
    }
}
