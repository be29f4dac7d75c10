use std::sync::Arc;

use crate::application::admin::audit::AdminAuditService;
use crate::application::admin::authors::AdminAuthorService;
use crate::application::admin::categories::AdminCategoryService;
use crate::application::admin::emails::AdminEmailService;
use crate::application::admin::links::AdminLinkService;
use crate::application::admin::newsletters::AdminNewsletterService;
use crate::application::admin::pages::AdminPageService;
use crate::application::admin::posts::AdminPostService;
use crate::application::admin::subscribers::AdminSubscriberService;
use crate::application::admin::workspaces::WorkspaceService;
use crate::application::api_keys::ApiKeyService;
use crate::application::rate_limit::SlidingWindowLimiter;

#[derive(Clone)]
pub struct ApiState {
    pub api_keys: Arc<ApiKeyService>,
    pub workspaces: Arc<WorkspaceService>,
    pub pages: Arc<AdminPageService>,
    pub posts: Arc<AdminPostService>,
    pub categories: Arc<AdminCategoryService>,
    pub authors: Arc<AdminAuthorService>,
    pub links: Arc<AdminLinkService>,
    pub newsletters: Arc<AdminNewsletterService>,
    pub subscribers: Arc<AdminSubscriberService>,
    pub emails: Arc<AdminEmailService>,
    pub audit: Arc<AdminAuditService>,
    /// Keyed by api key id and route.
    pub rate_limiter: SlidingWindowLimiter,
}
