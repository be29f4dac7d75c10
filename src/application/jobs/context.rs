use std::sync::Arc;

use apalis::prelude::Error as ApalisError;

use crate::application::admin::posts::AdminPostService;
use crate::application::delivery::NewsletterDeliveryService;

/// Shared context passed to queue workers.
#[derive(Clone)]
pub struct JobWorkerContext {
    pub posts: Arc<AdminPostService>,
    pub delivery: Arc<NewsletterDeliveryService>,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convert any error into an [`ApalisError::Failed`].
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}
