#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response};
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tower::ServiceExt;
use uuid::Uuid;

use quire::application::admin::audit::AdminAuditService;
use quire::application::admin::authors::AdminAuthorService;
use quire::application::admin::categories::AdminCategoryService;
use quire::application::admin::emails::{AdminEmailService, EmailRepos};
use quire::application::admin::links::AdminLinkService;
use quire::application::admin::newsletters::{AdminNewsletterService, NewsletterCommand};
use quire::application::admin::pages::{AdminPageService, CreatePageCommand};
use quire::application::admin::posts::{AdminPostService, PostRepos};
use quire::application::admin::subscribers::AdminSubscriberService;
use quire::application::admin::workspaces::{InviteMemberCommand, WorkspaceService};
use quire::application::api_keys::{ApiKeyService, ApiPrincipal, IssueApiKeyCommand};
use quire::application::content::ContentSanitizer;
use quire::application::delivery::{DeliverySettings, NewsletterDeliveryService};
use quire::application::mailer::{EmailProvider, OutboundMessage, ProviderError, ProviderReceipt};
use quire::application::public::PublicSiteService;
use quire::application::rate_limit::SlidingWindowLimiter;
use quire::application::repos::{JobsRepo, RepoError};
use quire::application::subscriptions::{SubscribeLimits, SubscriptionService};
use quire::application::syndication::SyndicationService;
use quire::application::webhooks::WebhookService;
use quire::domain::api_keys::ApiScope;
use quire::domain::entities::{NewsletterRecord, PageRecord, WorkspaceRecord};
use quire::domain::types::{JobType, MemberRole};
use quire::infra::db::PostgresRepositories;
use quire::infra::http::{ApiState, PublicState, RouterState, build_app};

pub const ACTOR: &str = "tests";
pub const WEBHOOK_TOKEN: &str = "hook-secret";
pub const PUBLIC_BASE_URL: &str = "https://quire.test";

#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub run_at: Option<OffsetDateTime>,
}

/// Keeps enqueued jobs in memory so tests can run them by hand.
#[derive(Default)]
pub struct RecordingJobsRepo {
    jobs: Mutex<Vec<QueuedJob>>,
    unavailable: AtomicBool,
}

impl RecordingJobsRepo {
    pub fn fail_enqueue(&self, fail: bool) {
        self.unavailable.store(fail, Ordering::SeqCst);
    }

    pub async fn queued(&self) -> Vec<QueuedJob> {
        self.jobs.lock().await.clone()
    }

    pub async fn queued_of(&self, job_type: JobType) -> Vec<QueuedJob> {
        self.jobs
            .lock()
            .await
            .iter()
            .filter(|job| job.job_type == job_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl JobsRepo for RecordingJobsRepo {
    async fn enqueue_job(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        run_at: Option<OffsetDateTime>,
        _max_attempts: i32,
        _priority: i32,
    ) -> Result<String, RepoError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepoError::from_persistence("queue unavailable"));
        }
        self.jobs.lock().await.push(QueuedJob {
            job_type,
            payload,
            run_at,
        });
        Ok(Uuid::new_v4().to_string())
    }
}

/// Accepts every message unless told otherwise and remembers what was sent.
#[derive(Default)]
pub struct RecordingProvider {
    sent: Mutex<Vec<OutboundMessage>>,
    next_id: AtomicU64,
    fail_batches: AtomicBool,
    rejected: Mutex<HashSet<String>>,
}

impl RecordingProvider {
    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_to(&self, address: &str) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|message| message.to == address)
            .cloned()
            .collect()
    }

    pub fn fail_batches(&self, fail: bool) {
        self.fail_batches.store(fail, Ordering::SeqCst);
    }

    pub async fn reject(&self, address: &str) {
        self.rejected.lock().await.insert(address.to_string());
    }

    async fn receipt(&self, message: &OutboundMessage) -> ProviderReceipt {
        if self.rejected.lock().await.contains(&message.to) {
            return ProviderReceipt {
                to: message.to.clone(),
                message_id: None,
                error_code: 406,
                message: "Inactive recipient".to_string(),
            };
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().await.push(message.clone());
        ProviderReceipt {
            to: message.to.clone(),
            message_id: Some(format!("msg-{id}")),
            error_code: 0,
            message: "OK".to_string(),
        }
    }
}

#[async_trait]
impl EmailProvider for RecordingProvider {
    async fn send(&self, message: &OutboundMessage) -> Result<ProviderReceipt, ProviderError> {
        Ok(self.receipt(message).await)
    }

    async fn send_batch(
        &self,
        messages: &[OutboundMessage],
    ) -> Result<Vec<ProviderReceipt>, ProviderError> {
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected {
                status: 500,
                message: "provider unavailable".to_string(),
            });
        }
        let mut receipts = Vec::with_capacity(messages.len());
        for message in messages {
            receipts.push(self.receipt(message).await);
        }
        Ok(receipts)
    }
}

pub struct TestLimits {
    pub api_max_requests: u32,
    pub subscribe_per_ip: u32,
    pub subscribe_per_email: u32,
    pub batch_size: usize,
    pub trust_forwarded_for: bool,
}

impl Default for TestLimits {
    fn default() -> Self {
        Self {
            api_max_requests: 1_000,
            subscribe_per_ip: 100,
            subscribe_per_email: 100,
            batch_size: 2,
            trust_forwarded_for: false,
        }
    }
}

/// Every service wired over one database, with fake job queue and provider.
pub struct TestApp {
    pub repos: Arc<PostgresRepositories>,
    pub jobs: Arc<RecordingJobsRepo>,
    pub provider: Arc<RecordingProvider>,
    pub delivery: Arc<NewsletterDeliveryService>,
    pub state: RouterState,
}

impl TestApp {
    pub fn new(pool: PgPool) -> Self {
        Self::with_limits(pool, TestLimits::default())
    }

    pub fn with_limits(pool: PgPool, limits: TestLimits) -> Self {
        let repos = Arc::new(PostgresRepositories::new(pool));
        let jobs = Arc::new(RecordingJobsRepo::default());
        let provider = Arc::new(RecordingProvider::default());
        let provider_dyn: Arc<dyn EmailProvider> = provider.clone();
        let jobs_dyn: Arc<dyn JobsRepo> = jobs.clone();
        let sanitizer = Arc::new(ContentSanitizer::new());
        let audit = AdminAuditService::new(repos.clone());

        let delivery = Arc::new(NewsletterDeliveryService::new(
            repos.clone(),
            repos.clone(),
            repos.clone(),
            provider_dyn,
            DeliverySettings::new(limits.batch_size, PUBLIC_BASE_URL),
        ));

        let posts = Arc::new(AdminPostService::new(
            PostRepos {
                pages: repos.clone(),
                posts: repos.clone(),
                revisions: repos.clone(),
                categories: repos.clone(),
                authors: repos.clone(),
                jobs: jobs_dyn.clone(),
            },
            sanitizer.clone(),
            audit.clone(),
        ));

        let api = ApiState {
            api_keys: Arc::new(ApiKeyService::new(repos.clone()).with_audit(audit.clone())),
            workspaces: Arc::new(WorkspaceService::new(repos.clone(), audit.clone())),
            pages: Arc::new(AdminPageService::new(repos.clone(), audit.clone())),
            posts,
            categories: Arc::new(AdminCategoryService::new(
                repos.clone(),
                repos.clone(),
                audit.clone(),
            )),
            authors: Arc::new(AdminAuthorService::new(
                repos.clone(),
                repos.clone(),
                repos.clone(),
                audit.clone(),
            )),
            links: Arc::new(AdminLinkService::new(
                repos.clone(),
                repos.clone(),
                audit.clone(),
            )),
            newsletters: Arc::new(AdminNewsletterService::new(
                repos.clone(),
                repos.clone(),
                repos.clone(),
                audit.clone(),
            )),
            subscribers: Arc::new(AdminSubscriberService::new(
                repos.clone(),
                repos.clone(),
                repos.clone(),
                audit.clone(),
            )),
            emails: Arc::new(AdminEmailService::new(
                EmailRepos {
                    pages: repos.clone(),
                    newsletters: repos.clone(),
                    posts: repos.clone(),
                    revisions: repos.clone(),
                    subscribers: repos.clone(),
                    emails: repos.clone(),
                    jobs: jobs_dyn,
                },
                sanitizer,
                audit.clone(),
            )),
            audit: Arc::new(audit),
            rate_limiter: SlidingWindowLimiter::new(
                Duration::from_secs(60),
                limits.api_max_requests,
            ),
        };

        let site = PublicSiteService::new(
            repos.clone(),
            repos.clone(),
            repos.clone(),
            repos.clone(),
            repos.clone(),
        );
        let window = Duration::from_secs(3600);
        let public = PublicState {
            syndication: Arc::new(SyndicationService::new(site.clone(), PUBLIC_BASE_URL)),
            site: Arc::new(site),
            subscriptions: Arc::new(SubscriptionService::new(
                repos.clone(),
                repos.clone(),
                repos.clone(),
                delivery.clone(),
                SubscribeLimits {
                    by_ip: SlidingWindowLimiter::new(window, limits.subscribe_per_ip),
                    by_email: SlidingWindowLimiter::new(window, limits.subscribe_per_email),
                },
            )),
            webhooks: Arc::new(WebhookService::new(repos.clone(), repos.clone())),
            webhook_token: Some(WEBHOOK_TOKEN.to_string()),
            trust_forwarded_for: limits.trust_forwarded_for,
            db: repos.clone(),
        };

        Self {
            repos,
            jobs,
            provider,
            delivery,
            state: RouterState { public, api },
        }
    }

    pub fn api(&self) -> &ApiState {
        &self.state.api
    }

    pub fn public(&self) -> &PublicState {
        &self.state.public
    }

    pub fn router(&self) -> Router {
        build_app(self.state.clone())
    }

    /// Creates a workspace with an owner and a key holding `scopes`.
    pub async fn workspace(&self, name: &str, scopes: &[ApiScope]) -> Tenant {
        let workspace = self
            .api()
            .workspaces
            .create_workspace(ACTOR, name)
            .await
            .expect("create workspace");
        self.api()
            .workspaces
            .invite_member(
                ACTOR,
                workspace.id,
                InviteMemberCommand {
                    email: format!("owner@{}.test", workspace.slug),
                    name: "Owner".to_string(),
                    role: MemberRole::Owner,
                },
            )
            .await
            .expect("invite owner");
        let token = self.issue_key(workspace.id, scopes).await;
        let principal = self
            .api()
            .api_keys
            .authenticate(&token)
            .await
            .expect("authenticate fresh key");

        Tenant {
            workspace,
            token,
            principal,
        }
    }

    pub async fn issue_key(&self, workspace_id: Uuid, scopes: &[ApiScope]) -> String {
        self.api()
            .api_keys
            .issue(IssueApiKeyCommand {
                workspace_id,
                name: "test key".to_string(),
                description: None,
                scopes: scopes.to_vec(),
                expires_at: None,
                created_by: ACTOR.to_string(),
            })
            .await
            .expect("issue key")
            .token
    }

    pub async fn page(&self, tenant: &Tenant, title: &str) -> PageRecord {
        self.api()
            .pages
            .create_page(
                ACTOR,
                tenant.workspace.id,
                CreatePageCommand {
                    title: title.to_string(),
                    slug: None,
                    description: Some(format!("{title} description")),
                    custom_domain: None,
                    language: None,
                },
            )
            .await
            .expect("create page")
    }

    pub async fn newsletter(
        &self,
        tenant: &Tenant,
        page: &PageRecord,
        double_opt_in: bool,
    ) -> NewsletterRecord {
        self.api()
            .newsletters
            .create(
                ACTOR,
                tenant.workspace.id,
                page.id,
                NewsletterCommand {
                    name: "Weekly Notes".to_string(),
                    slug: None,
                    description: None,
                    sender_name: "Quire Weekly".to_string(),
                    sender_email: "weekly@quire.test".to_string(),
                    reply_to: None,
                    double_opt_in,
                },
            )
            .await
            .expect("create newsletter")
    }

    pub async fn send(&self, request: Request<Body>) -> (Response<Body>, serde_json::Value) {
        let response = self
            .router()
            .oneshot(request)
            .await
            .expect("router response");
        let (parts, body) = response.into_parts();
        let bytes = to_bytes(body, usize::MAX).await.expect("read body");
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (Response::from_parts(parts, Body::empty()), json)
    }
}

pub struct Tenant {
    pub workspace: WorkspaceRecord,
    pub token: String,
    pub principal: ApiPrincipal,
}

impl Tenant {
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

pub fn json_request(method: &str, uri: &str, auth: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("build request")
}

pub fn empty_request(method: &str, uri: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    builder.body(Body::empty()).expect("build request")
}
