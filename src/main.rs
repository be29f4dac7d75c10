use std::{future::IntoFuture, net::SocketAddr, process, sync::Arc, time::Duration};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_cron::CronStream;
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use quire::{
    application::{
        admin::{
            audit::AdminAuditService,
            authors::AdminAuthorService,
            categories::AdminCategoryService,
            emails::{AdminEmailService, EmailRepos},
            links::AdminLinkService,
            newsletters::AdminNewsletterService,
            pages::AdminPageService,
            posts::{AdminPostService, PostRepos},
            subscribers::AdminSubscriberService,
            workspaces::{InviteMemberCommand, WorkspaceService},
        },
        api_keys::{ApiKeyService, IssueApiKeyCommand},
        content::ContentSanitizer,
        delivery::{DeliverySettings, NewsletterDeliveryService},
        error::AppError,
        export::{ExportError, ExportSources, export_workspace},
        jobs::{
            CronContext, JobWorkerContext, expire_api_keys_schedule, process_expire_api_keys_job,
            process_publish_post_job, process_purge_rate_limits_job,
            process_send_newsletter_email_job, process_sweep_scheduled_posts_job,
            purge_rate_limits_schedule, sweep_scheduled_posts_schedule,
        },
        mailer::EmailProvider,
        public::PublicSiteService,
        rate_limit::SlidingWindowLimiter,
        subscriptions::{SubscribeLimits, SubscriptionService},
        syndication::SyndicationService,
        webhooks::WebhookService,
    },
    config,
    domain::{api_keys::ApiScope, types::JobType, types::MemberRole},
    infra::{
        db::PostgresRepositories,
        email::PostmarkClient,
        error::InfraError,
        http::{self, ApiState, PublicState, RouterState},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const CLI_ACTOR: &str = "cli";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
        config::Command::Bootstrap(args) => run_bootstrap(settings, args).await,
        config::Command::Export(args) => run_export(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let (http_repositories, job_repositories) = init_repositories(&settings).await?;
    let app = build_application_context(http_repositories, job_repositories.clone(), &settings)?;

    let monitor_handle = spawn_job_monitor(
        job_repositories,
        app.job_context,
        app.cron_context,
        &settings.jobs,
    )?;

    let result = serve_http(&settings, app.router_state).await;

    monitor_handle.abort();
    let _ = monitor_handle.await;

    result
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let pool = connect_pool(&settings, settings.database.http_max_connections.get()).await?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::migration(err)))?;
    info!(target = "quire::migrate", "Migrations applied");
    Ok(())
}

async fn run_bootstrap(
    settings: config::Settings,
    args: config::BootstrapArgs,
) -> Result<(), AppError> {
    let (repositories, _) = init_repositories(&settings).await?;
    let audit = AdminAuditService::new(repositories.clone());
    let workspaces = WorkspaceService::new(repositories.clone(), audit.clone());
    let api_keys = ApiKeyService::new(repositories).with_audit(audit);

    let workspace = workspaces
        .create_workspace(CLI_ACTOR, &args.workspace_name)
        .await
        .map_err(|err| AppError::validation(err.to_string()))?;

    let owner = workspaces
        .invite_member(
            CLI_ACTOR,
            workspace.id,
            InviteMemberCommand {
                email: args.owner_email,
                name: args.owner_name,
                role: MemberRole::Owner,
            },
        )
        .await
        .map_err(|err| AppError::validation(err.to_string()))?;

    let issued = api_keys
        .issue(IssueApiKeyCommand {
            workspace_id: workspace.id,
            name: "bootstrap".to_string(),
            description: Some(format!("Issued for {}", owner.email)),
            scopes: vec![ApiScope::WorkspaceAdmin],
            expires_at: None,
            created_by: CLI_ACTOR.to_string(),
        })
        .await
        .map_err(|err| AppError::unexpected(err.to_string()))?;

    info!(
        target = "quire::bootstrap",
        workspace_id = %workspace.id,
        workspace_slug = %workspace.slug,
        owner = %owner.email,
        key_prefix = %issued.record.prefix,
        "Workspace created"
    );

    // The token is never shown again.
    println!("{}", issued.token);
    Ok(())
}

async fn run_export(settings: config::Settings, args: config::ExportArgs) -> Result<(), AppError> {
    let (repositories, _) = init_repositories(&settings).await?;
    let path = args.file;

    info!(
        target = "quire::export",
        workspace = %args.workspace,
        path = %path.display(),
        "Starting export"
    );

    let archive = export_workspace(&export_sources(&repositories), &args.workspace, &path)
        .await
        .map_err(|err| match err {
            ExportError::WorkspaceNotFound(_) => AppError::validation(err.to_string()),
            other => AppError::unexpected(other.to_string()),
        })?;

    info!(
        target = "quire::export",
        pages = archive.pages.len(),
        "Export completed"
    );
    Ok(())
}

struct ApplicationContext {
    router_state: RouterState,
    job_context: JobWorkerContext,
    cron_context: CronContext,
}

fn export_sources(repositories: &Arc<PostgresRepositories>) -> ExportSources {
    ExportSources {
        workspaces: repositories.clone(),
        pages: repositories.clone(),
        posts: repositories.clone(),
        categories: repositories.clone(),
        authors: repositories.clone(),
        links: repositories.clone(),
        newsletters: repositories.clone(),
        subscribers: repositories.clone(),
    }
}

async fn connect_pool(
    settings: &config::Settings,
    max_connections: u32,
) -> Result<sqlx::PgPool, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::Setting {
            key: "database.url",
        })
        .map_err(AppError::from)?;

    PostgresRepositories::connect(database_url, max_connections)
        .await
        .map_err(|err| AppError::from(InfraError::database(err)))
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<(Arc<PostgresRepositories>, Arc<PostgresRepositories>), AppError> {
    let http_pool = connect_pool(settings, settings.database.http_max_connections.get()).await?;

    PostgresRepositories::run_migrations(&http_pool)
        .await
        .map_err(|err| AppError::from(InfraError::migration(err)))?;

    let jobs_pool = connect_pool(settings, settings.database.jobs_max_connections.get()).await?;

    Ok((
        Arc::new(PostgresRepositories::new(http_pool)),
        Arc::new(PostgresRepositories::new(jobs_pool)),
    ))
}

fn build_post_service(
    repositories: &Arc<PostgresRepositories>,
    sanitizer: Arc<ContentSanitizer>,
    audit: AdminAuditService,
) -> Arc<AdminPostService> {
    Arc::new(AdminPostService::new(
        PostRepos {
            pages: repositories.clone(),
            posts: repositories.clone(),
            revisions: repositories.clone(),
            categories: repositories.clone(),
            authors: repositories.clone(),
            jobs: repositories.clone(),
        },
        sanitizer,
        audit,
    ))
}

fn build_delivery_service(
    repositories: &Arc<PostgresRepositories>,
    provider: Arc<dyn EmailProvider>,
    settings: &config::Settings,
) -> Arc<NewsletterDeliveryService> {
    Arc::new(NewsletterDeliveryService::new(
        repositories.clone(),
        repositories.clone(),
        repositories.clone(),
        provider,
        DeliverySettings::new(
            settings.email.batch_size.get() as usize,
            settings.public.base_url.as_str(),
        ),
    ))
}

fn window(seconds: std::num::NonZeroU32) -> Duration {
    Duration::from_secs(u64::from(seconds.get()))
}

fn build_application_context(
    http_repositories: Arc<PostgresRepositories>,
    job_repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let provider: Arc<dyn EmailProvider> =
        Arc::new(PostmarkClient::from_settings(&settings.email).map_err(AppError::from)?);
    let sanitizer = Arc::new(ContentSanitizer::new());
    let repos = &http_repositories;

    let audit_service = AdminAuditService::new(repos.clone());
    let job_audit_service = AdminAuditService::new(job_repositories.clone());

    let api_key_service = Arc::new(ApiKeyService::new(repos.clone()).with_audit(audit_service.clone()));
    let workspace_service = Arc::new(WorkspaceService::new(repos.clone(), audit_service.clone()));
    let page_service = Arc::new(AdminPageService::new(repos.clone(), audit_service.clone()));
    let post_service = build_post_service(repos, sanitizer.clone(), audit_service.clone());
    let category_service = Arc::new(AdminCategoryService::new(
        repos.clone(),
        repos.clone(),
        audit_service.clone(),
    ));
    let author_service = Arc::new(AdminAuthorService::new(
        repos.clone(),
        repos.clone(),
        repos.clone(),
        audit_service.clone(),
    ));
    let link_service = Arc::new(AdminLinkService::new(
        repos.clone(),
        repos.clone(),
        audit_service.clone(),
    ));
    let newsletter_service = Arc::new(AdminNewsletterService::new(
        repos.clone(),
        repos.clone(),
        repos.clone(),
        audit_service.clone(),
    ));
    let subscriber_service = Arc::new(AdminSubscriberService::new(
        repos.clone(),
        repos.clone(),
        repos.clone(),
        audit_service.clone(),
    ));
    let email_service = Arc::new(AdminEmailService::new(
        EmailRepos {
            pages: repos.clone(),
            newsletters: repos.clone(),
            posts: repos.clone(),
            revisions: repos.clone(),
            subscribers: repos.clone(),
            emails: repos.clone(),
            jobs: repos.clone(),
        },
        sanitizer.clone(),
        audit_service.clone(),
    ));

    let api_limiter = SlidingWindowLimiter::new(
        window(settings.api_rate_limit.window_seconds),
        settings.api_rate_limit.max_requests.get(),
    );
    let api_state = ApiState {
        api_keys: api_key_service.clone(),
        workspaces: workspace_service,
        pages: page_service,
        posts: post_service,
        categories: category_service,
        authors: author_service,
        links: link_service,
        newsletters: newsletter_service,
        subscribers: subscriber_service,
        emails: email_service,
        audit: Arc::new(audit_service),
        rate_limiter: api_limiter.clone(),
    };

    let site = PublicSiteService::new(
        repos.clone(),
        repos.clone(),
        repos.clone(),
        repos.clone(),
        repos.clone(),
    );
    let syndication = Arc::new(SyndicationService::new(
        site.clone(),
        settings.public.base_url.as_str(),
    ));

    let http_delivery = build_delivery_service(repos, provider.clone(), settings);
    let subscribe_window = window(settings.subscribe_rate_limit.window_seconds);
    let subscribe_limits = SubscribeLimits {
        by_ip: SlidingWindowLimiter::new(
            subscribe_window,
            settings.subscribe_rate_limit.per_ip_max.get(),
        ),
        by_email: SlidingWindowLimiter::new(
            subscribe_window,
            settings.subscribe_rate_limit.per_email_max.get(),
        ),
    };
    let limiters = vec![
        api_limiter,
        subscribe_limits.by_ip.clone(),
        subscribe_limits.by_email.clone(),
    ];
    let subscriptions = Arc::new(SubscriptionService::new(
        repos.clone(),
        repos.clone(),
        repos.clone(),
        http_delivery,
        subscribe_limits,
    ));
    let webhooks = Arc::new(WebhookService::new(repos.clone(), repos.clone()));

    let public_state = PublicState {
        site: Arc::new(site),
        syndication,
        subscriptions,
        webhooks,
        webhook_token: settings.email.webhook_token.clone(),
        trust_forwarded_for: settings.public.trust_forwarded_for,
        db: http_repositories.clone(),
    };

    let job_posts = build_post_service(&job_repositories, sanitizer, job_audit_service);
    let job_context = JobWorkerContext {
        posts: job_posts.clone(),
        delivery: build_delivery_service(&job_repositories, provider, settings),
    };
    let cron_context = CronContext {
        api_keys: api_key_service,
        posts: job_posts,
        limiters,
    };

    Ok(ApplicationContext {
        router_state: RouterState {
            public: public_state,
            api: api_state,
        },
        job_context,
        cron_context,
    })
}

fn spawn_job_monitor(
    repositories: Arc<PostgresRepositories>,
    context: JobWorkerContext,
    cron_context: CronContext,
    jobs: &config::JobsSettings,
) -> Result<tokio::task::JoinHandle<()>, AppError> {
    let publish_post_storage = PostgresStorage::new_with_config(
        repositories.pool().clone(),
        ApalisSqlConfig::new(JobType::PublishPost.as_str()),
    );
    let send_newsletter_storage = PostgresStorage::new_with_config(
        repositories.pool().clone(),
        ApalisSqlConfig::new(JobType::SendNewsletterEmail.as_str()),
    );

    let publish_post_worker = WorkerBuilder::new("publish-post-worker")
        .concurrency(jobs.publish_post_concurrency.get() as usize)
        .data(context.clone())
        .backend(publish_post_storage)
        .build_fn(process_publish_post_job);
    let send_newsletter_worker = WorkerBuilder::new("send-newsletter-email-worker")
        .concurrency(jobs.newsletter_send_concurrency.get() as usize)
        .data(context)
        .backend(send_newsletter_storage)
        .build_fn(process_send_newsletter_email_job);

    let expire_schedule =
        expire_api_keys_schedule().map_err(|err| AppError::unexpected(err.to_string()))?;
    let sweep_schedule =
        sweep_scheduled_posts_schedule().map_err(|err| AppError::unexpected(err.to_string()))?;
    let purge_schedule =
        purge_rate_limits_schedule().map_err(|err| AppError::unexpected(err.to_string()))?;

    let expire_api_keys_worker = WorkerBuilder::new("expire-api-keys-worker")
        .data(cron_context.clone())
        .backend(CronStream::new(expire_schedule))
        .build_fn(process_expire_api_keys_job);
    let sweep_scheduled_posts_worker = WorkerBuilder::new("sweep-scheduled-posts-worker")
        .data(cron_context.clone())
        .backend(CronStream::new(sweep_schedule))
        .build_fn(process_sweep_scheduled_posts_job);
    let purge_rate_limits_worker = WorkerBuilder::new("purge-rate-limits-worker")
        .data(cron_context)
        .backend(CronStream::new(purge_schedule))
        .build_fn(process_purge_rate_limits_job);

    let monitor = Monitor::new()
        .register(publish_post_worker)
        .register(send_newsletter_worker)
        .register(expire_api_keys_worker)
        .register(sweep_scheduled_posts_worker)
        .register(purge_rate_limits_worker);

    Ok(tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    }))
}

async fn serve_http(settings: &config::Settings, state: RouterState) -> Result<(), AppError> {
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "quire::serve",
        addr = %settings.server.addr,
        "Listening"
    );

    let app = http::build_app(state).into_make_service_with_connect_info::<SocketAddr>();
    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = signalled_tx.send(());
        })
        .into_future();

    let grace = settings.server.graceful_shutdown;
    let deadline = async move {
        if signalled_rx.await.is_ok() {
            tokio::time::sleep(grace).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = deadline => {
            warn!(
                target = "quire::serve",
                grace_seconds = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
        }
    }

    info!(target = "quire::serve", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!(target = "quire::serve", "Shutdown signal received");
}
