//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "quire";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_HTTP_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_JOBS_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_JOB_PUBLISH_POST_CONCURRENCY: u32 = 2;
const DEFAULT_JOB_NEWSLETTER_SEND_CONCURRENCY: u32 = 1;
const DEFAULT_EMAIL_BASE_URL: &str = "https://api.postmarkapp.com";
const DEFAULT_EMAIL_BROADCAST_STREAM: &str = "broadcast";
const DEFAULT_EMAIL_TRANSACTIONAL_STREAM: &str = "outbound";
const DEFAULT_EMAIL_BATCH_SIZE: u64 = 500;
const MAX_EMAIL_BATCH_SIZE: u64 = 500;
const DEFAULT_EMAIL_TIMEOUT_SECS: u64 = 15;
const DEFAULT_API_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_API_RATE_LIMIT_MAX_REQUESTS: u64 = 120;
const DEFAULT_SUBSCRIBE_WINDOW_SECS: u64 = 3600;
const DEFAULT_SUBSCRIBE_PER_IP_MAX: u64 = 20;
const DEFAULT_SUBSCRIBE_PER_EMAIL_MAX: u64 = 5;
const DEFAULT_PUBLIC_BASE_URL: &str = "http://127.0.0.1:3000";

/// Command-line arguments for the quire binary.
#[derive(Debug, Parser)]
#[command(name = "quire", version, about = "Quire publishing and newsletter server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "QUIRE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service, background workers and cron schedules.
    Serve(Box<ServeArgs>),
    /// Apply pending database migrations and exit.
    Migrate(MigrateArgs),
    /// Create a workspace with its owner and print a workspace-admin API key once.
    Bootstrap(BootstrapArgs),
    /// Export one workspace to a TOML archive.
    Export(ExportArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the HTTP database pool size.
    #[arg(long = "database-http-max-connections", value_name = "COUNT")]
    pub database_http_max_connections: Option<u32>,

    /// Override the jobs database pool size.
    #[arg(long = "database-jobs-max-connections", value_name = "COUNT")]
    pub database_jobs_max_connections: Option<u32>,

    /// Override the publish-post worker concurrency.
    #[arg(long = "jobs-publish-post-concurrency", value_name = "COUNT")]
    pub jobs_publish_post_concurrency: Option<u32>,

    /// Override the newsletter-send worker concurrency.
    #[arg(long = "jobs-newsletter-send-concurrency", value_name = "COUNT")]
    pub jobs_newsletter_send_concurrency: Option<u32>,

    /// Override the email provider base URL.
    #[arg(long = "email-base-url", value_name = "URL")]
    pub email_base_url: Option<String>,

    /// Override the newsletter batch size.
    #[arg(long = "email-batch-size", value_name = "COUNT")]
    pub email_batch_size: Option<u64>,

    /// Override the API rate limit window size.
    #[arg(long = "api-rate-limit-window-seconds", value_name = "SECONDS")]
    pub api_rate_limit_window_seconds: Option<u64>,

    /// Override the API rate limit request ceiling.
    #[arg(long = "api-rate-limit-max-requests", value_name = "COUNT")]
    pub api_rate_limit_max_requests: Option<u64>,

    /// Override the public base URL used in links and feeds.
    #[arg(long = "public-base-url", value_name = "URL")]
    pub public_base_url: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Clone)]
pub struct BootstrapArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Display name of the new workspace.
    #[arg(long = "workspace-name", value_name = "NAME")]
    pub workspace_name: String,

    /// Email of the owner member.
    #[arg(long = "owner-email", value_name = "EMAIL")]
    pub owner_email: String,

    /// Display name of the owner member.
    #[arg(long = "owner-name", value_name = "NAME")]
    pub owner_name: String,
}

#[derive(Debug, Args, Clone)]
pub struct ExportArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Slug of the workspace to export.
    #[arg(long = "workspace", value_name = "SLUG")]
    pub workspace: String,

    /// Path to the export file to write.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub jobs: JobsSettings,
    pub email: EmailSettings,
    pub api_rate_limit: ApiRateLimitSettings,
    pub subscribe_rate_limit: SubscribeRateLimitSettings,
    pub public: PublicSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub http_max_connections: NonZeroU32,
    pub jobs_max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub publish_post_concurrency: NonZeroU32,
    pub newsletter_send_concurrency: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub base_url: Url,
    pub server_token: Option<String>,
    /// Send through the provider's test token when no server token is set.
    pub sandbox: bool,
    pub webhook_token: Option<String>,
    pub broadcast_stream: String,
    pub transactional_stream: String,
    pub batch_size: NonZeroU32,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ApiRateLimitSettings {
    pub window_seconds: NonZeroU32,
    pub max_requests: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct SubscribeRateLimitSettings {
    pub window_seconds: NonZeroU32,
    pub per_ip_max: NonZeroU32,
    pub per_email_max: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct PublicSettings {
    pub base_url: Url,
    /// Rate-limit subscribers by the right-most `X-Forwarded-For` hop.
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("QUIRE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Migrate(args)) => raw.apply_database_override(&args.database),
        Some(Command::Bootstrap(args)) => raw.apply_database_override(&args.database),
        Some(Command::Export(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    jobs: RawJobsSettings,
    email: RawEmailSettings,
    api_rate_limit: RawApiRateLimitSettings,
    subscribe_rate_limit: RawSubscribeRateLimitSettings,
    public: RawPublicSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_http_max_connections {
            self.database.http_max_connections = Some(max);
        }
        if let Some(max) = overrides.database_jobs_max_connections {
            self.database.jobs_max_connections = Some(max);
        }
        if let Some(value) = overrides.jobs_publish_post_concurrency {
            self.jobs.publish_post_concurrency = Some(value);
        }
        if let Some(value) = overrides.jobs_newsletter_send_concurrency {
            self.jobs.newsletter_send_concurrency = Some(value);
        }
        if let Some(url) = overrides.email_base_url.as_ref() {
            self.email.base_url = Some(url.clone());
        }
        if let Some(size) = overrides.email_batch_size {
            self.email.batch_size = Some(size);
        }
        if let Some(window) = overrides.api_rate_limit_window_seconds {
            self.api_rate_limit.window_seconds = Some(window);
        }
        if let Some(max) = overrides.api_rate_limit_max_requests {
            self.api_rate_limit.max_requests = Some(max);
        }
        if let Some(url) = overrides.public_base_url.as_ref() {
            self.public.base_url = Some(url.clone());
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            jobs,
            email,
            api_rate_limit,
            subscribe_rate_limit,
            public,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            jobs: build_jobs_settings(jobs)?,
            email: build_email_settings(email)?,
            api_rate_limit: build_api_rate_limit_settings(api_rate_limit)?,
            subscribe_rate_limit: build_subscribe_rate_limit_settings(subscribe_rate_limit)?,
            public: build_public_settings(public)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);

    let http_value = database
        .http_max_connections
        .unwrap_or(DEFAULT_DB_HTTP_MAX_CONNECTIONS);
    let jobs_value = database
        .jobs_max_connections
        .unwrap_or(DEFAULT_DB_JOBS_MAX_CONNECTIONS);

    Ok(DatabaseSettings {
        url,
        http_max_connections: non_zero_u32(http_value.into(), "database.http_max_connections")?,
        jobs_max_connections: non_zero_u32(jobs_value.into(), "database.jobs_max_connections")?,
    })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let publish_post = jobs
        .publish_post_concurrency
        .unwrap_or(DEFAULT_JOB_PUBLISH_POST_CONCURRENCY);
    let newsletter_send = jobs
        .newsletter_send_concurrency
        .unwrap_or(DEFAULT_JOB_NEWSLETTER_SEND_CONCURRENCY);

    Ok(JobsSettings {
        publish_post_concurrency: non_zero_u32(
            publish_post.into(),
            "jobs.publish_post_concurrency",
        )?,
        newsletter_send_concurrency: non_zero_u32(
            newsletter_send.into(),
            "jobs.newsletter_send_concurrency",
        )?,
    })
}

fn build_email_settings(email: RawEmailSettings) -> Result<EmailSettings, LoadError> {
    let base_url = parse_http_url(
        email.base_url.as_deref().unwrap_or(DEFAULT_EMAIL_BASE_URL),
        "email.base_url",
    )?;

    let batch_size = email.batch_size.unwrap_or(DEFAULT_EMAIL_BATCH_SIZE);
    if batch_size > MAX_EMAIL_BATCH_SIZE {
        return Err(LoadError::invalid(
            "email.batch_size",
            format!("must not exceed {MAX_EMAIL_BATCH_SIZE}"),
        ));
    }
    let batch_size = non_zero_u32(batch_size, "email.batch_size")?;

    let timeout_secs = email
        .request_timeout_seconds
        .unwrap_or(DEFAULT_EMAIL_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "email.request_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(EmailSettings {
        base_url,
        server_token: non_blank(email.server_token),
        sandbox: email.sandbox.unwrap_or(false),
        webhook_token: non_blank(email.webhook_token),
        broadcast_stream: non_blank(email.broadcast_stream)
            .unwrap_or_else(|| DEFAULT_EMAIL_BROADCAST_STREAM.to_string()),
        transactional_stream: non_blank(email.transactional_stream)
            .unwrap_or_else(|| DEFAULT_EMAIL_TRANSACTIONAL_STREAM.to_string()),
        batch_size,
        request_timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_api_rate_limit_settings(
    rate_limit: RawApiRateLimitSettings,
) -> Result<ApiRateLimitSettings, LoadError> {
    let window_seconds_val = rate_limit
        .window_seconds
        .unwrap_or(DEFAULT_API_RATE_LIMIT_WINDOW_SECS);
    let window_seconds = non_zero_u32(window_seconds_val, "api_rate_limit.window_seconds")?;

    let max_requests_val = rate_limit
        .max_requests
        .unwrap_or(DEFAULT_API_RATE_LIMIT_MAX_REQUESTS);
    let max_requests = non_zero_u32(max_requests_val, "api_rate_limit.max_requests")?;

    Ok(ApiRateLimitSettings {
        window_seconds,
        max_requests,
    })
}

fn build_subscribe_rate_limit_settings(
    rate_limit: RawSubscribeRateLimitSettings,
) -> Result<SubscribeRateLimitSettings, LoadError> {
    Ok(SubscribeRateLimitSettings {
        window_seconds: non_zero_u32(
            rate_limit
                .window_seconds
                .unwrap_or(DEFAULT_SUBSCRIBE_WINDOW_SECS),
            "subscribe_rate_limit.window_seconds",
        )?,
        per_ip_max: non_zero_u32(
            rate_limit.per_ip_max.unwrap_or(DEFAULT_SUBSCRIBE_PER_IP_MAX),
            "subscribe_rate_limit.per_ip_max",
        )?,
        per_email_max: non_zero_u32(
            rate_limit
                .per_email_max
                .unwrap_or(DEFAULT_SUBSCRIBE_PER_EMAIL_MAX),
            "subscribe_rate_limit.per_email_max",
        )?,
    })
}

fn build_public_settings(public: RawPublicSettings) -> Result<PublicSettings, LoadError> {
    let base_url = parse_http_url(
        public.base_url.as_deref().unwrap_or(DEFAULT_PUBLIC_BASE_URL),
        "public.base_url",
    )?;
    Ok(PublicSettings {
        base_url,
        trust_forwarded_for: public.trust_forwarded_for.unwrap_or(false),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    http_max_connections: Option<u32>,
    jobs_max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    publish_post_concurrency: Option<u32>,
    newsletter_send_concurrency: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEmailSettings {
    base_url: Option<String>,
    server_token: Option<String>,
    sandbox: Option<bool>,
    webhook_token: Option<String>,
    broadcast_stream: Option<String>,
    transactional_stream: Option<String>,
    batch_size: Option<u64>,
    request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiRateLimitSettings {
    window_seconds: Option<u64>,
    max_requests: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSubscribeRateLimitSettings {
    window_seconds: Option<u64>,
    per_ip_max: Option<u64>,
    per_email_max: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPublicSettings {
    base_url: Option<String>,
    trust_forwarded_for: Option<bool>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_http_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value.trim())
        .map_err(|err| LoadError::invalid(key, format!("invalid URL `{value}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{other}`"),
        )),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());

        let overrides = ServeOverrides {
            server_port: Some(4321),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    }

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        assert_eq!(settings.email.batch_size.get(), 500);
        assert_eq!(settings.email.broadcast_stream, "broadcast");
        assert_eq!(settings.subscribe_rate_limit.per_email_max.get(), 5);
        assert!(settings.email.server_token.is_none());
        assert!(!settings.email.sandbox);
        assert_eq!(settings.public.base_url.as_str(), "http://127.0.0.1:3000/");
        assert!(!settings.public.trust_forwarded_for);
    }

    #[test]
    fn zero_counts_are_rejected() {
        let mut raw = RawSettings::default();
        raw.subscribe_rate_limit.per_ip_max = Some(0);
        let err = Settings::from_raw(raw).expect_err("zero must be rejected");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "subscribe_rate_limit.per_ip_max",
                ..
            }
        ));
    }

    #[test]
    fn oversized_batches_are_rejected() {
        let mut raw = RawSettings::default();
        raw.email.batch_size = Some(501);
        let err = Settings::from_raw(raw).expect_err("batch too large");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "email.batch_size",
                ..
            }
        ));
    }

    #[test]
    fn blank_tokens_collapse_to_none() {
        let mut raw = RawSettings::default();
        raw.email.webhook_token = Some("   ".to_string());
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(settings.email.webhook_token.is_none());
    }

    #[test]
    fn public_base_url_must_be_http() {
        let mut raw = RawSettings::default();
        raw.public.base_url = Some("ftp://example.com".to_string());
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = RawSettings::default();
        let overrides = ServeOverrides {
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["quire"]);
        let command = args
            .command
            .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
        assert!(matches!(command, Command::Serve(_)));
    }

    #[test]
    fn parse_bootstrap_arguments() {
        let args = CliArgs::parse_from([
            "quire",
            "bootstrap",
            "--workspace-name",
            "Acme Press",
            "--owner-email",
            "owner@acme.test",
            "--owner-name",
            "Ada",
        ]);

        match args.command.expect("bootstrap command") {
            Command::Bootstrap(bootstrap) => {
                assert_eq!(bootstrap.workspace_name, "Acme Press");
                assert_eq!(bootstrap.owner_email, "owner@acme.test");
                assert_eq!(bootstrap.owner_name, "Ada");
                assert!(bootstrap.database.database_url.is_none());
            }
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_export_arguments() {
        let args = CliArgs::parse_from([
            "quire",
            "export",
            "--database-url",
            "postgres://example",
            "--workspace",
            "acme",
            "/tmp/acme.toml",
        ]);

        match args.command.expect("export command") {
            Command::Export(export) => {
                assert_eq!(
                    export.database.database_url.as_deref(),
                    Some("postgres://example")
                );
                assert_eq!(export.workspace, "acme");
                assert_eq!(export.file, std::path::Path::new("/tmp/acme.toml"));
            }
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_serve_overrides() {
        let args = CliArgs::parse_from([
            "quire",
            "serve",
            "--server-host",
            "0.0.0.0",
            "--database-url",
            "postgres://override",
        ]);

        match args.command.expect("serve command") {
            Command::Serve(serve) => {
                assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
                assert_eq!(
                    serve.overrides.database_url.as_deref(),
                    Some("postgres://override")
                );
            }
            _ => panic!("wrong command parsed"),
        }
    }
}
