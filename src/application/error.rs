use std::error::Error as StdError;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::application::public::PublicError;
use crate::application::subscriptions::SubscriptionError;
use crate::application::webhooks::WebhookError;
use crate::{domain::error::DomainError, infra::error::InfraError};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Error returned by the public (unauthenticated) surface.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    code: &'static str,
    public_message: &'static str,
    retry_after: Option<u64>,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        code: &'static str,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            code,
            public_message,
            retry_after: None,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        code: &'static str,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            code,
            public_message,
            retry_after: None,
            report,
        }
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds.max(1));
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code,
                "message": self.public_message,
            }
        });
        let mut response = (self.status, Json(body)).into_response();
        if let Some(seconds) = self.retry_after
            && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        self.report.attach(&mut response);
        response
    }
}

impl From<PublicError> for HttpError {
    fn from(error: PublicError) -> Self {
        const SOURCE: &str = "infra::http::public_error_to_http_error";
        match error {
            PublicError::PageNotFound => HttpError::new(
                SOURCE,
                StatusCode::NOT_FOUND,
                "not_found",
                "Page not found",
                "page slug did not match any page",
            ),
            PublicError::PostNotFound => HttpError::new(
                SOURCE,
                StatusCode::NOT_FOUND,
                "not_found",
                "Post not found",
                "post slug did not match a published post",
            ),
            PublicError::Repo(err) => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "Internal server error",
                &err,
            ),
        }
    }
}

impl From<SubscriptionError> for HttpError {
    fn from(error: SubscriptionError) -> Self {
        const SOURCE: &str = "infra::http::subscription_error_to_http_error";
        match error {
            SubscriptionError::NewsletterNotFound => HttpError::new(
                SOURCE,
                StatusCode::NOT_FOUND,
                "not_found",
                "Newsletter not found",
                "page or newsletter slug did not match",
            ),
            SubscriptionError::InvalidEmail => HttpError::new(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "invalid_email",
                "Email address is invalid",
                "email failed normalisation",
            ),
            SubscriptionError::RateLimited { retry_after } => HttpError::new(
                SOURCE,
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many subscription attempts, try again later",
                "subscribe rate limit exceeded",
            )
            .with_retry_after(retry_after.as_secs()),
            // The public response never says why an address is suppressed.
            SubscriptionError::Suppressed => HttpError::new(
                SOURCE,
                StatusCode::UNPROCESSABLE_ENTITY,
                "subscription_refused",
                "Subscription could not be completed",
                "address is suppressed",
            ),
            SubscriptionError::TokenNotFound => HttpError::new(
                SOURCE,
                StatusCode::NOT_FOUND,
                "not_found",
                "Subscription link is invalid or expired",
                "token did not match any subscriber",
            ),
            SubscriptionError::NotPending => HttpError::new(
                SOURCE,
                StatusCode::CONFLICT,
                "not_pending",
                "Subscription is no longer pending",
                "confirmation token used on a non-pending subscriber",
            ),
            SubscriptionError::Repo(err) => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "Internal server error",
                &err,
            ),
        }
    }
}

impl From<WebhookError> for HttpError {
    fn from(error: WebhookError) -> Self {
        const SOURCE: &str = "infra::http::webhook_error_to_http_error";
        match error {
            err @ WebhookError::Malformed(_) => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "malformed_payload",
                "Webhook payload could not be parsed",
                &err,
            ),
            WebhookError::Repo(err) => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "Internal server error",
                &err,
            ),
        }
    }
}

/// Top-level error for process startup and CLI commands.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("resource not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
