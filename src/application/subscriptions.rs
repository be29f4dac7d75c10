//! Public subscribe, confirm and unsubscribe flows.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::delivery::NewsletterDeliveryService;
use crate::application::rate_limit::{RateDecision, SlidingWindowLimiter};
use crate::application::repos::{
    CreateSubscriberParams, NewslettersRepo, PagesRepo, RepoError, ResubscribeParams,
    SubscriberStatusChange, SubscribersRepo,
};
use crate::domain::email::normalize_email;
use crate::domain::entities::{NewsletterRecord, SubscriberRecord};
use crate::domain::types::SubscriberStatus;

const PUBLIC_SOURCE: &str = "public";

/// Opaque token used in confirmation and unsubscribe links.
pub fn new_subscription_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("newsletter not found")]
    NewsletterNotFound,
    #[error("email address is invalid")]
    InvalidEmail,
    #[error("too many subscription attempts")]
    RateLimited { retry_after: Duration },
    #[error("subscription could not be completed")]
    Suppressed,
    #[error("subscription link is invalid")]
    TokenNotFound,
    #[error("subscription is no longer pending")]
    NotPending,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// What a public caller learns about a subscribe request. An address that is
/// already confirmed reports the same outcome as a fresh signup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeOutcome {
    ConfirmationSent,
    Subscribed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionView {
    pub newsletter: String,
    pub email: String,
    pub status: SubscriberStatus,
}

#[derive(Debug, Clone)]
pub struct SubscribeLimits {
    pub by_ip: SlidingWindowLimiter,
    pub by_email: SlidingWindowLimiter,
}

#[derive(Clone)]
pub struct SubscriptionService {
    pages: Arc<dyn PagesRepo>,
    newsletters: Arc<dyn NewslettersRepo>,
    subscribers: Arc<dyn SubscribersRepo>,
    delivery: Arc<NewsletterDeliveryService>,
    limits: SubscribeLimits,
}

impl SubscriptionService {
    pub fn new(
        pages: Arc<dyn PagesRepo>,
        newsletters: Arc<dyn NewslettersRepo>,
        subscribers: Arc<dyn SubscribersRepo>,
        delivery: Arc<NewsletterDeliveryService>,
        limits: SubscribeLimits,
    ) -> Self {
        Self {
            pages,
            newsletters,
            subscribers,
            delivery,
            limits,
        }
    }

    pub async fn subscribe(
        &self,
        page_slug: &str,
        newsletter_slug: &str,
        email: &str,
        client_ip: Option<IpAddr>,
    ) -> Result<SubscribeOutcome, SubscriptionError> {
        if let Some(ip) = client_ip {
            throttle(&self.limits.by_ip, &format!("ip:{ip}"), "ip")?;
        }

        let email = normalize_email(email).map_err(|_| SubscriptionError::InvalidEmail)?;
        let newsletter = self.resolve_newsletter(page_slug, newsletter_slug).await?;
        throttle(
            &self.limits.by_email,
            &format!("{}:{email}", newsletter.id),
            "email",
        )?;

        let existing = self
            .subscribers
            .find_subscriber_by_email(newsletter.id, &email)
            .await?;

        let subscriber = match existing {
            None => {
                let (status, confirmed_at) = initial_state(&newsletter);
                self.subscribers
                    .create_subscriber(CreateSubscriberParams {
                        newsletter_id: newsletter.id,
                        email,
                        status,
                        confirmation_token: new_subscription_token(),
                        unsubscribe_token: new_subscription_token(),
                        source: PUBLIC_SOURCE.to_string(),
                        confirmed_at,
                    })
                    .await?
            }
            Some(current) => match current.status {
                SubscriberStatus::Bounced | SubscriberStatus::Complained => {
                    counter!("quire_subscription_attempts_rejected_total", "reason" => "suppressed")
                        .increment(1);
                    return Err(SubscriptionError::Suppressed);
                }
                SubscriberStatus::Confirmed => return Ok(public_outcome(&newsletter)),
                SubscriberStatus::Pending if newsletter.double_opt_in => current,
                SubscriberStatus::Pending => {
                    self.subscribers
                        .update_subscriber_status(SubscriberStatusChange {
                            id: current.id,
                            status: SubscriberStatus::Confirmed,
                            confirmed_at: Some(OffsetDateTime::now_utc()),
                            unsubscribed_at: None,
                        })
                        .await?
                }
                SubscriberStatus::Unsubscribed => {
                    let (status, confirmed_at) = initial_state(&newsletter);
                    self.subscribers
                        .resubscribe(ResubscribeParams {
                            id: current.id,
                            status,
                            confirmation_token: new_subscription_token(),
                            unsubscribe_token: new_subscription_token(),
                            confirmed_at,
                        })
                        .await?
                }
            },
        };

        if subscriber.status == SubscriberStatus::Pending {
            // The address is stored either way; a repeat request resends.
            if let Err(err) = self.delivery.send_confirmation(&newsletter, &subscriber).await {
                warn!(
                    target = "application::subscriptions",
                    subscriber_id = %subscriber.id,
                    error = %err,
                    "confirmation email could not be sent"
                );
            }
        }

        info!(
            target = "application::subscriptions",
            newsletter_id = %newsletter.id,
            subscriber_id = %subscriber.id,
            status = subscriber.status.as_str(),
            "subscription recorded"
        );

        Ok(public_outcome(&newsletter))
    }

    pub async fn confirm(&self, token: &str) -> Result<SubscriptionView, SubscriptionError> {
        let subscriber = self
            .subscribers
            .find_by_confirmation_token(token.trim())
            .await?
            .ok_or(SubscriptionError::TokenNotFound)?;

        let subscriber = match subscriber.status {
            SubscriberStatus::Confirmed => subscriber,
            SubscriberStatus::Pending => {
                self.subscribers
                    .update_subscriber_status(SubscriberStatusChange {
                        id: subscriber.id,
                        status: SubscriberStatus::Confirmed,
                        confirmed_at: Some(OffsetDateTime::now_utc()),
                        unsubscribed_at: None,
                    })
                    .await?
            }
            _ => return Err(SubscriptionError::NotPending),
        };

        self.view(subscriber).await
    }

    /// Suppressed addresses keep their status; everything else ends unsubscribed.
    pub async fn unsubscribe(&self, token: &str) -> Result<SubscriptionView, SubscriptionError> {
        let subscriber = self
            .subscribers
            .find_by_unsubscribe_token(token.trim())
            .await?
            .ok_or(SubscriptionError::TokenNotFound)?;

        let subscriber = if subscriber.status.is_suppressed()
            || subscriber.status == SubscriberStatus::Unsubscribed
        {
            subscriber
        } else {
            let updated = self
                .subscribers
                .update_subscriber_status(SubscriberStatusChange {
                    id: subscriber.id,
                    status: SubscriberStatus::Unsubscribed,
                    confirmed_at: subscriber.confirmed_at,
                    unsubscribed_at: Some(OffsetDateTime::now_utc()),
                })
                .await?;
            info!(
                target = "application::subscriptions",
                subscriber_id = %updated.id,
                "subscriber unsubscribed"
            );
            updated
        };

        self.view(subscriber).await
    }

    async fn resolve_newsletter(
        &self,
        page_slug: &str,
        newsletter_slug: &str,
    ) -> Result<NewsletterRecord, SubscriptionError> {
        let page = self
            .pages
            .find_page_by_slug(page_slug)
            .await?
            .ok_or(SubscriptionError::NewsletterNotFound)?;
        self.newsletters
            .find_newsletter_by_slug(page.id, newsletter_slug)
            .await?
            .ok_or(SubscriptionError::NewsletterNotFound)
    }

    async fn view(&self, subscriber: SubscriberRecord) -> Result<SubscriptionView, SubscriptionError> {
        let newsletter = self
            .newsletters
            .find_newsletter_by_id(subscriber.newsletter_id)
            .await?
            .ok_or(SubscriptionError::TokenNotFound)?;
        Ok(SubscriptionView {
            newsletter: newsletter.name,
            email: subscriber.email,
            status: subscriber.status,
        })
    }
}

fn throttle(
    limiter: &SlidingWindowLimiter,
    key: &str,
    reason: &'static str,
) -> Result<(), SubscriptionError> {
    match limiter.check(key) {
        RateDecision::Allowed { .. } => Ok(()),
        RateDecision::Limited { retry_after } => {
            counter!("quire_subscription_attempts_rejected_total", "reason" => reason).increment(1);
            Err(SubscriptionError::RateLimited { retry_after })
        }
    }
}

fn initial_state(newsletter: &NewsletterRecord) -> (SubscriberStatus, Option<OffsetDateTime>) {
    if newsletter.double_opt_in {
        (SubscriberStatus::Pending, None)
    } else {
        (SubscriberStatus::Confirmed, Some(OffsetDateTime::now_utc()))
    }
}

fn public_outcome(newsletter: &NewsletterRecord) -> SubscribeOutcome {
    if newsletter.double_opt_in {
        SubscribeOutcome::ConfirmationSent
    } else {
        SubscribeOutcome::Subscribed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_tokens_are_long_and_distinct() {
        let first = new_subscription_token();
        let second = new_subscription_token();
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }
}
