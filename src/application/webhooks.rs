//! Provider webhook events folded into delivery, counter and subscriber state.

use std::sync::Arc;

use metrics::counter;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::application::repos::{
    EmailCounter, EmailsRepo, RepoError, SubscriberStatusChange, SubscribersRepo,
};
use crate::domain::entities::DeliveryRecord;
use crate::domain::types::{DeliveryStatus, SubscriberStatus};

/// Bounce types that permanently stop mail to an address.
const HARD_BOUNCE_TYPES: &[&str] = &[
    "HardBounce",
    "BadEmailAddress",
    "ManuallyDeactivated",
    "Blocked",
    "DMARCPolicy",
];

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("malformed webhook payload: {0}")]
    Malformed(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "RecordType")]
pub enum WebhookEvent {
    Delivery {
        #[serde(rename = "MessageID")]
        message_id: String,
    },
    Bounce {
        #[serde(rename = "MessageID")]
        message_id: String,
        #[serde(rename = "Type", default)]
        bounce_type: String,
        #[serde(rename = "Inactive", default)]
        inactive: bool,
        #[serde(rename = "Description", default)]
        description: Option<String>,
    },
    Open {
        #[serde(rename = "MessageID")]
        message_id: String,
    },
    Click {
        #[serde(rename = "MessageID")]
        message_id: String,
    },
    SpamComplaint {
        #[serde(rename = "MessageID")]
        message_id: String,
    },
    SubscriptionChange {
        #[serde(rename = "MessageID")]
        message_id: String,
        #[serde(rename = "SuppressSending", default)]
        suppress_sending: bool,
    },
    #[serde(other)]
    Unsupported,
}

impl WebhookEvent {
    pub fn parse(body: &[u8]) -> Result<Self, WebhookError> {
        serde_json::from_slice(body).map_err(|err| WebhookError::Malformed(err.to_string()))
    }

    pub fn record_type(&self) -> &'static str {
        match self {
            WebhookEvent::Delivery { .. } => "delivery",
            WebhookEvent::Bounce { .. } => "bounce",
            WebhookEvent::Open { .. } => "open",
            WebhookEvent::Click { .. } => "click",
            WebhookEvent::SpamComplaint { .. } => "spam_complaint",
            WebhookEvent::SubscriptionChange { .. } => "subscription_change",
            WebhookEvent::Unsupported => "unsupported",
        }
    }

    fn message_id(&self) -> Option<&str> {
        match self {
            WebhookEvent::Delivery { message_id }
            | WebhookEvent::Bounce { message_id, .. }
            | WebhookEvent::Open { message_id }
            | WebhookEvent::Click { message_id }
            | WebhookEvent::SpamComplaint { message_id }
            | WebhookEvent::SubscriptionChange { message_id, .. } => Some(message_id),
            WebhookEvent::Unsupported => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// State changed.
    Applied,
    /// Event already reflected in the delivery.
    Duplicate,
    /// Unknown message id or unsupported record type.
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

#[derive(Clone)]
pub struct WebhookService {
    emails: Arc<dyn EmailsRepo>,
    subscribers: Arc<dyn SubscribersRepo>,
}

impl WebhookService {
    pub fn new(emails: Arc<dyn EmailsRepo>, subscribers: Arc<dyn SubscribersRepo>) -> Self {
        Self {
            emails,
            subscribers,
        }
    }

    pub async fn handle(&self, event: WebhookEvent) -> Result<WebhookOutcome, WebhookError> {
        let record_type = event.record_type();
        let outcome = self.apply(event).await?;
        counter!(
            "quire_webhook_events_total",
            "record_type" => record_type,
            "outcome" => outcome.as_str()
        )
        .increment(1);
        Ok(outcome)
    }

    async fn apply(&self, event: WebhookEvent) -> Result<WebhookOutcome, WebhookError> {
        let Some(message_id) = event.message_id() else {
            return Ok(WebhookOutcome::Ignored);
        };
        let Some(delivery) = self.emails.find_delivery_by_message_id(message_id).await? else {
            debug!(
                target = "application::webhooks",
                message_id,
                "webhook for unknown message ignored"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        let now = OffsetDateTime::now_utc();
        let outcome = match &event {
            WebhookEvent::Delivery { .. } => {
                let changed = self
                    .emails
                    .transition_delivery(
                        delivery.id,
                        &[DeliveryStatus::Queued, DeliveryStatus::Sent],
                        DeliveryStatus::Delivered,
                        None,
                    )
                    .await?;
                self.bump_if(changed, &delivery, EmailCounter::Delivered)
                    .await?
            }
            WebhookEvent::Open { .. } => {
                let first = self.emails.mark_delivery_opened(delivery.id, now).await?;
                self.bump_if(first, &delivery, EmailCounter::Opened).await?
            }
            WebhookEvent::Click { .. } => {
                let first_click = self.emails.mark_delivery_clicked(delivery.id, now).await?;
                let first_open = self.emails.mark_delivery_opened(delivery.id, now).await?;
                self.bump_if(first_open, &delivery, EmailCounter::Opened)
                    .await?;
                self.bump_if(first_click, &delivery, EmailCounter::Clicked)
                    .await?
            }
            WebhookEvent::Bounce {
                bounce_type,
                inactive,
                description,
                ..
            } => {
                let reason = description
                    .clone()
                    .unwrap_or_else(|| bounce_type.clone());
                if *inactive || HARD_BOUNCE_TYPES.contains(&bounce_type.as_str()) {
                    let changed = self
                        .emails
                        .transition_delivery(
                            delivery.id,
                            &[
                                DeliveryStatus::Queued,
                                DeliveryStatus::Sent,
                                DeliveryStatus::Delivered,
                            ],
                            DeliveryStatus::Bounced,
                            Some(reason),
                        )
                        .await?;
                    if changed {
                        self.suppress(&delivery, SubscriberStatus::Bounced).await?;
                    }
                    self.bump_if(changed, &delivery, EmailCounter::Bounced)
                        .await?
                } else {
                    self.emails
                        .record_delivery_error(delivery.id, &reason)
                        .await?;
                    WebhookOutcome::Applied
                }
            }
            WebhookEvent::SpamComplaint { .. } => {
                let changed = self
                    .emails
                    .transition_delivery(
                        delivery.id,
                        &[
                            DeliveryStatus::Queued,
                            DeliveryStatus::Sent,
                            DeliveryStatus::Delivered,
                            DeliveryStatus::Bounced,
                        ],
                        DeliveryStatus::Complained,
                        None,
                    )
                    .await?;
                if changed {
                    self.suppress(&delivery, SubscriberStatus::Complained)
                        .await?;
                }
                self.bump_if(changed, &delivery, EmailCounter::Complained)
                    .await?
            }
            WebhookEvent::SubscriptionChange {
                suppress_sending, ..
            } => {
                if *suppress_sending {
                    self.unsubscribe(&delivery, now).await?
                } else {
                    WebhookOutcome::Ignored
                }
            }
            WebhookEvent::Unsupported => WebhookOutcome::Ignored,
        };

        info!(
            target = "application::webhooks",
            delivery_id = %delivery.id,
            record_type = event.record_type(),
            outcome = outcome.as_str(),
            "webhook processed"
        );
        Ok(outcome)
    }

    async fn bump_if(
        &self,
        changed: bool,
        delivery: &DeliveryRecord,
        counter: EmailCounter,
    ) -> Result<WebhookOutcome, RepoError> {
        if !changed {
            return Ok(WebhookOutcome::Duplicate);
        }
        self.emails
            .increment_email_counter(delivery.email_id, counter, 1)
            .await?;
        Ok(WebhookOutcome::Applied)
    }

    /// Complaints override bounces; neither is ever lifted here.
    async fn suppress(
        &self,
        delivery: &DeliveryRecord,
        status: SubscriberStatus,
    ) -> Result<(), RepoError> {
        let Some(subscriber) = self
            .subscribers
            .find_subscriber_by_id(delivery.subscriber_id)
            .await?
        else {
            return Ok(());
        };
        if subscriber.status == status || subscriber.status == SubscriberStatus::Complained {
            return Ok(());
        }
        self.subscribers
            .update_subscriber_status(SubscriberStatusChange {
                id: subscriber.id,
                status,
                confirmed_at: subscriber.confirmed_at,
                unsubscribed_at: subscriber.unsubscribed_at,
            })
            .await?;
        Ok(())
    }

    async fn unsubscribe(
        &self,
        delivery: &DeliveryRecord,
        now: OffsetDateTime,
    ) -> Result<WebhookOutcome, RepoError> {
        let Some(subscriber) = self
            .subscribers
            .find_subscriber_by_id(delivery.subscriber_id)
            .await?
        else {
            return Ok(WebhookOutcome::Ignored);
        };
        if subscriber.status.is_suppressed() || subscriber.status == SubscriberStatus::Unsubscribed
        {
            return Ok(WebhookOutcome::Duplicate);
        }
        self.subscribers
            .update_subscriber_status(SubscriberStatusChange {
                id: subscriber.id,
                status: SubscriberStatus::Unsubscribed,
                confirmed_at: subscriber.confirmed_at,
                unsubscribed_at: Some(now),
            })
            .await?;
        Ok(WebhookOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_postmark_bounce() {
        let event = WebhookEvent::parse(
            br#"{"RecordType":"Bounce","MessageID":"abc","Type":"HardBounce","TypeCode":1,
                "Email":"a@example.com","Description":"mailbox unavailable","Inactive":true}"#,
        )
        .expect("bounce parses");
        assert_eq!(
            event,
            WebhookEvent::Bounce {
                message_id: "abc".to_string(),
                bounce_type: "HardBounce".to_string(),
                inactive: true,
                description: Some("mailbox unavailable".to_string()),
            }
        );
    }

    #[test]
    fn unknown_record_types_are_unsupported() {
        let event = WebhookEvent::parse(br#"{"RecordType":"Inbound","MessageID":"x"}"#)
            .expect("parses");
        assert_eq!(event, WebhookEvent::Unsupported);
    }

    #[test]
    fn payload_without_record_type_is_malformed() {
        assert!(matches!(
            WebhookEvent::parse(br#"{"MessageID":"x"}"#),
            Err(WebhookError::Malformed(_))
        ));
        assert!(matches!(
            WebhookEvent::parse(b"not json"),
            Err(WebhookError::Malformed(_))
        ));
    }
}
