//! Newsletter fan-out and transactional subscription mail.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::mailer::{
    EmailProvider, OutboundMessage, ProviderError, ProviderReceipt, format_mailbox,
};
use crate::application::repos::{
    DeliveryOutcome, EmailCounter, EmailStatusChange, EmailsRepo, NewslettersRepo, RepoError,
    SubscribersRepo,
};
use crate::domain::entities::{EmailRecord, NewsletterRecord, SubscriberRecord};
use crate::domain::types::{DeliveryStatus, EmailStatus};

/// Provider batch endpoints accept at most this many messages.
pub const MAX_BATCH_SIZE: usize = 500;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("email `{0}` not found")]
    EmailNotFound(Uuid),
    #[error("newsletter `{0}` not found")]
    NewsletterNotFound(Uuid),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub batch_size: usize,
    /// Base for confirmation and unsubscribe links, without a trailing slash.
    pub public_base_url: String,
}

impl DeliverySettings {
    pub fn new(batch_size: usize, public_base_url: &str) -> Self {
        Self {
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn confirm_url(&self, token: &str) -> String {
        format!("{}/subscriptions/confirm/{token}", self.public_base_url)
    }

    pub fn unsubscribe_url(&self, token: &str) -> String {
        format!("{}/subscriptions/unsubscribe/{token}", self.public_base_url)
    }
}

/// Outcome of one pass over an issue's audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: u64,
    pub skipped: u64,
    pub failed: u64,
    pub status: EmailStatus,
}

#[derive(Clone)]
pub struct NewsletterDeliveryService {
    newsletters: Arc<dyn NewslettersRepo>,
    subscribers: Arc<dyn SubscribersRepo>,
    emails: Arc<dyn EmailsRepo>,
    provider: Arc<dyn EmailProvider>,
    settings: DeliverySettings,
}

impl NewsletterDeliveryService {
    pub fn new(
        newsletters: Arc<dyn NewslettersRepo>,
        subscribers: Arc<dyn SubscribersRepo>,
        emails: Arc<dyn EmailsRepo>,
        provider: Arc<dyn EmailProvider>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            newsletters,
            subscribers,
            emails,
            provider,
            settings,
        }
    }

    /// Send an issue to every confirmed subscriber without a delivery yet.
    ///
    /// `generation` is the send the job was queued for. Jobs of an older send,
    /// or for an issue that is not due, leave the issue untouched.
    pub async fn deliver(
        &self,
        email_id: Uuid,
        generation: i32,
    ) -> Result<DeliveryReport, DeliveryError> {
        let now = OffsetDateTime::now_utc();
        let Some(email) = self.emails.claim_send(email_id, generation, now).await? else {
            let current = self
                .emails
                .find_email_by_id(email_id)
                .await?
                .ok_or(DeliveryError::EmailNotFound(email_id))?;
            info!(
                target = "application::delivery",
                email_id = %email_id,
                generation,
                current_generation = current.send_generation,
                status = current.status.as_str(),
                "newsletter delivery not due"
            );
            return Ok(DeliveryReport {
                sent: 0,
                skipped: 0,
                failed: 0,
                status: current.status,
            });
        };

        let newsletter = self
            .newsletters
            .find_newsletter_by_id(email.newsletter_id)
            .await?
            .ok_or(DeliveryError::NewsletterNotFound(email.newsletter_id))?;

        let mut report = DeliveryReport {
            sent: 0,
            skipped: 0,
            failed: 0,
            status: EmailStatus::Sending,
        };
        let mut after = None;

        loop {
            let batch = self
                .subscribers
                .list_confirmed_after(newsletter.id, after, self.settings.batch_size as u32)
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.id);

            let recipients: Vec<(Uuid, String)> = batch
                .iter()
                .map(|subscriber| (subscriber.id, subscriber.email.clone()))
                .collect();
            let claimed: HashSet<Uuid> = self
                .emails
                .claim_deliveries(email.id, &recipients)
                .await?
                .into_iter()
                .collect();
            let pending: Vec<&SubscriberRecord> = batch
                .iter()
                .filter(|subscriber| claimed.contains(&subscriber.id))
                .collect();
            report.skipped += (batch.len() - pending.len()) as u64;

            if pending.is_empty() {
                continue;
            }

            let messages: Vec<OutboundMessage> = pending
                .iter()
                .map(|subscriber| self.render_issue(&newsletter, &email, subscriber))
                .collect();

            let receipts = match self.provider.send_batch(&messages).await {
                Ok(receipts) => receipts,
                Err(err) => {
                    warn!(
                        target = "application::delivery",
                        email_id = %email.id,
                        error = %err,
                        "provider rejected newsletter batch"
                    );
                    counter!("quire_newsletter_deliveries_total", "outcome" => "failed")
                        .increment(pending.len() as u64);
                    let ids: Vec<Uuid> = pending.iter().map(|subscriber| subscriber.id).collect();
                    self.emails.release_deliveries(email.id, &ids).await?;
                    self.emails
                        .settle_send(
                            generation,
                            EmailStatusChange {
                                id: email.id,
                                status: EmailStatus::Failed,
                                scheduled_at: email.scheduled_at,
                                sent_at: None,
                                last_error: Some(err.to_string()),
                            },
                        )
                        .await?;
                    report.failed += pending.len() as u64;
                    report.status = EmailStatus::Failed;
                    return Ok(report);
                }
            };

            let (sent, failed) = self.record_batch(&email, &pending, receipts).await?;
            report.sent += sent;
            report.failed += failed;
        }

        let settled = self
            .emails
            .settle_send(
                generation,
                EmailStatusChange {
                    id: email.id,
                    status: EmailStatus::Sent,
                    scheduled_at: email.scheduled_at,
                    sent_at: Some(OffsetDateTime::now_utc()),
                    last_error: None,
                },
            )
            .await?;
        report.status = if settled {
            EmailStatus::Sent
        } else {
            self.emails
                .find_email_by_id(email.id)
                .await?
                .map_or(EmailStatus::Sent, |current| current.status)
        };

        info!(
            target = "application::delivery",
            email_id = %email.id,
            generation,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            "newsletter email delivered"
        );

        Ok(report)
    }

    /// Send the double opt-in confirmation to a pending subscriber.
    pub async fn send_confirmation(
        &self,
        newsletter: &NewsletterRecord,
        subscriber: &SubscriberRecord,
    ) -> Result<ProviderReceipt, DeliveryError> {
        let confirm_url = self.settings.confirm_url(&subscriber.confirmation_token);
        let html_body = format!(
            "<p>Please confirm your subscription to {name}.</p>\
             <p><a href=\"{confirm_url}\">Confirm subscription</a></p>\
             <p>If you did not ask for this, ignore this message.</p>",
            name = escape_html(&newsletter.name),
        );

        let mut metadata = BTreeMap::new();
        metadata.insert("subscriber_id".to_string(), subscriber.id.to_string());
        metadata.insert("kind".to_string(), "confirmation".to_string());

        let message = OutboundMessage {
            from: format_mailbox(&newsletter.sender_name, &newsletter.sender_email),
            to: subscriber.email.clone(),
            reply_to: newsletter.reply_to.clone(),
            subject: format!("Confirm your subscription to {}", newsletter.name),
            html_body,
            headers: Vec::new(),
            metadata,
        };

        let receipt = self.provider.send(&message).await?;
        if !receipt.accepted() {
            warn!(
                target = "application::delivery",
                subscriber_id = %subscriber.id,
                error_code = receipt.error_code,
                message = %receipt.message,
                "confirmation email not accepted"
            );
        }
        Ok(receipt)
    }

    async fn record_batch(
        &self,
        email: &EmailRecord,
        pending: &[&SubscriberRecord],
        receipts: Vec<ProviderReceipt>,
    ) -> Result<(u64, u64), DeliveryError> {
        let outcomes: Vec<DeliveryOutcome> = pending
            .iter()
            .enumerate()
            .map(|(index, subscriber)| match receipts.get(index) {
                Some(receipt) if receipt.accepted() => DeliveryOutcome {
                    subscriber_id: subscriber.id,
                    provider_message_id: receipt.message_id.clone(),
                    status: DeliveryStatus::Sent,
                    error: None,
                },
                other => DeliveryOutcome {
                    subscriber_id: subscriber.id,
                    provider_message_id: None,
                    status: DeliveryStatus::Failed,
                    error: Some(other.map_or_else(
                        || "missing provider receipt".to_string(),
                        |receipt| format!("{}: {}", receipt.error_code, receipt.message),
                    )),
                },
            })
            .collect();

        let attempted = outcomes.len() as u64;
        let sent = self.emails.complete_deliveries(email.id, outcomes).await?;
        let failed = attempted.saturating_sub(sent);
        if sent > 0 {
            self.emails
                .increment_email_counter(email.id, EmailCounter::Recipients, sent as i32)
                .await?;
        }

        counter!("quire_newsletter_deliveries_total", "outcome" => "sent").increment(sent);
        counter!("quire_newsletter_deliveries_total", "outcome" => "failed").increment(failed);

        Ok((sent, failed))
    }

    fn render_issue(
        &self,
        newsletter: &NewsletterRecord,
        email: &EmailRecord,
        subscriber: &SubscriberRecord,
    ) -> OutboundMessage {
        let unsubscribe_url = self.settings.unsubscribe_url(&subscriber.unsubscribe_token);
        let html_body = format!(
            "{body}\n<hr>\n<p style=\"font-size: 12px; color: #666666\">\
             You receive {name} because you subscribed to it. \
             <a href=\"{unsubscribe_url}\">Unsubscribe</a></p>",
            body = email.body_html,
            name = escape_html(&newsletter.name),
        );

        let mut metadata = BTreeMap::new();
        metadata.insert("email_id".to_string(), email.id.to_string());
        metadata.insert("subscriber_id".to_string(), subscriber.id.to_string());

        OutboundMessage {
            from: format_mailbox(&newsletter.sender_name, &newsletter.sender_email),
            to: subscriber.email.clone(),
            reply_to: newsletter.reply_to.clone(),
            subject: email.subject.clone(),
            html_body,
            headers: vec![
                ("List-Unsubscribe".to_string(), format!("<{unsubscribe_url}>")),
                (
                    "List-Unsubscribe-Post".to_string(),
                    "List-Unsubscribe=One-Click".to_string(),
                ),
            ],
            metadata,
        }
    }
}

fn escape_html(value: &str) -> String {
    ammonia::clean_text(value)
}
