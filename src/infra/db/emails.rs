use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::pagination::{CursorKind, CursorPage, PageRequest, TimeCursor},
    application::repos::{
        CreateEmailParams, DeliveryOutcome, EmailCounter, EmailStatusChange, EmailsRepo,
        RepoError,
    },
    domain::{
        entities::{DeliveryRecord, EmailRecord},
        types::{DeliveryStatus, EmailStatus},
    },
};

use super::{PostgresRepositories, map_sqlx_error};

const EMAIL_COLUMNS: &str = "id, newsletter_id, post_id, subject, body_html, status, \
    scheduled_at, sent_at, recipient_count, delivered_count, opened_count, clicked_count, \
    bounced_count, complained_count, last_error, send_generation, created_at, updated_at";

const DELIVERY_COLUMNS: &str = "id, email_id, subscriber_id, recipient, provider_message_id, \
    status, opened_at, clicked_at, error, created_at, updated_at";

#[async_trait]
impl EmailsRepo for PostgresRepositories {
    async fn list_emails(
        &self,
        newsletter_id: Uuid,
        page: PageRequest<TimeCursor>,
    ) -> Result<CursorPage<EmailRecord>, RepoError> {
        let limit = Self::clamp_limit(page.limit);
        let mut qb = sqlx::QueryBuilder::new(format!(
            "SELECT {EMAIL_COLUMNS} FROM newsletter_emails WHERE "
        ));
        qb.push("newsletter_id = ");
        qb.push_bind(newsletter_id);
        Self::push_time_cursor(&mut qb, "created_at", "id", page.cursor);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        qb.push_bind(limit + 1);

        let rows = qb
            .build_query_as::<EmailRecord>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(CursorPage::from_overfetch(rows, limit as u32, |row| {
            TimeCursor::new(CursorKind::Emails, row.created_at, row.id)
        }))
    }

    async fn find_email(
        &self,
        newsletter_id: Uuid,
        id: Uuid,
    ) -> Result<Option<EmailRecord>, RepoError> {
        sqlx::query_as::<_, EmailRecord>(&format!(
            "SELECT {EMAIL_COLUMNS} FROM newsletter_emails WHERE newsletter_id = $1 AND id = $2"
        ))
        .bind(newsletter_id)
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_email_by_id(&self, id: Uuid) -> Result<Option<EmailRecord>, RepoError> {
        sqlx::query_as::<_, EmailRecord>(&format!(
            "SELECT {EMAIL_COLUMNS} FROM newsletter_emails WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn create_email(&self, params: CreateEmailParams) -> Result<EmailRecord, RepoError> {
        sqlx::query_as::<_, EmailRecord>(&format!(
            "INSERT INTO newsletter_emails (id, newsletter_id, post_id, subject, body_html, \
             status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, now(), now()) RETURNING {EMAIL_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(params.newsletter_id)
        .bind(params.post_id)
        .bind(&params.subject)
        .bind(&params.body_html)
        .bind(EmailStatus::Draft)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn update_email_content(
        &self,
        id: Uuid,
        subject: &str,
        body_html: &str,
    ) -> Result<EmailRecord, RepoError> {
        sqlx::query_as::<_, EmailRecord>(&format!(
            "UPDATE newsletter_emails SET subject = $2, body_html = $3, updated_at = now() \
             WHERE id = $1 RETURNING {EMAIL_COLUMNS}"
        ))
        .bind(id)
        .bind(subject)
        .bind(body_html)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn update_email_status(
        &self,
        change: EmailStatusChange,
    ) -> Result<EmailRecord, RepoError> {
        sqlx::query_as::<_, EmailRecord>(&format!(
            "UPDATE newsletter_emails SET status = $2, scheduled_at = $3, sent_at = $4, \
             last_error = $5, updated_at = now() \
             WHERE id = $1 RETURNING {EMAIL_COLUMNS}"
        ))
        .bind(change.id)
        .bind(change.status)
        .bind(change.scheduled_at)
        .bind(change.sent_at)
        .bind(&change.last_error)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn begin_send(
        &self,
        id: Uuid,
        from: &[EmailStatus],
        status: EmailStatus,
        scheduled_at: Option<OffsetDateTime>,
    ) -> Result<Option<EmailRecord>, RepoError> {
        sqlx::query_as::<_, EmailRecord>(&format!(
            "UPDATE newsletter_emails SET status = $3, scheduled_at = $4, sent_at = NULL, \
             last_error = NULL, send_generation = send_generation + 1, updated_at = now() \
             WHERE id = $1 AND status = ANY($2) RETURNING {EMAIL_COLUMNS}"
        ))
        .bind(id)
        .bind(from)
        .bind(status)
        .bind(scheduled_at)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn revert_send(
        &self,
        generation: i32,
        prior: EmailStatusChange,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE newsletter_emails SET status = $3, scheduled_at = $4, sent_at = $5, \
             last_error = $6, send_generation = send_generation - 1, updated_at = now() \
             WHERE id = $1 AND send_generation = $2",
        )
        .bind(prior.id)
        .bind(generation)
        .bind(prior.status)
        .bind(prior.scheduled_at)
        .bind(prior.sent_at)
        .bind(&prior.last_error)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_send(
        &self,
        id: Uuid,
        generation: i32,
        now: OffsetDateTime,
    ) -> Result<Option<EmailRecord>, RepoError> {
        sqlx::query_as::<_, EmailRecord>(&format!(
            "UPDATE newsletter_emails SET status = 'sending', updated_at = now() \
             WHERE id = $1 AND send_generation = $2 \
               AND (status = 'sending' \
                    OR (status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= $3)) \
             RETURNING {EMAIL_COLUMNS}"
        ))
        .bind(id)
        .bind(generation)
        .bind(now)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn settle_send(
        &self,
        generation: i32,
        change: EmailStatusChange,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE newsletter_emails SET status = $3, sent_at = $4, last_error = $5, \
             updated_at = now() \
             WHERE id = $1 AND send_generation = $2 AND status = 'sending'",
        )
        .bind(change.id)
        .bind(generation)
        .bind(change.status)
        .bind(change.sent_at)
        .bind(&change.last_error)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_email(&self, newsletter_id: Uuid, id: Uuid) -> Result<(), RepoError> {
        let result =
            sqlx::query("DELETE FROM newsletter_emails WHERE newsletter_id = $1 AND id = $2")
                .bind(newsletter_id)
                .bind(id)
                .execute(self.pool())
                .await
                .map_err(map_sqlx_error)?;
        Self::require_one(result.rows_affected())
    }

    async fn increment_email_counter(
        &self,
        id: Uuid,
        counter: EmailCounter,
        by: i32,
    ) -> Result<(), RepoError> {
        // Column names come from a closed enum, never from input.
        let column = counter.column();
        sqlx::query(&format!(
            "UPDATE newsletter_emails SET {column} = {column} + $2, updated_at = now() \
             WHERE id = $1"
        ))
        .bind(id)
        .bind(by)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn claim_deliveries(
        &self,
        email_id: Uuid,
        recipients: &[(Uuid, String)],
    ) -> Result<Vec<Uuid>, RepoError> {
        if recipients.is_empty() {
            return Ok(Vec::new());
        }

        let now = OffsetDateTime::now_utc();
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO email_deliveries (id, email_id, subscriber_id, recipient, status, \
             created_at, updated_at) ",
        );
        qb.push_values(recipients, |mut row, (subscriber_id, recipient)| {
            row.push_bind(Uuid::new_v4())
                .push_bind(email_id)
                .push_bind(*subscriber_id)
                .push_bind(recipient.as_str())
                .push_bind(DeliveryStatus::Queued)
                .push_bind(now)
                .push_bind(now);
        });
        qb.push(" ON CONFLICT (email_id, subscriber_id) DO NOTHING RETURNING subscriber_id");

        qb.build_query_scalar::<Uuid>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn complete_deliveries(
        &self,
        email_id: Uuid,
        outcomes: Vec<DeliveryOutcome>,
    ) -> Result<u64, RepoError> {
        if outcomes.is_empty() {
            return Ok(0);
        }

        let mut subscriber_ids = Vec::with_capacity(outcomes.len());
        let mut statuses = Vec::with_capacity(outcomes.len());
        let mut message_ids = Vec::with_capacity(outcomes.len());
        let mut errors = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            subscriber_ids.push(outcome.subscriber_id);
            statuses.push(outcome.status);
            message_ids.push(outcome.provider_message_id);
            errors.push(outcome.error);
        }

        let settled: Vec<DeliveryStatus> = sqlx::query_scalar(
            "UPDATE email_deliveries AS d \
             SET status = v.status, provider_message_id = v.message_id, error = v.error, \
                 updated_at = now() \
             FROM UNNEST($2::uuid[], $3::delivery_status[], $4::text[], $5::text[]) \
                  AS v(subscriber_id, status, message_id, error) \
             WHERE d.email_id = $1 AND d.subscriber_id = v.subscriber_id \
               AND d.status = 'queued' \
             RETURNING d.status",
        )
        .bind(email_id)
        .bind(&subscriber_ids)
        .bind(&statuses)
        .bind(&message_ids)
        .bind(&errors)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(settled
            .into_iter()
            .filter(|status| *status == DeliveryStatus::Sent)
            .count() as u64)
    }

    async fn release_deliveries(
        &self,
        email_id: Uuid,
        subscriber_ids: &[Uuid],
    ) -> Result<u64, RepoError> {
        if subscriber_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "DELETE FROM email_deliveries \
             WHERE email_id = $1 AND subscriber_id = ANY($2) AND status = 'queued'",
        )
        .bind(email_id)
        .bind(subscriber_ids)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn find_delivery_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<DeliveryRecord>, RepoError> {
        sqlx::query_as::<_, DeliveryRecord>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM email_deliveries WHERE provider_message_id = $1"
        ))
        .bind(message_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn transition_delivery(
        &self,
        id: Uuid,
        from: &[DeliveryStatus],
        to: DeliveryStatus,
        error: Option<String>,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE email_deliveries SET status = $3, error = COALESCE($4, error), \
             updated_at = now() \
             WHERE id = $1 AND status = ANY($2)",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(error)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_delivery_opened(&self, id: Uuid, at: OffsetDateTime) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE email_deliveries SET opened_at = $2, updated_at = now() \
             WHERE id = $1 AND opened_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_delivery_clicked(
        &self,
        id: Uuid,
        at: OffsetDateTime,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE email_deliveries SET clicked_at = $2, updated_at = now() \
             WHERE id = $1 AND clicked_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_delivery_error(&self, id: Uuid, error: &str) -> Result<(), RepoError> {
        sqlx::query("UPDATE email_deliveries SET error = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
