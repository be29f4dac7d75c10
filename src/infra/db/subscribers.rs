use async_trait::async_trait;
use sqlx::QueryBuilder;
use uuid::Uuid;

use crate::{
    application::pagination::{CursorKind, CursorPage, PageRequest, TimeCursor},
    application::repos::{
        CreateSubscriberParams, RepoError, ResubscribeParams, SubscriberCounts,
        SubscriberQueryFilter, SubscriberStatusChange, SubscribersRepo,
    },
    domain::{entities::SubscriberRecord, types::SubscriberStatus},
};

use super::{PostgresRepositories, map_sqlx_error};

const SUBSCRIBER_COLUMNS: &str = "id, newsletter_id, email, status, confirmation_token, \
    unsubscribe_token, source, confirmed_at, unsubscribed_at, created_at, updated_at";

#[async_trait]
impl SubscribersRepo for PostgresRepositories {
    async fn list_subscribers(
        &self,
        newsletter_id: Uuid,
        filter: &SubscriberQueryFilter,
        page: PageRequest<TimeCursor>,
    ) -> Result<CursorPage<SubscriberRecord>, RepoError> {
        let limit = Self::clamp_limit(page.limit);
        let mut qb = QueryBuilder::new(format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE "
        ));
        qb.push("newsletter_id = ");
        qb.push_bind(newsletter_id);

        if let Some(status) = filter.status {
            qb.push(" AND status = ");
            qb.push_bind(status);
        }

        if let Some(search) = filter.search.as_ref() {
            qb.push(" AND email ILIKE ");
            qb.push_bind(Self::like_pattern(search));
        }

        Self::push_time_cursor(&mut qb, "created_at", "id", page.cursor);

        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        qb.push_bind(limit + 1);

        let rows = qb
            .build_query_as::<SubscriberRecord>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(CursorPage::from_overfetch(rows, limit as u32, |row| {
            TimeCursor::new(CursorKind::Subscribers, row.created_at, row.id)
        }))
    }

    async fn count_by_status(&self, newsletter_id: Uuid) -> Result<SubscriberCounts, RepoError> {
        let rows: Vec<(SubscriberStatus, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM subscribers WHERE newsletter_id = $1 GROUP BY status",
        )
        .bind(newsletter_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let mut counts = SubscriberCounts::default();
        for (status, count) in rows {
            counts.add(status, Self::convert_count(count)?);
        }
        Ok(counts)
    }

    async fn find_subscriber(
        &self,
        newsletter_id: Uuid,
        id: Uuid,
    ) -> Result<Option<SubscriberRecord>, RepoError> {
        sqlx::query_as::<_, SubscriberRecord>(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE newsletter_id = $1 AND id = $2"
        ))
        .bind(newsletter_id)
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_subscriber_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<SubscriberRecord>, RepoError> {
        sqlx::query_as::<_, SubscriberRecord>(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_subscriber_by_email(
        &self,
        newsletter_id: Uuid,
        email: &str,
    ) -> Result<Option<SubscriberRecord>, RepoError> {
        sqlx::query_as::<_, SubscriberRecord>(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE newsletter_id = $1 AND email = $2"
        ))
        .bind(newsletter_id)
        .bind(email)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_by_confirmation_token(
        &self,
        token: &str,
    ) -> Result<Option<SubscriberRecord>, RepoError> {
        sqlx::query_as::<_, SubscriberRecord>(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE confirmation_token = $1"
        ))
        .bind(token)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_by_unsubscribe_token(
        &self,
        token: &str,
    ) -> Result<Option<SubscriberRecord>, RepoError> {
        sqlx::query_as::<_, SubscriberRecord>(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE unsubscribe_token = $1"
        ))
        .bind(token)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn create_subscriber(
        &self,
        params: CreateSubscriberParams,
    ) -> Result<SubscriberRecord, RepoError> {
        sqlx::query_as::<_, SubscriberRecord>(&format!(
            "INSERT INTO subscribers (id, newsletter_id, email, status, confirmation_token, \
             unsubscribe_token, source, confirmed_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now(), now()) \
             RETURNING {SUBSCRIBER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(params.newsletter_id)
        .bind(&params.email)
        .bind(params.status)
        .bind(&params.confirmation_token)
        .bind(&params.unsubscribe_token)
        .bind(&params.source)
        .bind(params.confirmed_at)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn update_subscriber_status(
        &self,
        change: SubscriberStatusChange,
    ) -> Result<SubscriberRecord, RepoError> {
        sqlx::query_as::<_, SubscriberRecord>(&format!(
            "UPDATE subscribers SET status = $2, \
             confirmed_at = $3, unsubscribed_at = $4, updated_at = now() \
             WHERE id = $1 RETURNING {SUBSCRIBER_COLUMNS}"
        ))
        .bind(change.id)
        .bind(change.status)
        .bind(change.confirmed_at)
        .bind(change.unsubscribed_at)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn resubscribe(&self, params: ResubscribeParams) -> Result<SubscriberRecord, RepoError> {
        sqlx::query_as::<_, SubscriberRecord>(&format!(
            "UPDATE subscribers SET status = $2, confirmation_token = $3, \
             unsubscribe_token = $4, confirmed_at = $5, unsubscribed_at = NULL, \
             updated_at = now() \
             WHERE id = $1 RETURNING {SUBSCRIBER_COLUMNS}"
        ))
        .bind(params.id)
        .bind(params.status)
        .bind(&params.confirmation_token)
        .bind(&params.unsubscribe_token)
        .bind(params.confirmed_at)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn delete_subscriber(&self, newsletter_id: Uuid, id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM subscribers WHERE newsletter_id = $1 AND id = $2")
            .bind(newsletter_id)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Self::require_one(result.rows_affected())
    }

    async fn list_confirmed_after(
        &self,
        newsletter_id: Uuid,
        after: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<SubscriberRecord>, RepoError> {
        sqlx::query_as::<_, SubscriberRecord>(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers \
             WHERE newsletter_id = $1 AND status = $2 AND ($3::uuid IS NULL OR id > $3) \
             ORDER BY id LIMIT $4"
        ))
        .bind(newsletter_id)
        .bind(SubscriberStatus::Confirmed)
        .bind(after)
        .bind(i64::from(limit.max(1)))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }
}
