use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    application::repos::{NewsletterParams, NewslettersRepo, RepoError},
    domain::entities::NewsletterRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

const NEWSLETTER_COLUMNS: &str = "id, page_id, slug, name, description, sender_name, \
    sender_email, reply_to, double_opt_in, created_at, updated_at";

#[async_trait]
impl NewslettersRepo for PostgresRepositories {
    async fn list_newsletters(&self, page_id: Uuid) -> Result<Vec<NewsletterRecord>, RepoError> {
        sqlx::query_as::<_, NewsletterRecord>(&format!(
            "SELECT {NEWSLETTER_COLUMNS} FROM newsletters WHERE page_id = $1 ORDER BY name, id"
        ))
        .bind(page_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_newsletter(
        &self,
        page_id: Uuid,
        id: Uuid,
    ) -> Result<Option<NewsletterRecord>, RepoError> {
        sqlx::query_as::<_, NewsletterRecord>(&format!(
            "SELECT {NEWSLETTER_COLUMNS} FROM newsletters WHERE page_id = $1 AND id = $2"
        ))
        .bind(page_id)
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_newsletter_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<NewsletterRecord>, RepoError> {
        sqlx::query_as::<_, NewsletterRecord>(&format!(
            "SELECT {NEWSLETTER_COLUMNS} FROM newsletters WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_newsletter_by_slug(
        &self,
        page_id: Uuid,
        slug: &str,
    ) -> Result<Option<NewsletterRecord>, RepoError> {
        sqlx::query_as::<_, NewsletterRecord>(&format!(
            "SELECT {NEWSLETTER_COLUMNS} FROM newsletters WHERE page_id = $1 AND slug = $2"
        ))
        .bind(page_id)
        .bind(slug)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn create_newsletter(
        &self,
        params: NewsletterParams,
    ) -> Result<NewsletterRecord, RepoError> {
        sqlx::query_as::<_, NewsletterRecord>(&format!(
            "INSERT INTO newsletters (id, page_id, slug, name, description, sender_name, \
             sender_email, reply_to, double_opt_in, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now(), now()) \
             RETURNING {NEWSLETTER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(params.page_id)
        .bind(&params.slug)
        .bind(&params.name)
        .bind(&params.description)
        .bind(&params.sender_name)
        .bind(&params.sender_email)
        .bind(&params.reply_to)
        .bind(params.double_opt_in)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn update_newsletter(
        &self,
        id: Uuid,
        params: NewsletterParams,
    ) -> Result<NewsletterRecord, RepoError> {
        sqlx::query_as::<_, NewsletterRecord>(&format!(
            "UPDATE newsletters SET slug = $3, name = $4, description = $5, sender_name = $6, \
             sender_email = $7, reply_to = $8, double_opt_in = $9, updated_at = now() \
             WHERE page_id = $1 AND id = $2 RETURNING {NEWSLETTER_COLUMNS}"
        ))
        .bind(params.page_id)
        .bind(id)
        .bind(&params.slug)
        .bind(&params.name)
        .bind(&params.description)
        .bind(&params.sender_name)
        .bind(&params.sender_email)
        .bind(&params.reply_to)
        .bind(params.double_opt_in)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn delete_newsletter(&self, page_id: Uuid, id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM newsletters WHERE page_id = $1 AND id = $2")
            .bind(page_id)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Self::require_one(result.rows_affected())
    }
}
