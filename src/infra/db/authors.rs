use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    application::repos::{AuthorParams, AuthorsRepo, RepoError},
    domain::entities::AuthorRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

const AUTHOR_COLUMNS: &str = "id, page_id, member_id, slug, name, bio, avatar_url, website_url, \
    created_at, updated_at";

#[async_trait]
impl AuthorsRepo for PostgresRepositories {
    async fn list_authors(&self, page_id: Uuid) -> Result<Vec<AuthorRecord>, RepoError> {
        sqlx::query_as::<_, AuthorRecord>(&format!(
            "SELECT {AUTHOR_COLUMNS} FROM authors WHERE page_id = $1 ORDER BY name, id"
        ))
        .bind(page_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_author(
        &self,
        page_id: Uuid,
        id: Uuid,
    ) -> Result<Option<AuthorRecord>, RepoError> {
        sqlx::query_as::<_, AuthorRecord>(&format!(
            "SELECT {AUTHOR_COLUMNS} FROM authors WHERE page_id = $1 AND id = $2"
        ))
        .bind(page_id)
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_author_by_slug(
        &self,
        page_id: Uuid,
        slug: &str,
    ) -> Result<Option<AuthorRecord>, RepoError> {
        sqlx::query_as::<_, AuthorRecord>(&format!(
            "SELECT {AUTHOR_COLUMNS} FROM authors WHERE page_id = $1 AND slug = $2"
        ))
        .bind(page_id)
        .bind(slug)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn create_author(&self, params: AuthorParams) -> Result<AuthorRecord, RepoError> {
        sqlx::query_as::<_, AuthorRecord>(&format!(
            "INSERT INTO authors (id, page_id, member_id, slug, name, bio, avatar_url, \
             website_url, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now(), now()) RETURNING {AUTHOR_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(params.page_id)
        .bind(params.member_id)
        .bind(&params.slug)
        .bind(&params.name)
        .bind(&params.bio)
        .bind(&params.avatar_url)
        .bind(&params.website_url)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn update_author(
        &self,
        id: Uuid,
        params: AuthorParams,
    ) -> Result<AuthorRecord, RepoError> {
        sqlx::query_as::<_, AuthorRecord>(&format!(
            "UPDATE authors SET member_id = $3, slug = $4, name = $5, bio = $6, \
             avatar_url = $7, website_url = $8, updated_at = now() \
             WHERE page_id = $1 AND id = $2 RETURNING {AUTHOR_COLUMNS}"
        ))
        .bind(params.page_id)
        .bind(id)
        .bind(params.member_id)
        .bind(&params.slug)
        .bind(&params.name)
        .bind(&params.bio)
        .bind(&params.avatar_url)
        .bind(&params.website_url)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn delete_author(&self, page_id: Uuid, id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM authors WHERE page_id = $1 AND id = $2")
            .bind(page_id)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Self::require_one(result.rows_affected())
    }

    async fn count_author_posts(&self, id: Uuid) -> Result<u64, RepoError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM post_authors WHERE author_id = $1")
                .bind(id)
                .fetch_one(self.pool())
                .await
                .map_err(map_sqlx_error)?;
        Self::convert_count(count)
    }

    async fn count_authors_in_page(&self, page_id: Uuid, ids: &[Uuid]) -> Result<u64, RepoError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM authors WHERE page_id = $1 AND id = ANY($2)")
                .bind(page_id)
                .bind(ids)
                .fetch_one(self.pool())
                .await
                .map_err(map_sqlx_error)?;
        Self::convert_count(count)
    }
}
