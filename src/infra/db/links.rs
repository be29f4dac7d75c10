use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    application::repos::{LinkParams, LinksRepo, RepoError},
    domain::entities::LinkRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

const LINK_COLUMNS: &str = "id, page_id, label, url, position, visible, created_at, updated_at";

#[async_trait]
impl LinksRepo for PostgresRepositories {
    async fn list_links(
        &self,
        page_id: Uuid,
        visible_only: bool,
    ) -> Result<Vec<LinkRecord>, RepoError> {
        sqlx::query_as::<_, LinkRecord>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE page_id = $1 \
             AND ($2 = FALSE OR visible) ORDER BY position, created_at"
        ))
        .bind(page_id)
        .bind(visible_only)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_link(&self, page_id: Uuid, id: Uuid) -> Result<Option<LinkRecord>, RepoError> {
        sqlx::query_as::<_, LinkRecord>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE page_id = $1 AND id = $2"
        ))
        .bind(page_id)
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn create_link(&self, params: LinkParams) -> Result<LinkRecord, RepoError> {
        sqlx::query_as::<_, LinkRecord>(&format!(
            "INSERT INTO links (id, page_id, label, url, position, visible, created_at, updated_at) \
             SELECT $1, $2, $3, $4, COALESCE(MAX(position) + 1, 0), $5, now(), now() \
             FROM links WHERE page_id = $2 \
             RETURNING {LINK_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(params.page_id)
        .bind(&params.label)
        .bind(&params.url)
        .bind(params.visible)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn update_link(&self, id: Uuid, params: LinkParams) -> Result<LinkRecord, RepoError> {
        sqlx::query_as::<_, LinkRecord>(&format!(
            "UPDATE links SET label = $3, url = $4, visible = $5, updated_at = now() \
             WHERE page_id = $1 AND id = $2 RETURNING {LINK_COLUMNS}"
        ))
        .bind(params.page_id)
        .bind(id)
        .bind(&params.label)
        .bind(&params.url)
        .bind(params.visible)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn delete_link(&self, page_id: Uuid, id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM links WHERE page_id = $1 AND id = $2")
            .bind(page_id)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Self::require_one(result.rows_affected())
    }

    async fn reorder_links(&self, page_id: Uuid, ordered_ids: &[Uuid]) -> Result<(), RepoError> {
        sqlx::query(
            "UPDATE links SET position = ordered.ordinality - 1, updated_at = now() \
             FROM UNNEST($2::uuid[]) WITH ORDINALITY AS ordered(id, ordinality) \
             WHERE links.page_id = $1 AND links.id = ordered.id",
        )
        .bind(page_id)
        .bind(ordered_ids)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}
