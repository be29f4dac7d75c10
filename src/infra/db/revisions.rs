use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    application::repos::{CreateRevisionParams, RepoError, RevisionsRepo},
    domain::entities::RevisionRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

const REVISION_COLUMNS: &str =
    "id, post_id, version, title, excerpt, body_html, digest, created_by, created_at";

#[async_trait]
impl RevisionsRepo for PostgresRepositories {
    async fn latest_revision(&self, post_id: Uuid) -> Result<Option<RevisionRecord>, RepoError> {
        sqlx::query_as::<_, RevisionRecord>(&format!(
            "SELECT {REVISION_COLUMNS} FROM post_revisions WHERE post_id = $1 \
             ORDER BY version DESC LIMIT 1"
        ))
        .bind(post_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_revision(
        &self,
        post_id: Uuid,
        id: Uuid,
    ) -> Result<Option<RevisionRecord>, RepoError> {
        sqlx::query_as::<_, RevisionRecord>(&format!(
            "SELECT {REVISION_COLUMNS} FROM post_revisions WHERE post_id = $1 AND id = $2"
        ))
        .bind(post_id)
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn list_revisions(&self, post_id: Uuid) -> Result<Vec<RevisionRecord>, RepoError> {
        sqlx::query_as::<_, RevisionRecord>(&format!(
            "SELECT {REVISION_COLUMNS} FROM post_revisions WHERE post_id = $1 \
             ORDER BY version DESC"
        ))
        .bind(post_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn create_revision(
        &self,
        params: CreateRevisionParams,
    ) -> Result<RevisionRecord, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        // Serialises concurrent writers on the same post.
        sqlx::query("SELECT id FROM posts WHERE id = $1 FOR UPDATE")
            .bind(params.post_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let record = sqlx::query_as::<_, RevisionRecord>(&format!(
            "INSERT INTO post_revisions (id, post_id, version, title, excerpt, body_html, digest, \
             created_by, created_at) \
             SELECT $1, $2, COALESCE(MAX(version), 0) + 1, $3, $4, $5, $6, $7, now() \
             FROM post_revisions WHERE post_id = $2 \
             RETURNING {REVISION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(params.post_id)
        .bind(&params.title)
        .bind(&params.excerpt)
        .bind(&params.body_html)
        .bind(&params.digest)
        .bind(&params.created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(record)
    }

    async fn prune_revisions(
        &self,
        post_id: Uuid,
        keep: usize,
        protect: Option<Uuid>,
    ) -> Result<u64, RepoError> {
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        // The protected revision counts against `keep` wherever it sits.
        let result = sqlx::query(
            "DELETE FROM post_revisions WHERE post_id = $1 \
             AND ($3::uuid IS NULL OR id <> $3) \
             AND id NOT IN ( \
                 SELECT id FROM post_revisions WHERE post_id = $1 \
                 AND ($3::uuid IS NULL OR id <> $3) \
                 ORDER BY version DESC \
                 LIMIT GREATEST($2 - ( \
                     SELECT COUNT(*) FROM post_revisions WHERE post_id = $1 AND id = $3 \
                 ), 0) \
             )",
        )
        .bind(post_id)
        .bind(keep)
        .bind(protect)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}
