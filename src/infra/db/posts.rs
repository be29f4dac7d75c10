use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::pagination::{CursorKind, CursorPage, PageRequest, TimeCursor},
    application::repos::{
        CreatePostParams, PostListScope, PostQueryFilter, PostsRepo, RepoError,
        UpdatePostContentParams, UpdatePostStatusParams, post_primary_time,
    },
    domain::{
        entities::{AuthorRecord, CategoryRecord, PostRecord},
        types::PostStatus,
    },
};

use super::{PostgresRepositories, map_sqlx_error};

const POST_COLUMNS: &str = "p.id, p.workspace_id, p.page_id, p.slug, p.title, p.excerpt, \
    p.body_html, p.status, p.published_revision_id, p.scheduled_at, p.published_at, \
    p.archived_at, p.created_at, p.updated_at";

const POSTS_PRIMARY_TIME_EXPR: &str = "CASE \
    WHEN p.status = 'published'::post_status THEN \
        COALESCE(p.published_at, p.updated_at) \
    ELSE \
        p.updated_at \
END";

impl PostgresRepositories {
    fn apply_scope_conditions(qb: &mut QueryBuilder<'_, Postgres>, scope: PostListScope) {
        match scope {
            PostListScope::Public => {
                qb.push(" AND p.status = ");
                qb.push_bind(PostStatus::Published);
                qb.push(" AND p.published_revision_id IS NOT NULL");
            }
            PostListScope::Admin { status } => {
                if let Some(status) = status {
                    qb.push(" AND p.status = ");
                    qb.push_bind(status);
                }
            }
        }
    }

    fn apply_post_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &PostQueryFilter) {
        if let Some(category) = filter.category.as_ref() {
            qb.push(
                " AND EXISTS (SELECT 1 FROM post_categories pc \
                 INNER JOIN categories c ON c.id = pc.category_id \
                 WHERE pc.post_id = p.id AND c.slug = ",
            );
            qb.push_bind(category.clone());
            qb.push(")");
        }

        if let Some(author) = filter.author.as_ref() {
            qb.push(
                " AND EXISTS (SELECT 1 FROM post_authors pa \
                 INNER JOIN authors a ON a.id = pa.author_id \
                 WHERE pa.post_id = p.id AND a.slug = ",
            );
            qb.push_bind(author.clone());
            qb.push(")");
        }

        if let Some(search) = filter.search.as_ref() {
            let pattern = Self::like_pattern(search);
            qb.push(" AND (p.title ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR p.slug ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR p.excerpt ILIKE ");
            qb.push_bind(pattern);
            qb.push(")");
        }
    }
}

#[async_trait]
impl PostsRepo for PostgresRepositories {
    async fn list_posts(
        &self,
        page_id: Uuid,
        scope: PostListScope,
        filter: &PostQueryFilter,
        page: PageRequest<TimeCursor>,
    ) -> Result<CursorPage<PostRecord>, RepoError> {
        let limit = Self::clamp_limit(page.limit);
        let mut qb = QueryBuilder::new(format!("SELECT {POST_COLUMNS} FROM posts p WHERE "));
        qb.push("p.page_id = ");
        qb.push_bind(page_id);

        Self::apply_scope_conditions(&mut qb, scope);
        Self::apply_post_filter(&mut qb, filter);
        Self::push_time_cursor(&mut qb, POSTS_PRIMARY_TIME_EXPR, "p.id", page.cursor);

        qb.push(" ORDER BY ");
        qb.push(POSTS_PRIMARY_TIME_EXPR);
        qb.push(" DESC, p.id DESC LIMIT ");
        qb.push_bind(limit + 1);

        let rows = qb
            .build_query_as::<PostRecord>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(CursorPage::from_overfetch(rows, limit as u32, |row| {
            TimeCursor::new(CursorKind::Posts, post_primary_time(row), row.id)
        }))
    }

    async fn list_all_posts(&self, page_id: Uuid) -> Result<Vec<PostRecord>, RepoError> {
        sqlx::query_as::<_, PostRecord>(&format!(
            "SELECT {POST_COLUMNS} FROM posts p WHERE p.page_id = $1 ORDER BY p.created_at, p.id"
        ))
        .bind(page_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_post(&self, page_id: Uuid, id: Uuid) -> Result<Option<PostRecord>, RepoError> {
        sqlx::query_as::<_, PostRecord>(&format!(
            "SELECT {POST_COLUMNS} FROM posts p WHERE p.page_id = $1 AND p.id = $2"
        ))
        .bind(page_id)
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_post_by_id(&self, id: Uuid) -> Result<Option<PostRecord>, RepoError> {
        sqlx::query_as::<_, PostRecord>(&format!(
            "SELECT {POST_COLUMNS} FROM posts p WHERE p.id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_post_by_slug(
        &self,
        page_id: Uuid,
        slug: &str,
    ) -> Result<Option<PostRecord>, RepoError> {
        sqlx::query_as::<_, PostRecord>(&format!(
            "SELECT {POST_COLUMNS} FROM posts p WHERE p.page_id = $1 AND p.slug = $2"
        ))
        .bind(page_id)
        .bind(slug)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        sqlx::query_as::<_, PostRecord>(&format!(
            "INSERT INTO posts AS p (id, workspace_id, page_id, slug, title, excerpt, body_html, \
             status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now(), now()) RETURNING {POST_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(params.workspace_id)
        .bind(params.page_id)
        .bind(&params.slug)
        .bind(&params.title)
        .bind(&params.excerpt)
        .bind(&params.body_html)
        .bind(PostStatus::Draft)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn update_post_content(
        &self,
        params: UpdatePostContentParams,
    ) -> Result<PostRecord, RepoError> {
        sqlx::query_as::<_, PostRecord>(&format!(
            "UPDATE posts AS p SET slug = $2, title = $3, excerpt = $4, body_html = $5, \
             updated_at = now() WHERE p.id = $1 RETURNING {POST_COLUMNS}"
        ))
        .bind(params.id)
        .bind(&params.slug)
        .bind(&params.title)
        .bind(&params.excerpt)
        .bind(&params.body_html)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn update_post_status(
        &self,
        params: UpdatePostStatusParams,
    ) -> Result<PostRecord, RepoError> {
        sqlx::query_as::<_, PostRecord>(&format!(
            "UPDATE posts AS p SET status = $2, published_revision_id = $3, scheduled_at = $4, \
             published_at = $5, archived_at = $6, updated_at = now() \
             WHERE p.id = $1 RETURNING {POST_COLUMNS}"
        ))
        .bind(params.id)
        .bind(params.status)
        .bind(params.published_revision_id)
        .bind(params.scheduled_at)
        .bind(params.published_at)
        .bind(params.archived_at)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn delete_post(&self, page_id: Uuid, id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM posts WHERE page_id = $1 AND id = $2")
            .bind(page_id)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Self::require_one(result.rows_affected())
    }

    async fn list_due_scheduled(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<PostRecord>, RepoError> {
        sqlx::query_as::<_, PostRecord>(&format!(
            "SELECT {POST_COLUMNS} FROM posts p \
             WHERE p.status = $1 AND p.scheduled_at IS NOT NULL AND p.scheduled_at <= $2 \
             ORDER BY p.scheduled_at, p.id LIMIT $3"
        ))
        .bind(PostStatus::Scheduled)
        .bind(now)
        .bind(Self::clamp_limit(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn replace_post_categories(
        &self,
        post_id: Uuid,
        category_ids: &[Uuid],
    ) -> Result<(), RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        sqlx::query("DELETE FROM post_categories WHERE post_id = $1")
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if !category_ids.is_empty() {
            sqlx::query(
                "INSERT INTO post_categories (post_id, category_id) \
                 SELECT $1, UNNEST($2::uuid[]) ON CONFLICT DO NOTHING",
            )
            .bind(post_id)
            .bind(category_ids)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn replace_post_authors(
        &self,
        post_id: Uuid,
        author_ids: &[Uuid],
    ) -> Result<(), RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        sqlx::query("DELETE FROM post_authors WHERE post_id = $1")
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if !author_ids.is_empty() {
            sqlx::query(
                "INSERT INTO post_authors (post_id, author_id, position) \
                 SELECT $1, ids.author_id, (ids.ordinality - 1)::int \
                 FROM UNNEST($2::uuid[]) WITH ORDINALITY AS ids(author_id, ordinality) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(post_id)
            .bind(author_ids)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn list_post_categories(
        &self,
        post_id: Uuid,
    ) -> Result<Vec<CategoryRecord>, RepoError> {
        sqlx::query_as::<_, CategoryRecord>(
            "SELECT c.id, c.page_id, c.slug, c.name, c.description, c.position, \
             c.created_at, c.updated_at \
             FROM categories c INNER JOIN post_categories pc ON pc.category_id = c.id \
             WHERE pc.post_id = $1 ORDER BY c.position, c.name",
        )
        .bind(post_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn list_post_authors(&self, post_id: Uuid) -> Result<Vec<AuthorRecord>, RepoError> {
        sqlx::query_as::<_, AuthorRecord>(
            "SELECT a.id, a.page_id, a.member_id, a.slug, a.name, a.bio, a.avatar_url, \
             a.website_url, a.created_at, a.updated_at \
             FROM authors a INNER JOIN post_authors pa ON pa.author_id = a.id \
             WHERE pa.post_id = $1 ORDER BY pa.position, a.name",
        )
        .bind(post_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }
}
