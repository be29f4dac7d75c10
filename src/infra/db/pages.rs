use async_trait::async_trait;
use sqlx::QueryBuilder;
use uuid::Uuid;

use crate::{
    application::pagination::{CursorKind, CursorPage, PageRequest, TimeCursor},
    application::repos::{
        CreatePageParams, PageQueryFilter, PagesRepo, RepoError, UpdatePageParams,
    },
    domain::entities::PageRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

const PAGE_COLUMNS: &str = "id, workspace_id, slug, title, description, custom_domain, \
    language, created_at, updated_at";

#[async_trait]
impl PagesRepo for PostgresRepositories {
    async fn list_pages(
        &self,
        workspace_id: Uuid,
        filter: &PageQueryFilter,
        page: PageRequest<TimeCursor>,
    ) -> Result<CursorPage<PageRecord>, RepoError> {
        let limit = Self::clamp_limit(page.limit);
        let mut qb = QueryBuilder::new(format!("SELECT {PAGE_COLUMNS} FROM pages WHERE "));
        qb.push("workspace_id = ");
        qb.push_bind(workspace_id);

        if let Some(search) = filter.search.as_ref() {
            let pattern = Self::like_pattern(search);
            qb.push(" AND (title ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR slug ILIKE ");
            qb.push_bind(pattern);
            qb.push(")");
        }

        Self::push_time_cursor(&mut qb, "created_at", "id", page.cursor);

        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        qb.push_bind(limit + 1);

        let rows = qb
            .build_query_as::<PageRecord>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(CursorPage::from_overfetch(rows, limit as u32, |row| {
            TimeCursor::new(CursorKind::Pages, row.created_at, row.id)
        }))
    }

    async fn list_all_pages(&self, workspace_id: Uuid) -> Result<Vec<PageRecord>, RepoError> {
        sqlx::query_as::<_, PageRecord>(&format!(
            "SELECT {PAGE_COLUMNS} FROM pages WHERE workspace_id = $1 ORDER BY slug"
        ))
        .bind(workspace_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_page(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Option<PageRecord>, RepoError> {
        sqlx::query_as::<_, PageRecord>(&format!(
            "SELECT {PAGE_COLUMNS} FROM pages WHERE workspace_id = $1 AND id = $2"
        ))
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_page_by_slug(&self, slug: &str) -> Result<Option<PageRecord>, RepoError> {
        sqlx::query_as::<_, PageRecord>(&format!(
            "SELECT {PAGE_COLUMNS} FROM pages WHERE slug = $1"
        ))
        .bind(slug)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_page_by_domain(&self, domain: &str) -> Result<Option<PageRecord>, RepoError> {
        sqlx::query_as::<_, PageRecord>(&format!(
            "SELECT {PAGE_COLUMNS} FROM pages WHERE custom_domain = $1"
        ))
        .bind(domain)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn create_page(&self, params: CreatePageParams) -> Result<PageRecord, RepoError> {
        sqlx::query_as::<_, PageRecord>(&format!(
            "INSERT INTO pages (id, workspace_id, slug, title, description, custom_domain, \
             language, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, now(), now()) RETURNING {PAGE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(params.workspace_id)
        .bind(&params.slug)
        .bind(&params.title)
        .bind(&params.description)
        .bind(&params.custom_domain)
        .bind(&params.language)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn update_page(&self, params: UpdatePageParams) -> Result<PageRecord, RepoError> {
        sqlx::query_as::<_, PageRecord>(&format!(
            "UPDATE pages SET slug = $3, title = $4, description = $5, custom_domain = $6, \
             language = $7, updated_at = now() \
             WHERE workspace_id = $1 AND id = $2 RETURNING {PAGE_COLUMNS}"
        ))
        .bind(params.workspace_id)
        .bind(params.id)
        .bind(&params.slug)
        .bind(&params.title)
        .bind(&params.description)
        .bind(&params.custom_domain)
        .bind(&params.language)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn delete_page(&self, workspace_id: Uuid, id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM pages WHERE workspace_id = $1 AND id = $2")
            .bind(workspace_id)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Self::require_one(result.rows_affected())
    }
}
