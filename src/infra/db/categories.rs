use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    application::repos::{
        CategoriesRepo, CategoryWithCount, CreateCategoryParams, RepoError, UpdateCategoryParams,
    },
    domain::{entities::CategoryRecord, types::PostStatus},
};

use super::{PostgresRepositories, map_sqlx_error};

const CATEGORY_COLUMNS: &str =
    "id, page_id, slug, name, description, position, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct CategoryCountRow {
    #[sqlx(flatten)]
    category: CategoryRecord,
    published_posts: i64,
}

#[async_trait]
impl CategoriesRepo for PostgresRepositories {
    async fn list_categories(&self, page_id: Uuid) -> Result<Vec<CategoryWithCount>, RepoError> {
        let rows = sqlx::query_as::<_, CategoryCountRow>(
            "SELECT c.id, c.page_id, c.slug, c.name, c.description, c.position, \
             c.created_at, c.updated_at, \
             COUNT(p.id) FILTER (WHERE p.status = $2) AS published_posts \
             FROM categories c \
             LEFT JOIN post_categories pc ON pc.category_id = c.id \
             LEFT JOIN posts p ON p.id = pc.post_id \
             WHERE c.page_id = $1 \
             GROUP BY c.id \
             ORDER BY c.position, c.name",
        )
        .bind(page_id)
        .bind(PostStatus::Published)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| {
                Ok(CategoryWithCount {
                    category: row.category,
                    published_posts: Self::convert_count(row.published_posts)?,
                })
            })
            .collect()
    }

    async fn find_category(
        &self,
        page_id: Uuid,
        id: Uuid,
    ) -> Result<Option<CategoryRecord>, RepoError> {
        sqlx::query_as::<_, CategoryRecord>(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE page_id = $1 AND id = $2"
        ))
        .bind(page_id)
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_category_by_slug(
        &self,
        page_id: Uuid,
        slug: &str,
    ) -> Result<Option<CategoryRecord>, RepoError> {
        sqlx::query_as::<_, CategoryRecord>(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE page_id = $1 AND slug = $2"
        ))
        .bind(page_id)
        .bind(slug)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn create_category(
        &self,
        params: CreateCategoryParams,
    ) -> Result<CategoryRecord, RepoError> {
        sqlx::query_as::<_, CategoryRecord>(&format!(
            "INSERT INTO categories (id, page_id, slug, name, description, position, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, now(), now()) RETURNING {CATEGORY_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(params.page_id)
        .bind(&params.slug)
        .bind(&params.name)
        .bind(&params.description)
        .bind(params.position)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn update_category(
        &self,
        params: UpdateCategoryParams,
    ) -> Result<CategoryRecord, RepoError> {
        sqlx::query_as::<_, CategoryRecord>(&format!(
            "UPDATE categories SET slug = $3, name = $4, description = $5, position = $6, \
             updated_at = now() WHERE page_id = $1 AND id = $2 RETURNING {CATEGORY_COLUMNS}"
        ))
        .bind(params.page_id)
        .bind(params.id)
        .bind(&params.slug)
        .bind(&params.name)
        .bind(&params.description)
        .bind(params.position)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn delete_category(&self, page_id: Uuid, id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM categories WHERE page_id = $1 AND id = $2")
            .bind(page_id)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Self::require_one(result.rows_affected())
    }

    async fn count_categories_in_page(
        &self,
        page_id: Uuid,
        ids: &[Uuid],
    ) -> Result<u64, RepoError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM categories WHERE page_id = $1 AND id = ANY($2)",
        )
        .bind(page_id)
        .bind(ids)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Self::convert_count(count)
    }
}
