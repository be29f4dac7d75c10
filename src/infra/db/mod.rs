//! Postgres-backed repository implementations.

mod api_keys;
mod audit;
mod authors;
mod categories;
mod emails;
mod jobs;
mod links;
mod newsletters;
mod pages;
mod posts;
mod revisions;
mod subscribers;
mod util;
mod workspaces;

pub use util::map_sqlx_error;

use std::sync::Arc;

use apalis_sql::postgres::PostgresStorage;
use sqlx::{
    Postgres, QueryBuilder, Transaction,
    postgres::{PgPool, PgPoolOptions},
    query,
};

use crate::application::pagination::TimeCursor;
use crate::application::repos::RepoError;

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    /// Applies the job queue schema, then the application schema.
    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        PostgresStorage::<()>::setup(pool).await?;

        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator.run(pool).await.map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }

    /// Appends `AND (expr, id) < (cursor.at, cursor.id)` for descending keyset pages.
    fn push_time_cursor<'q>(
        qb: &mut QueryBuilder<'q, Postgres>,
        time_expr: &str,
        id_column: &str,
        cursor: Option<TimeCursor>,
    ) {
        if let Some(cursor) = cursor {
            qb.push(" AND (");
            qb.push(time_expr);
            qb.push(", ");
            qb.push(id_column);
            qb.push(") < (");
            qb.push_bind(cursor.at());
            qb.push(", ");
            qb.push_bind(cursor.id());
            qb.push(")");
        }
    }

    fn clamp_limit(limit: u32) -> i64 {
        i64::from(limit.clamp(1, 200))
    }

    fn like_pattern(value: &str) -> String {
        let escaped = value
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        format!("%{escaped}%")
    }

    fn convert_count(value: i64) -> Result<u64, RepoError> {
        value
            .try_into()
            .map_err(|_| RepoError::from_persistence("count exceeds supported range"))
    }

    fn require_one(rows_affected: u64) -> Result<(), RepoError> {
        if rows_affected == 0 {
            Err(RepoError::NotFound)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(PostgresRepositories::like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn negative_counts_are_rejected() {
        assert!(PostgresRepositories::convert_count(-1).is_err());
        assert_eq!(PostgresRepositories::convert_count(7).unwrap(), 7);
    }
}
