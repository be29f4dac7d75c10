use async_trait::async_trait;
use sqlx::QueryBuilder;
use uuid::Uuid;

use crate::{
    application::pagination::{CursorKind, CursorPage, PageRequest, TimeCursor},
    application::repos::{AuditQueryFilter, AuditRepo, RepoError},
    domain::entities::AuditLogRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl AuditRepo for PostgresRepositories {
    async fn append_log(&self, record: AuditLogRecord) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO audit_logs (id, workspace_id, actor, action, entity_type, entity_id, \
             payload_text, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(record.id)
        .bind(record.workspace_id)
        .bind(&record.actor)
        .bind(&record.action)
        .bind(&record.entity_type)
        .bind(&record.entity_id)
        .bind(&record.payload_text)
        .bind(record.created_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn list_logs(
        &self,
        workspace_id: Uuid,
        filter: &AuditQueryFilter,
        page: PageRequest<TimeCursor>,
    ) -> Result<CursorPage<AuditLogRecord>, RepoError> {
        let limit = Self::clamp_limit(page.limit);
        let mut qb = QueryBuilder::new(
            "SELECT id, workspace_id, actor, action, entity_type, entity_id, payload_text, \
             created_at FROM audit_logs WHERE workspace_id = ",
        );
        qb.push_bind(workspace_id);

        if let Some(actor) = filter.actor.as_ref() {
            qb.push(" AND actor ILIKE ");
            qb.push_bind(Self::like_pattern(actor));
        }

        if let Some(action) = filter.action.as_ref() {
            qb.push(" AND action ILIKE ");
            qb.push_bind(Self::like_pattern(action));
        }

        if let Some(entity_type) = filter.entity_type.as_ref() {
            qb.push(" AND entity_type ILIKE ");
            qb.push_bind(Self::like_pattern(entity_type));
        }

        if let Some(search) = filter.search.as_ref() {
            let pattern = Self::like_pattern(search);
            qb.push(" AND (COALESCE(entity_id, '') ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR COALESCE(payload_text, '') ILIKE ");
            qb.push_bind(pattern);
            qb.push(")");
        }

        Self::push_time_cursor(&mut qb, "created_at", "id", page.cursor);

        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        qb.push_bind(limit + 1);

        let rows = qb
            .build_query_as::<AuditLogRecord>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(CursorPage::from_overfetch(rows, limit as u32, |entry| {
            TimeCursor::new(CursorKind::Audit, entry.created_at, entry.id)
        }))
    }
}
