use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{
        CreateMemberParams, CreateWorkspaceParams, MemberChange, RepoError, WorkspacesRepo,
    },
    domain::{
        entities::{MemberRecord, WorkspaceRecord},
        types::MemberRole,
    },
};

use super::{PostgresRepositories, map_sqlx_error};

const WORKSPACE_COLUMNS: &str = "id, slug, name, created_at, updated_at";
const MEMBER_COLUMNS: &str = "id, workspace_id, email, name, role, created_at, updated_at";

#[async_trait]
impl WorkspacesRepo for PostgresRepositories {
    async fn create_workspace(
        &self,
        params: CreateWorkspaceParams,
    ) -> Result<WorkspaceRecord, RepoError> {
        let now = OffsetDateTime::now_utc();
        sqlx::query_as::<_, WorkspaceRecord>(&format!(
            "INSERT INTO workspaces (id, slug, name, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $4) RETURNING {WORKSPACE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&params.slug)
        .bind(&params.name)
        .bind(now)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn rename_workspace(&self, id: Uuid, name: &str) -> Result<WorkspaceRecord, RepoError> {
        sqlx::query_as::<_, WorkspaceRecord>(&format!(
            "UPDATE workspaces SET name = $2, updated_at = now() WHERE id = $1 \
             RETURNING {WORKSPACE_COLUMNS}"
        ))
        .bind(id)
        .bind(name)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_workspace(&self, id: Uuid) -> Result<Option<WorkspaceRecord>, RepoError> {
        sqlx::query_as::<_, WorkspaceRecord>(&format!(
            "SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_workspace_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<WorkspaceRecord>, RepoError> {
        sqlx::query_as::<_, WorkspaceRecord>(&format!(
            "SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE slug = $1"
        ))
        .bind(slug)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn list_members(&self, workspace_id: Uuid) -> Result<Vec<MemberRecord>, RepoError> {
        sqlx::query_as::<_, MemberRecord>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE workspace_id = $1 \
             ORDER BY created_at, id"
        ))
        .bind(workspace_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_member(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Option<MemberRecord>, RepoError> {
        sqlx::query_as::<_, MemberRecord>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE workspace_id = $1 AND id = $2"
        ))
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_member_by_email(
        &self,
        workspace_id: Uuid,
        email: &str,
    ) -> Result<Option<MemberRecord>, RepoError> {
        sqlx::query_as::<_, MemberRecord>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE workspace_id = $1 AND email = $2"
        ))
        .bind(workspace_id)
        .bind(email)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn create_member(&self, params: CreateMemberParams) -> Result<MemberRecord, RepoError> {
        let now = OffsetDateTime::now_utc();
        sqlx::query_as::<_, MemberRecord>(&format!(
            "INSERT INTO members (id, workspace_id, email, name, role, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) RETURNING {MEMBER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(params.workspace_id)
        .bind(&params.email)
        .bind(&params.name)
        .bind(params.role)
        .bind(now)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn update_member_role(
        &self,
        workspace_id: Uuid,
        id: Uuid,
        role: MemberRole,
    ) -> Result<MemberChange<MemberRecord>, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let owners = lock_owners(&mut tx, workspace_id).await?;
        if role != MemberRole::Owner && owners == [id] {
            return Ok(MemberChange::LastOwner);
        }

        let member = sqlx::query_as::<_, MemberRecord>(&format!(
            "UPDATE members SET role = $3, updated_at = now() \
             WHERE workspace_id = $1 AND id = $2 RETURNING {MEMBER_COLUMNS}"
        ))
        .bind(workspace_id)
        .bind(id)
        .bind(role)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(MemberChange::Applied(member))
    }

    async fn delete_member(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<MemberChange<()>, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let owners = lock_owners(&mut tx, workspace_id).await?;
        if owners == [id] {
            return Ok(MemberChange::LastOwner);
        }

        let result = sqlx::query("DELETE FROM members WHERE workspace_id = $1 AND id = $2")
            .bind(workspace_id)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        Self::require_one(result.rows_affected())?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(MemberChange::Applied(()))
    }
}

/// Locks the workspace row so owner checks and the write that follows are
/// serialised, then lists the current owners.
async fn lock_owners(
    tx: &mut Transaction<'_, Postgres>,
    workspace_id: Uuid,
) -> Result<Vec<Uuid>, RepoError> {
    sqlx::query("SELECT id FROM workspaces WHERE id = $1 FOR UPDATE")
        .bind(workspace_id)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;

    sqlx::query_scalar("SELECT id FROM members WHERE workspace_id = $1 AND role = $2")
        .bind(workspace_id)
        .bind(MemberRole::Owner)
        .fetch_all(&mut **tx)
        .await
        .map_err(map_sqlx_error)
}
