use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{ApiKeysRepo, CreateApiKeyParams, RepoError};
use crate::domain::api_keys::{ApiKeyRecord, ApiKeyStatus, ApiScope};

use super::{PostgresRepositories, map_sqlx_error};

const API_KEY_COLUMNS: &str = "id, workspace_id, name, description, prefix, hashed_secret, \
    scopes, status, expires_at, revoked_at, last_used_at, created_by, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct ApiKeyRow {
    id: Uuid,
    workspace_id: Uuid,
    name: String,
    description: Option<String>,
    prefix: String,
    hashed_secret: Vec<u8>,
    scopes: Vec<String>,
    status: ApiKeyStatus,
    expires_at: Option<OffsetDateTime>,
    revoked_at: Option<OffsetDateTime>,
    last_used_at: Option<OffsetDateTime>,
    created_by: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<ApiKeyRow> for ApiKeyRecord {
    type Error = RepoError;

    fn try_from(row: ApiKeyRow) -> Result<Self, Self::Error> {
        let scopes = row
            .scopes
            .iter()
            .map(|raw| {
                raw.parse::<ApiScope>().map_err(|_| RepoError::Integrity {
                    message: format!("unknown api scope `{raw}` on key {}", row.id),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ApiKeyRecord {
            id: row.id,
            workspace_id: row.workspace_id,
            name: row.name,
            description: row.description,
            prefix: row.prefix,
            hashed_secret: row.hashed_secret,
            scopes,
            status: row.status,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            last_used_at: row.last_used_at,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn scope_strings(scopes: &[ApiScope]) -> Vec<String> {
    scopes.iter().map(|scope| scope.as_str().to_string()).collect()
}

#[async_trait]
impl ApiKeysRepo for PostgresRepositories {
    async fn create_key(&self, params: CreateApiKeyParams) -> Result<ApiKeyRecord, RepoError> {
        let now = OffsetDateTime::now_utc();
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "INSERT INTO api_keys (id, workspace_id, name, description, prefix, hashed_secret, \
             scopes, status, expires_at, created_by, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11) \
             RETURNING {API_KEY_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(params.workspace_id)
        .bind(&params.name)
        .bind(&params.description)
        .bind(&params.prefix)
        .bind(&params.hashed_secret)
        .bind(scope_strings(&params.scopes))
        .bind(ApiKeyStatus::Active)
        .bind(params.expires_at)
        .bind(&params.created_by)
        .bind(now)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        ApiKeyRecord::try_from(row)
    }

    async fn list_keys(&self, workspace_id: Uuid) -> Result<Vec<ApiKeyRecord>, RepoError> {
        let rows = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE workspace_id = $1 \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(workspace_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(ApiKeyRecord::try_from).collect()
    }

    async fn find_key(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Option<ApiKeyRecord>, RepoError> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE workspace_id = $1 AND id = $2"
        ))
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(ApiKeyRecord::try_from).transpose()
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKeyRecord>, RepoError> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE prefix = $1"
        ))
        .bind(prefix)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(ApiKeyRecord::try_from).transpose()
    }

    async fn revoke_key(
        &self,
        workspace_id: Uuid,
        id: Uuid,
        revoked_at: OffsetDateTime,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE api_keys SET status = $3, revoked_at = $4, updated_at = $4 \
             WHERE workspace_id = $1 AND id = $2 AND status <> $3",
        )
        .bind(workspace_id)
        .bind(id)
        .bind(ApiKeyStatus::Revoked)
        .bind(revoked_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_secret(
        &self,
        workspace_id: Uuid,
        id: Uuid,
        prefix: &str,
        hashed_secret: &[u8],
    ) -> Result<ApiKeyRecord, RepoError> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "UPDATE api_keys \
             SET prefix = $3, hashed_secret = $4, last_used_at = NULL, updated_at = now() \
             WHERE workspace_id = $1 AND id = $2 \
             RETURNING {API_KEY_COLUMNS}"
        ))
        .bind(workspace_id)
        .bind(id)
        .bind(prefix)
        .bind(hashed_secret)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        ApiKeyRecord::try_from(row)
    }

    async fn touch_last_used(&self, id: Uuid, at: OffsetDateTime) -> Result<(), RepoError> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn expire_keys(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let result = sqlx::query(
            "UPDATE api_keys SET status = $2, updated_at = $1 \
             WHERE status = $3 AND expires_at IS NOT NULL AND expires_at <= $1",
        )
        .bind(now)
        .bind(ApiKeyStatus::Expired)
        .bind(ApiKeyStatus::Active)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}
