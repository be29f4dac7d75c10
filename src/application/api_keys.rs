use std::sync::Arc;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::application::admin::audit::AdminAuditService;
use crate::application::repos::{ApiKeysRepo, CreateApiKeyParams, RepoError};
use crate::domain::api_keys::{ApiKeyRecord, ApiKeyStatus, ApiScope};

const TOKEN_PREFIX: &str = "qk";
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ApiKeyError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("invalid scope set")]
    InvalidScopes,
    #[error("{0}")]
    ConstraintViolation(&'static str),
    #[error("key not found")]
    NotFound,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiAuthError {
    #[error("missing api key")]
    Missing,
    #[error("invalid api key")]
    Invalid,
    #[error("expired api key")]
    Expired,
    #[error("revoked api key")]
    Revoked,
    #[error("api key lacks the `{0}` scope")]
    Forbidden(ApiScope),
}

#[derive(Debug, Clone)]
pub struct IssueApiKeyCommand {
    pub workspace_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub scopes: Vec<ApiScope>,
    pub expires_at: Option<OffsetDateTime>,
    pub created_by: String,
}

#[derive(Debug, Clone)]
pub struct ApiKeyIssued {
    pub record: ApiKeyRecord,
    pub token: String,
}

/// Authenticated caller of the admin API; every request is scoped to its workspace.
#[derive(Debug, Clone)]
pub struct ApiPrincipal {
    pub key_id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub prefix: String,
    pub scopes: Vec<ApiScope>,
}

impl ApiPrincipal {
    /// `workspace_admin` implies every other scope.
    pub fn requires(&self, needed: ApiScope) -> Result<(), ApiAuthError> {
        if self.scopes.contains(&needed) || self.scopes.contains(&ApiScope::WorkspaceAdmin) {
            Ok(())
        } else {
            Err(ApiAuthError::Forbidden(needed))
        }
    }

    /// Actor label written to the audit log.
    pub fn actor_label(&self) -> String {
        format!("api_key:{}", self.prefix)
    }
}

#[derive(Clone)]
pub struct ApiKeyService {
    repo: Arc<dyn ApiKeysRepo>,
    audit: Option<AdminAuditService>,
}

impl ApiKeyService {
    pub fn new(repo: Arc<dyn ApiKeysRepo>) -> Self {
        Self { repo, audit: None }
    }

    pub fn with_audit(mut self, audit: AdminAuditService) -> Self {
        self.audit = Some(audit);
        self
    }

    pub async fn issue(&self, cmd: IssueApiKeyCommand) -> Result<ApiKeyIssued, ApiKeyError> {
        if cmd.scopes.is_empty() {
            return Err(ApiKeyError::InvalidScopes);
        }
        let name = cmd.name.trim().to_string();
        if name.is_empty() {
            return Err(ApiKeyError::ConstraintViolation("name"));
        }

        let mut scopes = cmd.scopes;
        scopes.sort_by_key(|scope| scope.as_str());
        scopes.dedup();

        let prefix = Self::generate_prefix();
        let secret = Self::generate_secret();
        let token = format!("{TOKEN_PREFIX}_{prefix}_{secret}");
        let hashed_secret = Self::hash_secret(&secret);

        let record = self
            .repo
            .create_key(CreateApiKeyParams {
                workspace_id: cmd.workspace_id,
                name,
                description: cmd.description,
                prefix,
                hashed_secret,
                scopes,
                expires_at: cmd.expires_at,
                created_by: cmd.created_by.clone(),
            })
            .await?;

        self.audit(&record, &cmd.created_by, "api_key.issue").await?;
        Ok(ApiKeyIssued { record, token })
    }

    pub async fn rotate(
        &self,
        workspace_id: Uuid,
        id: Uuid,
        actor: &str,
    ) -> Result<ApiKeyIssued, ApiKeyError> {
        let existing = self
            .repo
            .find_key(workspace_id, id)
            .await?
            .ok_or(ApiKeyError::NotFound)?;
        if existing.status == ApiKeyStatus::Revoked {
            return Err(ApiKeyError::ConstraintViolation("revoked"));
        }

        let prefix = Self::generate_prefix();
        let secret = Self::generate_secret();
        let token = format!("{TOKEN_PREFIX}_{prefix}_{secret}");
        let hashed_secret = Self::hash_secret(&secret);

        let record = self
            .repo
            .update_secret(workspace_id, id, &prefix, &hashed_secret)
            .await?;

        self.audit(&record, actor, "api_key.rotate").await?;
        Ok(ApiKeyIssued { record, token })
    }

    pub async fn revoke(&self, workspace_id: Uuid, id: Uuid, actor: &str) -> Result<(), ApiKeyError> {
        let now = OffsetDateTime::now_utc();
        let record = self
            .repo
            .find_key(workspace_id, id)
            .await?
            .ok_or(ApiKeyError::NotFound)?;
        if !self.repo.revoke_key(workspace_id, id, now).await? {
            return Err(ApiKeyError::NotFound);
        }
        self.audit(&record, actor, "api_key.revoke").await?;
        Ok(())
    }

    pub async fn list(&self, workspace_id: Uuid) -> Result<Vec<ApiKeyRecord>, ApiKeyError> {
        self.repo
            .list_keys(workspace_id)
            .await
            .map_err(ApiKeyError::from)
    }

    pub async fn get(&self, workspace_id: Uuid, id: Uuid) -> Result<ApiKeyRecord, ApiKeyError> {
        self.repo
            .find_key(workspace_id, id)
            .await?
            .ok_or(ApiKeyError::NotFound)
    }

    pub async fn expire_due(&self, now: OffsetDateTime) -> Result<u64, ApiKeyError> {
        self.repo.expire_keys(now).await.map_err(ApiKeyError::from)
    }

    pub async fn authenticate(&self, token: &str) -> Result<ApiPrincipal, ApiAuthError> {
        let parsed = Self::parse_token(token).ok_or(ApiAuthError::Invalid)?;
        let record = self
            .repo
            .find_by_prefix(&parsed.prefix)
            .await
            .map_err(|err| {
                warn!(error = %err, "api key lookup failed");
                ApiAuthError::Invalid
            })?
            .ok_or(ApiAuthError::Invalid)?;

        let hashed_input = Self::hash_secret(&parsed.secret);
        if record.hashed_secret.ct_eq(&hashed_input).unwrap_u8() == 0 {
            return Err(ApiAuthError::Invalid);
        }

        let now = OffsetDateTime::now_utc();
        match record.status {
            ApiKeyStatus::Revoked => return Err(ApiAuthError::Revoked),
            ApiKeyStatus::Expired => return Err(ApiAuthError::Expired),
            ApiKeyStatus::Active if !record.is_active_at(now) => {
                return Err(ApiAuthError::Expired);
            }
            ApiKeyStatus::Active => {}
        }

        let repo = self.repo.clone();
        tokio::spawn(async move {
            if let Err(err) = repo.touch_last_used(record.id, now).await {
                warn!(error = %err, key_id = %record.id, "failed to record api key usage");
            }
        });

        Ok(ApiPrincipal {
            key_id: record.id,
            workspace_id: record.workspace_id,
            name: record.name,
            prefix: record.prefix,
            scopes: record.scopes,
        })
    }

    async fn audit(
        &self,
        record: &ApiKeyRecord,
        actor: &str,
        action: &str,
    ) -> Result<(), RepoError> {
        let Some(audit) = self.audit.as_ref() else {
            return Ok(());
        };
        audit
            .record(
                record.workspace_id,
                actor,
                action,
                "api_key",
                Some(&record.id.to_string()),
                Some(&record),
            )
            .await
    }

    fn hash_secret(secret: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.finalize().to_vec()
    }

    fn generate_prefix() -> String {
        Uuid::new_v4().simple().to_string()[..12].to_string()
    }

    fn generate_secret() -> String {
        format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
    }

    fn parse_token(token: &str) -> Option<ParsedToken> {
        let mut parts = token.splitn(3, '_');
        if parts.next()? != TOKEN_PREFIX {
            return None;
        }
        let prefix = parts.next()?;
        let secret = parts.next()?;
        if secret.len() < MIN_SECRET_LEN || prefix.is_empty() {
            return None;
        }
        Some(ParsedToken {
            prefix: prefix.to_string(),
            secret: secret.to_string(),
        })
    }
}

struct ParsedToken {
    prefix: String,
    secret: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_token_requires_prefix_tag_and_long_secret() {
        let secret = "a".repeat(MIN_SECRET_LEN);
        let parsed =
            ApiKeyService::parse_token(&format!("qk_abc123_{secret}")).expect("parsed token");
        assert_eq!(parsed.prefix, "abc123");
        assert_eq!(parsed.secret, secret);

        assert!(ApiKeyService::parse_token(&format!("sk_abc123_{secret}")).is_none());
        assert!(ApiKeyService::parse_token("qk_abc123_short").is_none());
        assert!(ApiKeyService::parse_token(&format!("qk__{secret}")).is_none());
    }

    #[test]
    fn workspace_admin_implies_other_scopes() {
        let principal = ApiPrincipal {
            key_id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            name: "ci".into(),
            prefix: "abc".into(),
            scopes: vec![ApiScope::WorkspaceAdmin],
        };
        assert!(principal.requires(ApiScope::SubscriberWrite).is_ok());

        let reader = ApiPrincipal {
            scopes: vec![ApiScope::PostRead],
            ..principal
        };
        assert!(reader.requires(ApiScope::PostRead).is_ok());
        assert_eq!(
            reader.requires(ApiScope::PostWrite),
            Err(ApiAuthError::Forbidden(ApiScope::PostWrite))
        );
    }
}
