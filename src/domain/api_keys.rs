//! Domain types for workspace API keys and scopes.

use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "api_key_status", rename_all = "snake_case")]
pub enum ApiKeyStatus {
    Active,
    Revoked,
    Expired,
}

impl ApiKeyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }
}

impl Display for ApiKeyStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiKeyStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "revoked" => Ok(Self::Revoked),
            "expired" => Ok(Self::Expired),
            _ => Err(()),
        }
    }
}

/// Permission granted to a key within its workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiScope {
    WorkspaceAdmin,
    PageRead,
    PageWrite,
    PostRead,
    PostWrite,
    NewsletterRead,
    NewsletterWrite,
    SubscriberRead,
    SubscriberWrite,
    AuditRead,
}

impl ApiScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkspaceAdmin => "workspace_admin",
            Self::PageRead => "page_read",
            Self::PageWrite => "page_write",
            Self::PostRead => "post_read",
            Self::PostWrite => "post_write",
            Self::NewsletterRead => "newsletter_read",
            Self::NewsletterWrite => "newsletter_write",
            Self::SubscriberRead => "subscriber_read",
            Self::SubscriberWrite => "subscriber_write",
            Self::AuditRead => "audit_read",
        }
    }

    pub fn all() -> &'static [ApiScope] {
        &[
            Self::WorkspaceAdmin,
            Self::PageRead,
            Self::PageWrite,
            Self::PostRead,
            Self::PostWrite,
            Self::NewsletterRead,
            Self::NewsletterWrite,
            Self::SubscriberRead,
            Self::SubscriberWrite,
            Self::AuditRead,
        ]
    }
}

impl Display for ApiScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiScope {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|scope| scope.as_str() == s)
            .ok_or(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub prefix: String,
    #[serde(skip_serializing)]
    pub hashed_secret: Vec<u8>,
    pub scopes: Vec<ApiScope>,
    pub status: ApiKeyStatus,
    pub expires_at: Option<OffsetDateTime>,
    pub revoked_at: Option<OffsetDateTime>,
    pub last_used_at: Option<OffsetDateTime>,
    pub created_by: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ApiKeyRecord {
    /// Active keys whose expiry passed since the last cron sweep count as expired.
    pub fn is_active_at(&self, now: OffsetDateTime) -> bool {
        if self.status != ApiKeyStatus::Active {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }

    pub fn grants(&self, scope: ApiScope) -> bool {
        self.scopes.contains(&scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_round_trip_through_strings() {
        for scope in ApiScope::all() {
            assert_eq!(scope.as_str().parse::<ApiScope>(), Ok(*scope));
        }
        assert!("tag_read".parse::<ApiScope>().is_err());
    }
}
