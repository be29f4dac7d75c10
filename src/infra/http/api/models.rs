use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::api_keys::{ApiKeyRecord, ApiScope};
use crate::domain::types::MemberRole;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkspaceRenameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MemberInviteRequest {
    pub email: String,
    pub name: String,
    pub role: MemberRole,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MemberRoleRequest {
    pub role: MemberRole,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ApiKeyCreateRequest {
    pub name: String,
    pub description: Option<String>,
    pub scopes: Vec<ApiScope>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

/// The token is shown once, on issue or rotation.
#[derive(Debug, Serialize)]
pub struct ApiKeyIssuedResponse {
    pub key: ApiKeyRecord,
    pub token: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PageCreateRequest {
    pub title: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub custom_domain: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PageUpdateRequest {
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub custom_domain: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PostCreateRequest {
    pub title: String,
    pub slug: Option<String>,
    pub excerpt: Option<String>,
    pub body_html: String,
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
    #[serde(default)]
    pub author_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PostUpdateRequest {
    pub title: String,
    pub slug: String,
    pub excerpt: Option<String>,
    pub body_html: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct IdListRequest {
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CategoryRequest {
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub position: Option<i32>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AuthorRequest {
    pub name: String,
    pub slug: Option<String>,
    pub member_id: Option<Uuid>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub website_url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LinkRequest {
    pub label: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub visible: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct NewsletterRequest {
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub sender_name: String,
    pub sender_email: String,
    pub reply_to: Option<String>,
    #[serde(default = "default_true")]
    pub double_opt_in: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SubscriberCreateRequest {
    pub email: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SubscriberImportRequest {
    pub emails: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EmailRequest {
    pub subject: String,
    pub body_html: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EmailFromPostRequest {
    pub post_id: Uuid,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct EmailSendRequest {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub at: Option<OffsetDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_request_defaults_to_visible() {
        let request: LinkRequest =
            serde_json::from_str(r#"{"label":"Home","url":"https://quire.test"}"#).unwrap();
        assert!(request.visible);
    }

    #[test]
    fn send_request_parses_rfc3339_schedule() {
        let request: EmailSendRequest =
            serde_json::from_str(r#"{"at":"2030-01-02T03:04:05Z"}"#).unwrap();
        assert_eq!(request.at.map(|at| at.year()), Some(2030));

        let request: EmailSendRequest = serde_json::from_str("{}").unwrap();
        assert!(request.at.is_none());
    }
}
