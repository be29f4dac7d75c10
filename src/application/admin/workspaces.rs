use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::application::admin::audit::AdminAuditService;
use crate::application::admin::{ensure_non_empty, slug_failure};
use crate::application::repos::{
    CreateMemberParams, CreateWorkspaceParams, MemberChange, RepoError, WorkspacesRepo,
};
use crate::domain::email::normalize_email;
use crate::domain::entities::{MemberRecord, WorkspaceRecord};
use crate::domain::error::DomainError;
use crate::domain::slug::{SlugAsyncError, unique_slug};
use crate::domain::types::MemberRole;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("{0}")]
    ConstraintViolation(&'static str),
    #[error("workspace not found")]
    NotFound,
    #[error("member not found")]
    MemberNotFound,
    #[error("`{0}` is already a member of this workspace")]
    DuplicateMember(String),
    #[error("a workspace must keep at least one owner")]
    LastOwner,
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone)]
pub struct InviteMemberCommand {
    pub email: String,
    pub name: String,
    pub role: MemberRole,
}

#[derive(Debug, Serialize)]
struct MemberSnapshot<'a> {
    email: &'a str,
    role: MemberRole,
}

#[derive(Clone)]
pub struct WorkspaceService {
    repo: Arc<dyn WorkspacesRepo>,
    audit: AdminAuditService,
}

impl WorkspaceService {
    pub fn new(repo: Arc<dyn WorkspacesRepo>, audit: AdminAuditService) -> Self {
        Self { repo, audit }
    }

    /// Create a workspace with a globally unique slug derived from its name.
    pub async fn create_workspace(
        &self,
        actor: &str,
        name: &str,
    ) -> Result<WorkspaceRecord, WorkspaceError> {
        let name = name.trim();
        ensure_non_empty(name, "name").map_err(WorkspaceError::ConstraintViolation)?;

        let repo = self.repo.clone();
        let slug = unique_slug(name, move |candidate| {
            let repo = repo.clone();
            async move {
                repo.find_workspace_by_slug(&candidate)
                    .await
                    .map(|existing| existing.is_some())
            }
        })
        .await
        .map_err(|err| match err {
            SlugAsyncError::Slug(err) => WorkspaceError::ConstraintViolation(slug_failure(&err, "name")),
            SlugAsyncError::Predicate(err) => WorkspaceError::Repo(err),
        })?;

        let workspace = self
            .repo
            .create_workspace(CreateWorkspaceParams {
                slug,
                name: name.to_string(),
            })
            .await?;

        self.audit
            .record(
                workspace.id,
                actor,
                "workspace.create",
                "workspace",
                Some(&workspace.id.to_string()),
                Some(&workspace),
            )
            .await?;

        Ok(workspace)
    }

    pub async fn get_workspace(&self, id: Uuid) -> Result<WorkspaceRecord, WorkspaceError> {
        self.repo
            .find_workspace(id)
            .await?
            .ok_or(WorkspaceError::NotFound)
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<WorkspaceRecord, WorkspaceError> {
        self.repo
            .find_workspace_by_slug(slug)
            .await?
            .ok_or(WorkspaceError::NotFound)
    }

    pub async fn rename_workspace(
        &self,
        actor: &str,
        id: Uuid,
        name: &str,
    ) -> Result<WorkspaceRecord, WorkspaceError> {
        let name = name.trim();
        ensure_non_empty(name, "name").map_err(WorkspaceError::ConstraintViolation)?;

        let workspace = self
            .repo
            .rename_workspace(id, name)
            .await
            .map_err(|err| match err {
                RepoError::NotFound => WorkspaceError::NotFound,
                other => WorkspaceError::Repo(other),
            })?;

        self.audit
            .record(
                id,
                actor,
                "workspace.rename",
                "workspace",
                Some(&id.to_string()),
                Some(&workspace),
            )
            .await?;

        Ok(workspace)
    }

    pub async fn list_members(&self, workspace_id: Uuid) -> Result<Vec<MemberRecord>, WorkspaceError> {
        self.repo
            .list_members(workspace_id)
            .await
            .map_err(WorkspaceError::from)
    }

    pub async fn invite_member(
        &self,
        actor: &str,
        workspace_id: Uuid,
        command: InviteMemberCommand,
    ) -> Result<MemberRecord, WorkspaceError> {
        let email = normalize_email(&command.email).map_err(DomainError::from)?;
        let name = command.name.trim().to_string();
        ensure_non_empty(&name, "name").map_err(WorkspaceError::ConstraintViolation)?;

        if self
            .repo
            .find_member_by_email(workspace_id, &email)
            .await?
            .is_some()
        {
            return Err(WorkspaceError::DuplicateMember(email));
        }

        let member = self
            .repo
            .create_member(CreateMemberParams {
                workspace_id,
                email: email.clone(),
                name,
                role: command.role,
            })
            .await
            .map_err(|err| match err {
                RepoError::Duplicate { .. } => WorkspaceError::DuplicateMember(email),
                other => WorkspaceError::Repo(other),
            })?;

        self.record_member(actor, "member.invite", &member).await?;
        Ok(member)
    }

    pub async fn update_member_role(
        &self,
        actor: &str,
        workspace_id: Uuid,
        member_id: Uuid,
        role: MemberRole,
    ) -> Result<MemberRecord, WorkspaceError> {
        let member = self.require_member(workspace_id, member_id).await?;
        if member.role == role {
            return Ok(member);
        }

        let member = match self
            .repo
            .update_member_role(workspace_id, member_id, role)
            .await?
        {
            MemberChange::Applied(member) => member,
            MemberChange::LastOwner => return Err(WorkspaceError::LastOwner),
        };
        self.record_member(actor, "member.role", &member).await?;
        Ok(member)
    }

    pub async fn remove_member(
        &self,
        actor: &str,
        workspace_id: Uuid,
        member_id: Uuid,
    ) -> Result<(), WorkspaceError> {
        let member = self.require_member(workspace_id, member_id).await?;
        if let MemberChange::LastOwner = self.repo.delete_member(workspace_id, member_id).await? {
            return Err(WorkspaceError::LastOwner);
        }
        self.record_member(actor, "member.remove", &member).await?;
        Ok(())
    }

    pub async fn find_member(
        &self,
        workspace_id: Uuid,
        member_id: Uuid,
    ) -> Result<Option<MemberRecord>, WorkspaceError> {
        self.repo
            .find_member(workspace_id, member_id)
            .await
            .map_err(WorkspaceError::from)
    }

    async fn require_member(
        &self,
        workspace_id: Uuid,
        member_id: Uuid,
    ) -> Result<MemberRecord, WorkspaceError> {
        self.repo
            .find_member(workspace_id, member_id)
            .await?
            .ok_or(WorkspaceError::MemberNotFound)
    }

    async fn record_member(
        &self,
        actor: &str,
        action: &str,
        member: &MemberRecord,
    ) -> Result<(), RepoError> {
        let snapshot = MemberSnapshot {
            email: &member.email,
            role: member.role,
        };
        self.audit
            .record(
                member.workspace_id,
                actor,
                action,
                "member",
                Some(&member.id.to_string()),
                Some(&snapshot),
            )
            .await
    }
}
