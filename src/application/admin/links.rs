use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::application::admin::audit::AdminAuditService;
use crate::application::admin::authors::parse_http_url;
use crate::application::admin::ensure_non_empty;
use crate::application::repos::{LinkParams, LinksRepo, PagesRepo, RepoError};
use crate::domain::entities::LinkRecord;

#[derive(Debug, Error)]
pub enum AdminLinkError {
    #[error("{0}")]
    ConstraintViolation(&'static str),
    #[error("page not found")]
    PageNotFound,
    #[error("link not found")]
    NotFound,
    #[error("reorder must list every link of the page exactly once")]
    ReorderMismatch,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone)]
pub struct LinkCommand {
    pub label: String,
    pub url: String,
    pub visible: bool,
}

#[derive(Debug, Serialize)]
struct LinkSnapshot<'a> {
    label: &'a str,
    url: &'a str,
    visible: bool,
}

#[derive(Clone)]
pub struct AdminLinkService {
    pages: Arc<dyn PagesRepo>,
    repo: Arc<dyn LinksRepo>,
    audit: AdminAuditService,
}

impl AdminLinkService {
    pub fn new(
        pages: Arc<dyn PagesRepo>,
        repo: Arc<dyn LinksRepo>,
        audit: AdminAuditService,
    ) -> Self {
        Self { pages, repo, audit }
    }

    pub async fn list(
        &self,
        workspace_id: Uuid,
        page_id: Uuid,
    ) -> Result<Vec<LinkRecord>, AdminLinkError> {
        self.require_page(workspace_id, page_id).await?;
        self.repo
            .list_links(page_id, false)
            .await
            .map_err(AdminLinkError::from)
    }

    pub async fn create(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        command: LinkCommand,
    ) -> Result<LinkRecord, AdminLinkError> {
        self.require_page(workspace_id, page_id).await?;
        let params = build_params(page_id, command)?;
        let link = self.repo.create_link(params).await?;
        self.record(workspace_id, actor, "link.create", &link).await?;
        Ok(link)
    }

    pub async fn update(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        id: Uuid,
        command: LinkCommand,
    ) -> Result<LinkRecord, AdminLinkError> {
        self.require_page(workspace_id, page_id).await?;
        let existing = self
            .repo
            .find_link(page_id, id)
            .await?
            .ok_or(AdminLinkError::NotFound)?;
        let params = build_params(page_id, command)?;
        let link = self.repo.update_link(existing.id, params).await?;
        self.record(workspace_id, actor, "link.update", &link).await?;
        Ok(link)
    }

    pub async fn delete(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        id: Uuid,
    ) -> Result<(), AdminLinkError> {
        self.require_page(workspace_id, page_id).await?;
        let link = self
            .repo
            .find_link(page_id, id)
            .await?
            .ok_or(AdminLinkError::NotFound)?;
        self.repo.delete_link(page_id, link.id).await?;
        self.record(workspace_id, actor, "link.delete", &link).await?;
        Ok(())
    }

    /// `ordered_ids` must be a permutation of the page's link ids.
    pub async fn reorder(
        &self,
        actor: &str,
        workspace_id: Uuid,
        page_id: Uuid,
        ordered_ids: Vec<Uuid>,
    ) -> Result<Vec<LinkRecord>, AdminLinkError> {
        self.require_page(workspace_id, page_id).await?;
        let current = self.repo.list_links(page_id, false).await?;

        let requested: HashSet<Uuid> = ordered_ids.iter().copied().collect();
        let existing: HashSet<Uuid> = current.iter().map(|link| link.id).collect();
        if requested.len() != ordered_ids.len() || requested != existing {
            return Err(AdminLinkError::ReorderMismatch);
        }

        self.repo.reorder_links(page_id, &ordered_ids).await?;
        self.audit
            .record(
                workspace_id,
                actor,
                "link.reorder",
                "page",
                Some(&page_id.to_string()),
                Some(&ordered_ids),
            )
            .await?;

        self.repo
            .list_links(page_id, false)
            .await
            .map_err(AdminLinkError::from)
    }

    async fn require_page(&self, workspace_id: Uuid, page_id: Uuid) -> Result<(), AdminLinkError> {
        self.pages
            .find_page(workspace_id, page_id)
            .await?
            .map(|_| ())
            .ok_or(AdminLinkError::PageNotFound)
    }

    async fn record(
        &self,
        workspace_id: Uuid,
        actor: &str,
        action: &str,
        link: &LinkRecord,
    ) -> Result<(), RepoError> {
        self.audit
            .record(
                workspace_id,
                actor,
                action,
                "link",
                Some(&link.id.to_string()),
                Some(&LinkSnapshot {
                    label: &link.label,
                    url: &link.url,
                    visible: link.visible,
                }),
            )
            .await
    }
}

fn build_params(page_id: Uuid, command: LinkCommand) -> Result<LinkParams, AdminLinkError> {
    let label = command.label.trim().to_string();
    ensure_non_empty(&label, "label").map_err(AdminLinkError::ConstraintViolation)?;
    let url = parse_http_url(&command.url).ok_or(AdminLinkError::ConstraintViolation("url"))?;
    Ok(LinkParams {
        page_id,
        label,
        url,
        visible: command.visible,
    })
}
