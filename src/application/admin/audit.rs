use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::application::pagination::{CursorPage, PageRequest, TimeCursor};
use crate::application::repos::{AuditQueryFilter, AuditRepo, RepoError};
use crate::domain::entities::AuditLogRecord;

const MAX_ACTOR_CHARS: usize = 120;

/// Append-only workspace history. Every admin mutation writes one entry.
#[derive(Clone)]
pub struct AdminAuditService {
    repo: Arc<dyn AuditRepo>,
}

impl AdminAuditService {
    pub fn new(repo: Arc<dyn AuditRepo>) -> Self {
        Self { repo }
    }

    pub async fn record<S>(
        &self,
        workspace_id: Uuid,
        actor: &str,
        action: &str,
        entity_type: &str,
        entity_id: Option<&str>,
        payload: Option<&S>,
    ) -> Result<(), RepoError>
    where
        S: Serialize,
    {
        let payload_text = payload
            .map(serde_json::to_string)
            .transpose()
            .map_err(RepoError::from_persistence)?;

        let entry = AuditLogRecord {
            id: Uuid::new_v4(),
            workspace_id,
            actor: clip_actor(actor),
            action: action.to_owned(),
            entity_type: entity_type.to_owned(),
            entity_id: entity_id.map(str::to_owned),
            payload_text,
            created_at: OffsetDateTime::now_utc(),
        };

        debug!(
            target = "quire::audit",
            workspace_id = %workspace_id,
            action,
            entity_type,
            "audit entry appended"
        );
        self.repo.append_log(entry).await
    }

    /// Newest entries first. Blank filter values are ignored.
    pub async fn list(
        &self,
        workspace_id: Uuid,
        filter: &AuditQueryFilter,
        page: PageRequest<TimeCursor>,
    ) -> Result<CursorPage<AuditLogRecord>, RepoError> {
        let filter = AuditQueryFilter {
            actor: non_blank(&filter.actor),
            action: non_blank(&filter.action),
            entity_type: non_blank(&filter.entity_type),
            search: non_blank(&filter.search),
        };
        self.repo.list_logs(workspace_id, &filter, page).await
    }
}

fn clip_actor(actor: &str) -> String {
    let actor = actor.trim();
    match actor.char_indices().nth(MAX_ACTOR_CHARS) {
        Some((cut, _)) => actor[..cut].to_owned(),
        None => actor.to_owned(),
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_actors_are_clipped_on_char_boundaries() {
        let actor = "é".repeat(MAX_ACTOR_CHARS + 10);
        let clipped = clip_actor(&actor);
        assert_eq!(clipped.chars().count(), MAX_ACTOR_CHARS);
        assert_eq!(clip_actor("  key:ops  "), "key:ops");
    }

    #[test]
    fn blank_filters_are_dropped() {
        assert_eq!(non_blank(&Some("   ".into())), None);
        assert_eq!(
            non_blank(&Some(" post.publish ".into())),
            Some("post.publish".into())
        );
        assert_eq!(non_blank(&None), None);
    }
}
