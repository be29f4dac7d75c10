//! Application services for the workspace-scoped admin API.

pub mod audit;
pub mod authors;
pub mod categories;
pub mod emails;
pub mod links;
pub mod newsletters;
pub mod pages;
pub mod posts;
pub mod subscribers;
pub mod workspaces;

use crate::domain::slug::SlugError;

pub(crate) fn ensure_non_empty(value: &str, field: &'static str) -> Result<(), &'static str> {
    if value.trim().is_empty() {
        Err(field)
    } else {
        Ok(())
    }
}

/// Trim an optional text field, collapsing blank input to `None`.
pub(crate) fn trim_optional(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Field blamed when a slug cannot be produced from `source_field`.
pub(crate) fn slug_failure(err: &SlugError, source_field: &'static str) -> &'static str {
    match err {
        SlugError::EmptyInput | SlugError::Unrepresentable { .. } => source_field,
        SlugError::Malformed { .. } | SlugError::Exhausted { .. } => "slug",
    }
}
