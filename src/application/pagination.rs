//! Shared cursor pagination helpers.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Listing a cursor was issued for; a cursor from one listing is rejected by another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorKind {
    Pages,
    Posts,
    Subscribers,
    Emails,
    Audit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct TimeCursorPayload {
    kind: CursorKind,
    at: OffsetDateTime,
    id: Uuid,
}

/// Keyset cursor ordering rows by a timestamp then id, both descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeCursor {
    kind: CursorKind,
    at: OffsetDateTime,
    id: Uuid,
}

impl TimeCursor {
    pub fn new(kind: CursorKind, at: OffsetDateTime, id: Uuid) -> Self {
        Self { kind, at, id }
    }

    pub fn kind(&self) -> CursorKind {
        self.kind
    }

    pub fn at(&self) -> OffsetDateTime {
        self.at
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn encode(&self) -> String {
        let payload = TimeCursorPayload {
            kind: self.kind,
            at: self.at,
            id: self.id,
        };
        // A struct of an enum, a timestamp and a uuid always serialises.
        let serialized = serde_json::to_vec(&payload).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(serialized)
    }

    pub fn decode(expected: CursorKind, cursor: &str) -> Result<Self, PaginationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        let payload: TimeCursorPayload = serde_json::from_slice(&bytes)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        if payload.kind != expected {
            return Err(PaginationError::InvalidCursor(format!(
                "cursor was issued for {:?}",
                payload.kind
            )));
        }
        Ok(Self {
            kind: payload.kind,
            at: payload.at,
            id: payload.id,
        })
    }
}

/// Cursor-aware pagination request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<C> {
    pub limit: u32,
    pub cursor: Option<C>,
}

impl<C> PageRequest<C> {
    pub fn new(limit: u32, cursor: Option<C>) -> Self {
        Self { limit, cursor }
    }
}

/// Cursor-aware page result.
#[derive(Debug, Clone, Serialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> CursorPage<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }

    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }

    /// Build a page from `limit + 1` fetched rows, emitting a cursor for the
    /// last kept row when more remain.
    pub fn from_overfetch(
        mut rows: Vec<T>,
        limit: u32,
        cursor_for: impl Fn(&T) -> TimeCursor,
    ) -> Self {
        let limit = limit as usize;
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = if has_more {
            rows.last().map(|row| cursor_for(row).encode())
        } else {
            None
        };
        Self::new(rows, next_cursor)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> CursorPage<U> {
        CursorPage {
            items: self.items.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
        }
    }
}

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_decodes_for_matching_listing() {
        let id = Uuid::new_v4();
        let at = OffsetDateTime::now_utc();
        let encoded = TimeCursor::new(CursorKind::Posts, at, id).encode();
        let decoded = TimeCursor::decode(CursorKind::Posts, &encoded).expect("decoded cursor");

        assert_eq!(decoded.id(), id);
        assert_eq!(decoded.at(), at);
    }

    #[test]
    fn cursor_from_other_listing_is_rejected() {
        let encoded =
            TimeCursor::new(CursorKind::Audit, OffsetDateTime::now_utc(), Uuid::new_v4()).encode();
        let err = TimeCursor::decode(CursorKind::Subscribers, &encoded).expect_err("rejected");
        assert!(matches!(err, PaginationError::InvalidCursor(_)));
    }

    #[test]
    fn decoding_invalid_cursor_reports_error() {
        let err = TimeCursor::decode(CursorKind::Pages, "not-base64!").expect_err("invalid");
        assert!(matches!(err, PaginationError::InvalidCursor(_)));
    }

    #[test]
    fn overfetch_emits_cursor_only_when_more_rows_exist() {
        let at = OffsetDateTime::now_utc();
        let rows: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let cursor_for = |id: &Uuid| TimeCursor::new(CursorKind::Pages, at, *id);

        let page = CursorPage::from_overfetch(rows.clone(), 2, cursor_for);
        assert_eq!(page.items.len(), 2);
        let next = page.next_cursor.expect("next cursor");
        let decoded = TimeCursor::decode(CursorKind::Pages, &next).expect("decoded");
        assert_eq!(decoded.id(), rows[1]);

        let page = CursorPage::from_overfetch(rows, 3, cursor_for);
        assert!(page.next_cursor.is_none());
    }
}
