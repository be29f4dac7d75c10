//! Post lifecycle rules: the publish state machine and excerpt derivation.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::types::PostStatus;

/// Number of characters kept when an excerpt is derived from the body.
pub const EXCERPT_LENGTH: usize = 280;

/// Requested lifecycle change for a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PostAction {
    Publish,
    Schedule {
        #[serde(with = "time::serde::rfc3339")]
        publish_at: OffsetDateTime,
    },
    Unschedule,
    Unpublish,
    Archive,
    Restore,
}

impl PostAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostAction::Publish => "publish",
            PostAction::Schedule { .. } => "schedule",
            PostAction::Unschedule => "unschedule",
            PostAction::Unpublish => "unpublish",
            PostAction::Archive => "archive",
            PostAction::Restore => "restore",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot {action} a post that is {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },
    #[error("scheduled publish time must be in the future")]
    ScheduleInPast,
}

/// Resolve the status a post moves to when `action` is applied.
pub fn transition(
    current: PostStatus,
    action: &PostAction,
    now: OffsetDateTime,
) -> Result<PostStatus, TransitionError> {
    use PostStatus::*;

    let next = match (current, action) {
        (Draft | Scheduled | Published, PostAction::Publish) => Published,
        (Draft | Scheduled, PostAction::Schedule { publish_at }) => {
            if *publish_at <= now {
                return Err(TransitionError::ScheduleInPast);
            }
            Scheduled
        }
        (Scheduled, PostAction::Unschedule) => Draft,
        (Published, PostAction::Unpublish) => Draft,
        (Draft | Scheduled | Published, PostAction::Archive) => Archived,
        (Archived, PostAction::Restore) => Draft,
        (from, action) => {
            return Err(TransitionError::InvalidTransition {
                from: from.as_str(),
                action: action.as_str(),
            });
        }
    };

    Ok(next)
}

/// Plain-text excerpt of an HTML body, cut on a word boundary.
pub fn derive_excerpt(body_html: &str) -> String {
    let text = collapse_whitespace(&strip_tags(body_html));
    if text.chars().count() <= EXCERPT_LENGTH {
        return text;
    }

    let cut: String = text.chars().take(EXCERPT_LENGTH).collect();
    let trimmed = match cut.rfind(char::is_whitespace) {
        Some(index) if index > 0 => &cut[..index],
        _ => cut.as_str(),
    };
    format!(
        "{}…",
        trimmed.trim_end_matches(|c: char| c.is_ascii_punctuation())
    )
}

fn strip_tags(html: &str) -> String {
    let mut output = String::with_capacity(html.len());
    let mut in_tag = false;

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                output.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => output.push(ch),
            _ => {}
        }
    }

    output
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn draft_can_publish_schedule_and_archive() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            transition(PostStatus::Draft, &PostAction::Publish, now),
            Ok(PostStatus::Published)
        );
        assert_eq!(
            transition(
                PostStatus::Draft,
                &PostAction::Schedule {
                    publish_at: now + Duration::hours(1)
                },
                now
            ),
            Ok(PostStatus::Scheduled)
        );
        assert_eq!(
            transition(PostStatus::Draft, &PostAction::Archive, now),
            Ok(PostStatus::Archived)
        );
    }

    #[test]
    fn schedule_requires_future_time() {
        let now = OffsetDateTime::now_utc();
        let err = transition(
            PostStatus::Draft,
            &PostAction::Schedule { publish_at: now },
            now,
        )
        .expect_err("past schedule rejected");
        assert_eq!(err, TransitionError::ScheduleInPast);
    }

    #[test]
    fn archived_posts_only_restore() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            transition(PostStatus::Archived, &PostAction::Restore, now),
            Ok(PostStatus::Draft)
        );
        for action in [
            PostAction::Publish,
            PostAction::Unpublish,
            PostAction::Unschedule,
            PostAction::Archive,
        ] {
            assert!(matches!(
                transition(PostStatus::Archived, &action, now),
                Err(TransitionError::InvalidTransition { from: "archived", .. })
            ));
        }
    }

    #[test]
    fn unpublish_and_unschedule_are_status_specific() {
        let now = OffsetDateTime::now_utc();
        assert!(transition(PostStatus::Draft, &PostAction::Unpublish, now).is_err());
        assert!(transition(PostStatus::Published, &PostAction::Unschedule, now).is_err());
        assert_eq!(
            transition(PostStatus::Published, &PostAction::Publish, now),
            Ok(PostStatus::Published)
        );
    }

    #[test]
    fn excerpt_strips_markup_and_cuts_on_word_boundary() {
        let body = format!("<p>{}</p>", "word ".repeat(100));
        let excerpt = derive_excerpt(&body);
        assert!(excerpt.ends_with('…'));
        assert!(excerpt.chars().count() <= EXCERPT_LENGTH + 1);
        assert!(!excerpt.contains('<'));

        assert_eq!(
            derive_excerpt("<h1>Hello</h1><p>Fish &amp; chips</p>"),
            "Hello Fish & chips"
        );
    }
}
