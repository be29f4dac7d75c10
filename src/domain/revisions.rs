//! Revision digests and change summaries.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Upper bound of stored revisions per post.
pub const MAX_REVISIONS_PER_POST: usize = 50;

/// Borrowed view of the versioned fields of a post.
#[derive(Debug, Clone, Copy)]
pub struct RevisionContent<'a> {
    pub title: &'a str,
    pub excerpt: &'a str,
    pub body_html: &'a str,
}

impl RevisionContent<'_> {
    /// Hex SHA-256 over the NUL-separated content fields.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.excerpt.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.body_html.as_bytes());
        hex::encode(hasher.finalize().as_slice())
    }
}

/// Which versioned fields differ between two contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RevisionDiff {
    pub title_changed: bool,
    pub excerpt_changed: bool,
    pub body_changed: bool,
}

impl RevisionDiff {
    pub fn between(left: &RevisionContent<'_>, right: &RevisionContent<'_>) -> Self {
        Self {
            title_changed: left.title != right.title,
            excerpt_changed: left.excerpt != right.excerpt,
            body_changed: left.body_html != right.body_html,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content<'a>(title: &'a str, excerpt: &'a str, body: &'a str) -> RevisionContent<'a> {
        RevisionContent {
            title,
            excerpt,
            body_html: body,
        }
    }

    #[test]
    fn digest_is_stable_and_field_separated() {
        let a = content("ab", "c", "d");
        let b = content("a", "bc", "d");
        assert_eq!(a.digest(), content("ab", "c", "d").digest());
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn diff_reports_changed_fields() {
        let diff = RevisionDiff::between(&content("t", "e", "b"), &content("t", "e2", "b"));
        assert_eq!(
            diff,
            RevisionDiff {
                title_changed: false,
                excerpt_changed: true,
                body_changed: false,
            }
        );
    }
}
