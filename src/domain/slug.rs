//! Slug derivation for workspaces, pages, posts and the other addressable
//! records.
//!
//! Titles are transliterated (`pinyin` for CJK input) before `slug` turns them
//! into lowercase, hyphen-separated ASCII. Uniqueness is checked through an
//! async predicate so the caller decides the scope (global, per workspace or
//! per page).

use std::future::Future;

use pinyin::ToPinyin;
use slug::slugify;
use thiserror::Error;

const MAX_SUFFIX_ATTEMPTS: usize = 32;
const MAX_SLUG_LEN: usize = 96;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug source text is empty")]
    EmptyInput,
    #[error("failed to derive slug from `{input}`")]
    Unrepresentable { input: String },
    #[error("slug `{slug}` may only contain lowercase letters, digits and single hyphens")]
    Malformed { slug: String },
    #[error("exhausted attempts to find a unique slug for `{base}`")]
    Exhausted { base: String },
}

#[derive(Debug, Error)]
pub enum SlugAsyncError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error(transparent)]
    Slug(#[from] SlugError),
    #[error(transparent)]
    Predicate(E),
}

/// Derive a base slug from human-readable text.
pub fn derive_slug(input: &str) -> Result<String, SlugError> {
    if input.trim().is_empty() {
        return Err(SlugError::EmptyInput);
    }

    let mut candidate = slugify(transliterate(input));
    if candidate.len() > MAX_SLUG_LEN {
        candidate.truncate(MAX_SLUG_LEN);
        while candidate.ends_with('-') {
            candidate.pop();
        }
    }

    if candidate.is_empty() {
        return Err(SlugError::Unrepresentable {
            input: input.to_string(),
        });
    }

    Ok(candidate)
}

/// Accept a caller-supplied slug only when it is already in canonical form.
pub fn validate_slug(slug: &str) -> Result<String, SlugError> {
    let slug = slug.trim();
    if slug.is_empty() {
        return Err(SlugError::EmptyInput);
    }

    let canonical = slug.len() <= MAX_SLUG_LEN
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if canonical {
        Ok(slug.to_string())
    } else {
        Err(SlugError::Malformed {
            slug: slug.to_string(),
        })
    }
}

/// Derive a slug and append `-2`, `-3`, ... until `is_taken` reports it free.
pub async fn unique_slug<F, Fut, E>(input: &str, mut is_taken: F) -> Result<String, SlugAsyncError<E>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let base = derive_slug(input)?;

    if !is_taken(base.clone()).await.map_err(SlugAsyncError::Predicate)? {
        return Ok(base);
    }

    for attempt in 2..=MAX_SUFFIX_ATTEMPTS + 1 {
        let candidate = format!("{base}-{attempt}");
        if !is_taken(candidate.clone())
            .await
            .map_err(SlugAsyncError::Predicate)?
        {
            return Ok(candidate);
        }
    }

    Err(SlugAsyncError::Slug(SlugError::Exhausted { base }))
}

fn transliterate(input: &str) -> String {
    let mut output = String::with_capacity(input.len());

    for ch in input.chars() {
        if ch.is_ascii() {
            output.push(ch);
        } else if let Some(py) = ch.to_pinyin() {
            if !output.is_empty() && !output.ends_with(' ') {
                output.push(' ');
            }
            output.push_str(py.plain());
            output.push(' ');
        } else {
            output.push(ch);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[test]
    fn derives_from_mixed_scripts() {
        assert_eq!(derive_slug("Weekly Notes").expect("slug"), "weekly-notes");
        assert_eq!(
            derive_slug("Rust 周报").expect("slug"),
            "rust-zhou-bao"
        );
        assert_eq!(derive_slug("  "), Err(SlugError::EmptyInput));
    }

    #[test]
    fn long_titles_are_truncated() {
        let slug = derive_slug(&"abc ".repeat(60)).expect("slug");
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn validate_rejects_non_canonical_input() {
        assert_eq!(validate_slug("spring-issue-3").expect("valid"), "spring-issue-3");
        for bad in ["Upper", "double--dash", "-lead", "trail-", "spa ce"] {
            assert!(validate_slug(bad).is_err(), "{bad} accepted");
        }
    }

    #[tokio::test]
    async fn unique_slug_appends_counter() {
        let taken = Arc::new(Mutex::new(vec!["launch".to_string(), "launch-2".to_string()]));

        let slug = unique_slug("Launch", |candidate| {
            let taken = taken.clone();
            async move { Ok::<_, Infallible>(taken.lock().await.contains(&candidate)) }
        })
        .await
        .expect("unique slug");

        assert_eq!(slug, "launch-3");
    }

    #[tokio::test]
    async fn unique_slug_gives_up_after_bounded_attempts() {
        let err = unique_slug("Launch", |_| async { Ok::<_, Infallible>(true) })
            .await
            .expect_err("exhausted");
        assert!(matches!(
            err,
            SlugAsyncError::Slug(SlugError::Exhausted { .. })
        ));
    }
}
