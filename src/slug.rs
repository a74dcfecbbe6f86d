//! Slug derivation for feature descriptions.
//!
//! Slugs become branch names (`feature/<slug>`), directory names, and lock
//! file names, so they are restricted to `[a-z0-9-]` and kept short. Issue
//! slugs carry a reserved `issue-<n>-` prefix so a feature derived from an
//! issue can never collide with one derived from identical free text.

use crate::error::ExitError;

/// Maximum slug length.
pub const MAX_SLUG_LEN: usize = 50;

/// Maximum length of the title portion of an issue slug. Shorter than
/// [`MAX_SLUG_LEN`] to leave room for the `issue-<n>-` prefix.
const ISSUE_TITLE_LEN: usize = 38;

/// Normalize free text into a slug: lowercase, `[a-z0-9]` kept, everything
/// else collapsed to single hyphens, trimmed, truncated to [`MAX_SLUG_LEN`].
///
/// Empty or all-punctuation input yields an empty slug; callers must treat
/// that as an input error rather than proceed.
pub fn normalize(text: &str) -> String {
    let mut slug = String::with_capacity(text.len().min(MAX_SLUG_LEN));
    let mut last_hyphen = true; // suppress leading hyphens
    for c in text.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    truncate_slug(&slug, MAX_SLUG_LEN)
}

/// Slug for an issue-derived feature: `issue-<number>-<normalized title>`.
///
/// The title portion is truncated harder than a plain slug; if it normalizes
/// to nothing the slug is just `issue-<number>`.
pub fn issue_slug(number: u64, title: &str) -> String {
    let title_part = truncate_slug(&normalize(title), ISSUE_TITLE_LEN);
    if title_part.is_empty() {
        format!("issue-{number}")
    } else {
        format!("issue-{number}-{title_part}")
    }
}

/// Pre-flight uniqueness gate over the whole batch.
///
/// Fails on the first duplicate in input order, before any lock, workspace,
/// or manifest side effect has happened.
pub fn validate_unique<'a, I>(slugs: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = std::collections::HashSet::new();
    for slug in slugs {
        if !seen.insert(slug) {
            return Err(ExitError::DuplicateSlug {
                slug: slug.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Truncate to `max` bytes and drop a trailing hyphen the cut may have left.
fn truncate_slug(slug: &str, max: usize) -> String {
    let cut = if slug.len() > max { &slug[..max] } else { slug };
    cut.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExitError;

    #[test]
    fn normalize_basic() {
        assert_eq!(normalize("Add OAuth2 & JWT Auth!"), "add-oauth2-jwt-auth");
        assert_eq!(normalize("fix login bug"), "fix-login-bug");
        assert_eq!(normalize("UPPER lower 123"), "upper-lower-123");
    }

    #[test]
    fn normalize_is_deterministic() {
        let input = "Refactor: the (whole) parser / lexer!!";
        assert_eq!(normalize(input), normalize(input));
    }

    #[test]
    fn normalize_collapses_and_trims_hyphens() {
        assert_eq!(normalize("--a---b--"), "a-b");
        assert_eq!(normalize("  spaces   everywhere  "), "spaces-everywhere");
    }

    #[test]
    fn normalize_empty_and_punctuation_only() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("!!! ??? ..."), "");
    }

    #[test]
    fn normalize_output_shape() {
        for input in [
            "Add OAuth2 & JWT Auth!",
            "x",
            "a b c d e f g",
            "émigré café",
            "123 456",
        ] {
            let slug = normalize(input);
            assert!(slug.len() <= MAX_SLUG_LEN);
            if !slug.is_empty() {
                assert!(!slug.starts_with('-') && !slug.ends_with('-'), "{slug:?}");
                assert!(
                    slug.chars().all(|c| c.is_ascii_lowercase()
                        || c.is_ascii_digit()
                        || c == '-'),
                    "{slug:?}"
                );
                assert!(!slug.contains("--"), "{slug:?}");
            }
        }
    }

    #[test]
    fn normalize_truncates_long_input() {
        let input = "word ".repeat(24); // 120 chars
        let slug = normalize(&input);
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn issue_slug_has_reserved_prefix() {
        let from_issue = issue_slug(42, "Add auth");
        assert_eq!(from_issue, "issue-42-add-auth");
        assert_ne!(from_issue, normalize("Add auth"));
    }

    #[test]
    fn issue_slug_empty_title() {
        assert_eq!(issue_slug(7, ""), "issue-7");
        assert_eq!(issue_slug(7, "???"), "issue-7");
    }

    #[test]
    fn issue_slug_truncates_title() {
        let title = "a very long issue title that keeps going and going and going";
        let slug = issue_slug(1234, title);
        assert!(slug.starts_with("issue-1234-"));
        let title_part = slug.trim_start_matches("issue-1234-");
        assert!(title_part.len() <= 38, "{title_part:?}");
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn validate_unique_accepts_distinct() {
        assert!(validate_unique(["a", "b", "c"]).is_ok());
        assert!(validate_unique([]).is_ok());
    }

    #[test]
    fn validate_unique_reports_first_duplicate() {
        let err = validate_unique(["a", "b", "a"]).unwrap_err();
        let exit_err = err.downcast_ref::<ExitError>().unwrap();
        match exit_err {
            ExitError::DuplicateSlug { slug } => assert_eq!(slug, "a"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
