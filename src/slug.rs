//! URL slugs derived from titles and names.

use regex::Regex;
use std::future::Future;

lazy_static::lazy_static! {
    /// Runs of anything that is not a lowercase letter or digit.
    static ref NON_ALPHANUMERIC: Regex = Regex::new(r"[^a-z0-9]+").unwrap();

    /// Valid slug pattern: lowercase letters, numbers, and single hyphens
    static ref SLUG_REGEX: Regex = Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap();
}

/// Lowercases `text`, collapses every run of non-alphanumerics into one
/// hyphen and trims hyphens from both ends. All-symbol input yields `""`.
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    NON_ALPHANUMERIC
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

pub fn is_valid_slug(slug: &str) -> bool {
    SLUG_REGEX.is_match(slug)
}

/// Returns `candidate` if it is free, otherwise the first free
/// `candidate-1`, `candidate-2`, ... in increasing order.
///
/// The probe is advisory: the caller still claims the result with a guarded
/// write, and a concurrent claimer makes that write fail.
pub async fn unique_slug<F, Fut, E>(candidate: &str, mut exists: F) -> Result<String, E>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    if !exists(candidate.to_string()).await? {
        return Ok(candidate.to_string());
    }

    let mut counter: u64 = 1;
    loop {
        let probe = format!("{candidate}-{counter}");
        if !exists(probe.clone()).await? {
            return Ok(probe);
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::convert::Infallible;

    #[test]
    fn test_slugify_punctuation() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
    }

    #[test]
    fn test_slugify_collapses_dashes_and_spaces() {
        assert_eq!(slugify("  multiple---dashes  "), "multiple-dashes");
    }

    #[test]
    fn test_slugify_all_symbols_is_empty() {
        assert_eq!(slugify("!!! ???"), "");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn test_slugify_non_ascii_letters_become_separators() {
        assert_eq!(slugify("Café au lait"), "caf-au-lait");
    }

    #[test]
    fn test_is_valid_slug() {
        assert!(is_valid_slug("hello-world"));
        assert!(is_valid_slug("post-2"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("-leading"));
        assert!(!is_valid_slug("Upper"));
        assert!(!is_valid_slug("double--dash"));
    }

    #[tokio::test]
    async fn test_unique_slug_returns_candidate_when_free() {
        let slug = unique_slug("test-post", |_| async { Ok::<_, Infallible>(false) })
            .await
            .unwrap();
        assert_eq!(slug, "test-post");
    }

    #[tokio::test]
    async fn test_unique_slug_probes_in_order() {
        let taken: HashSet<String> = ["test-post", "test-post-1", "test-post-2"]
            .into_iter()
            .map(String::from)
            .collect();
        let mut probes = Vec::new();

        let slug = unique_slug("test-post", |s| {
            probes.push(s.clone());
            let hit = taken.contains(&s);
            async move { Ok::<_, Infallible>(hit) }
        })
        .await
        .unwrap();

        assert_eq!(slug, "test-post-3");
        assert_eq!(
            probes,
            vec!["test-post", "test-post-1", "test-post-2", "test-post-3"]
        );
    }

    #[tokio::test]
    async fn test_unique_slug_propagates_errors() {
        let result = unique_slug("x", |_| async { Err::<bool, &str>("down") }).await;
        assert_eq!(result, Err("down"));
    }
}
