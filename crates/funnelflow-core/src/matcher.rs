//! URL pattern matching for page-view steps.
//!
//! Matching always runs against the *path* of the tracked URL: scheme, host,
//! query string and fragment are stripped first, so `/checkout` matches
//! `https://shop.example/checkout?ref=email#top`. Patterns are compared
//! case-sensitively.

use regex::Regex;
use url::Url;

use crate::error::CoreError;
use crate::funnel::MatchType;

/// Reduce a tracked URL to its path.
///
/// Accepts full URLs and bare paths. A URL with an empty path yields "/".
/// Inputs that parse as neither (e.g. "checkout" with no slash) are returned
/// unchanged, minus any query or fragment suffix.
pub fn normalize_url_path(current_url: &str) -> String {
    let trimmed = current_url.trim();
    if let Ok(parsed) = Url::parse(trimmed) {
        // `Url::parse` succeeds for scheme-only strings like "mailto:x";
        // those have no host and no meaningful path for our purposes.
        if parsed.has_host() {
            let path = parsed.path();
            return if path.is_empty() {
                "/".to_string()
            } else {
                path.to_string()
            };
        }
    }
    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    if without_query.is_empty() {
        "/".to_string()
    } else {
        without_query.to_string()
    }
}

/// Does `current_url` satisfy a page-view step's pattern?
///
/// An invalid regex never matches; step validation rejects bad regexes at
/// write time, so hitting this at match time means the pattern predates the
/// check or was seeded directly.
pub fn step_matches_url(pattern: &str, match_type: MatchType, current_url: &str) -> bool {
    let path = normalize_url_path(current_url);
    match match_type {
        MatchType::Exact => path == pattern,
        MatchType::Contains => path.contains(pattern),
        MatchType::StartsWith => path.starts_with(pattern),
        MatchType::Regex => match Regex::new(pattern) {
            Ok(re) => re.is_match(&path),
            Err(err) => {
                tracing::warn!(pattern, %err, "invalid step url regex, treating as no-match");
                false
            }
        },
    }
}

/// Compile-check a regex pattern. Used by step validation so broken patterns
/// are rejected before they are stored.
pub fn check_regex_pattern(pattern: &str) -> Result<(), CoreError> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| CoreError::InvalidPattern(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_scheme_host_query_fragment() {
        assert_eq!(
            normalize_url_path("https://shop.example/checkout?ref=email#top"),
            "/checkout"
        );
        assert_eq!(normalize_url_path("http://example.com"), "/");
        assert_eq!(normalize_url_path("https://example.com/a/b/"), "/a/b/");
    }

    #[test]
    fn normalize_accepts_bare_paths() {
        assert_eq!(normalize_url_path("/pricing"), "/pricing");
        assert_eq!(normalize_url_path("/pricing?utm_source=x"), "/pricing");
        assert_eq!(normalize_url_path("/docs#install"), "/docs");
        assert_eq!(normalize_url_path(""), "/");
    }

    #[test]
    fn exact_match_is_strict() {
        assert!(step_matches_url("/checkout", MatchType::Exact, "https://a.example/checkout"));
        assert!(!step_matches_url("/checkout", MatchType::Exact, "https://a.example/checkout/"));
        assert!(!step_matches_url("/checkout", MatchType::Exact, "https://a.example/Checkout"));
    }

    #[test]
    fn exact_match_ignores_query_string() {
        assert!(step_matches_url(
            "/checkout",
            MatchType::Exact,
            "https://a.example/checkout?step=2&coupon=X"
        ));
    }

    #[test]
    fn contains_match() {
        assert!(step_matches_url("product", MatchType::Contains, "/shop/product/42"));
        assert!(!step_matches_url("cart", MatchType::Contains, "/shop/product/42"));
    }

    #[test]
    fn starts_with_match() {
        assert!(step_matches_url("/blog/", MatchType::StartsWith, "https://a.example/blog/post-1"));
        assert!(!step_matches_url("/blog/", MatchType::StartsWith, "https://a.example/about"));
    }

    #[test]
    fn regex_match() {
        assert!(step_matches_url(
            r"^/product/\d+$",
            MatchType::Regex,
            "https://a.example/product/42"
        ));
        assert!(!step_matches_url(
            r"^/product/\d+$",
            MatchType::Regex,
            "https://a.example/product/42/reviews"
        ));
    }

    #[test]
    fn invalid_regex_never_matches() {
        assert!(!step_matches_url("([unclosed", MatchType::Regex, "/anything"));
    }

    #[test]
    fn check_regex_pattern_rejects_invalid() {
        assert!(check_regex_pattern(r"^/product/\d+$").is_ok());
        assert!(check_regex_pattern("([unclosed").is_err());
    }
}
