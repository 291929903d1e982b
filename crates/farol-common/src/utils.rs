//! Utility functions for Farol
//!
//! Common helper functions used across the codebase.

use std::sync::LazyLock;

use dashmap::DashMap;
use md5::{Digest, Md5};

/// Regex pattern for validating identifiers (dataId, group, etc.)
static VALID_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new("^[a-zA-Z0-9_.:-]*$").expect("Invalid regex pattern"));

/// Cache of compiled glob patterns, keyed by the raw pattern string.
static GLOB_CACHE: LazyLock<DashMap<String, regex::Regex>> = LazyLock::new(DashMap::new);

/// Validate a string contains only allowed characters
///
/// Allowed characters: alphanumeric, underscore, dot, colon, hyphen
pub fn is_valid(str: &str) -> bool {
    VALID_PATTERN.is_match(str)
}

/// Match `text` against a glob pattern where `*` matches any sequence.
///
/// Compiled patterns are cached; an unparsable pattern never matches.
pub fn glob_matches(pattern: &str, text: &str) -> bool {
    if pattern.is_empty() || pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == text;
    }

    if let Some(re) = GLOB_CACHE.get(pattern) {
        return re.is_match(text);
    }

    let escaped = regex::escape(pattern).replace("\\*", ".*");
    match regex::Regex::new(&format!("^{}$", escaped)) {
        Ok(re) => {
            let matched = re.is_match(text);
            GLOB_CACHE.insert(pattern.to_string(), re);
            matched
        }
        Err(_) => false,
    }
}

/// Lowercase hex md5 of a string, the checksum format used for config content.
pub fn md5_hex(content: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(content.as_bytes());
    const_hex::encode(hasher.finalize())
}

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_alphanumeric() {
        assert!(is_valid("abc123"));
        assert!(is_valid("test_value"));
        assert!(is_valid("test-value"));
        assert!(is_valid("test.value"));
        assert!(is_valid("test:value"));
    }

    #[test]
    fn test_is_valid_invalid_chars() {
        assert!(!is_valid("test value"));
        assert!(!is_valid("test@value"));
        assert!(!is_valid("test/value"));
    }

    #[test]
    fn test_glob_matches_literal() {
        assert!(glob_matches("my-service", "my-service"));
        assert!(!glob_matches("my-service", "other-service"));
    }

    #[test]
    fn test_glob_matches_wildcard() {
        assert!(glob_matches("*", "anything"));
        assert!(glob_matches("svc-*", "svc-a"));
        assert!(glob_matches("svc-*", "svc-"));
        assert!(!glob_matches("svc-*", "other"));
        assert!(glob_matches("*-prod", "billing-prod"));
    }

    #[test]
    fn test_glob_matches_escapes_regex_meta() {
        assert!(glob_matches("a.b*", "a.bc"));
        assert!(!glob_matches("a.b*", "axbc"));
    }

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(md5_hex("").len(), 32);
        assert_ne!(md5_hex("v1"), md5_hex("v2"));
    }

    #[test]
    fn test_now_millis_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(b >= a);
    }
}
