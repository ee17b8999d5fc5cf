//! Regular expressions for `=~`, `func.matches`, `func.split` and
//! `func.replace`.
//!
//! `matches` is a whole-text match; `find` searches.  Compiled patterns are
//! kept in a process-wide cache since scripts tend to reuse the same
//! literal pattern inside loops.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use regex::Regex;

/// Upper bound on cached patterns; the cache is cleared when reached.
const CACHE_LIMIT: usize = 256;

/// Error returned when a pattern cannot be compiled.
#[derive(Debug)]
pub enum PatternError {
    InvalidRegex(regex::Error),
}

impl std::fmt::Display for PatternError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternError::InvalidRegex(e) => write!(f, "regex error: {e}"),
        }
    }
}

impl std::error::Error for PatternError {}

/// A compiled pattern.  Clone is a reference-count increment.
#[derive(Clone)]
pub struct Pattern {
    src: String,
    search: Arc<Regex>,
    whole: Arc<Regex>,
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern").field("src", &self.src).finish()
    }
}

impl Pattern {
    pub fn new(src: &str) -> Result<Self, PatternError> {
        let search = Regex::new(src).map_err(PatternError::InvalidRegex)?;
        let whole = Regex::new(&format!("^(?:{src})$")).map_err(PatternError::InvalidRegex)?;
        Ok(Self { src: src.to_owned(), search: Arc::new(search), whole: Arc::new(whole) })
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    /// `true` if the whole of `text` matches.
    pub fn matches(&self, text: &str) -> bool {
        self.whole.is_match(text)
    }

    /// Byte range of the first match anywhere in `text`.
    pub fn find(&self, text: &str) -> Option<(usize, usize)> {
        self.search.find(text).map(|m| (m.start(), m.end()))
    }

    pub fn split<'t>(&self, text: &'t str) -> Vec<&'t str> {
        self.search.split(text).collect()
    }

    /// Replace every match; `$1`/`${name}` in `replacement` expand to groups.
    pub fn replace_all(&self, text: &str, replacement: &str) -> String {
        self.search.replace_all(text, replacement).into_owned()
    }
}

static CACHE: OnceLock<Mutex<HashMap<String, Pattern>>> = OnceLock::new();

/// Compile `src`, reusing an earlier compilation when possible.
pub fn cached(src: &str) -> Result<Pattern, PatternError> {
    let mut cache = CACHE.get_or_init(|| Mutex::new(HashMap::new())).lock();
    if let Some(p) = cache.get(src) {
        return Ok(p.clone());
    }
    let pattern = Pattern::new(src)?;
    if cache.len() >= CACHE_LIMIT {
        tracing::debug!(entries = cache.len(), "pattern cache full, clearing");
        cache.clear();
    }
    cache.insert(src.to_owned(), pattern.clone());
    Ok(pattern)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_match_vs_search() {
        let p = Pattern::new("a+b").unwrap();
        assert!(p.matches("aaab"));
        assert!(!p.matches("xaaab"));
        assert_eq!(p.find("xaaab"), Some((1, 5)));
    }

    #[test]
    fn alternation_is_anchored_as_a_group() {
        let p = Pattern::new("cat|dog").unwrap();
        assert!(p.matches("dog"));
        assert!(!p.matches("hotdog"));
    }

    #[test]
    fn split_and_replace() {
        let p = Pattern::new(r"\s*,\s*").unwrap();
        assert_eq!(p.split("a , b,c"), vec!["a", "b", "c"]);
        let p = Pattern::new(r"(\w+)@(\w+)").unwrap();
        assert_eq!(p.replace_all("me@host", "$2:$1"), "host:me");
    }

    #[test]
    fn invalid_pattern() {
        let err = Pattern::new("(").unwrap_err();
        assert!(err.to_string().starts_with("regex error"));
    }

    #[test]
    fn cache_returns_same_pattern() {
        let a = cached("x[0-9]+").unwrap();
        let b = cached("x[0-9]+").unwrap();
        assert!(Arc::ptr_eq(&a.search, &b.search));
    }
}
