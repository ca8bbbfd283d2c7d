//! Glob-to-regex translation with a pattern-text cache.

use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;

/// Translate a `*`/`?` glob into an anchored regex: every regex
/// metacharacter is escaped, then `*` becomes `.*` and `?` becomes `.`.
#[must_use]
pub fn glob_to_regex(pattern: &str) -> String {
    let escaped = regex::escape(pattern);
    let translated = escaped.replace("\\*", ".*").replace("\\?", ".");
    format!("^{translated}$")
}

/// Compiled-pattern cache keyed by pattern text.
#[derive(Debug, Default)]
pub(crate) struct PatternCache {
    compiled: Mutex<HashMap<String, Regex>>,
}

impl PatternCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Compile a glob, reusing a prior compilation of the same text.
    pub(crate) fn compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        if let Ok(cache) = self.compiled.lock()
            && let Some(regex) = cache.get(pattern)
        {
            return Ok(regex.clone());
        }
        let regex = Regex::new(&glob_to_regex(pattern))?;
        if let Ok(mut cache) = self.compiled.lock() {
            cache.insert(pattern.to_string(), regex.clone());
        }
        Ok(regex)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.compiled.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_translation() {
        assert_eq!(glob_to_regex("delete_*"), "^delete_.*$");
        assert_eq!(glob_to_regex("file?"), "^file.$");
        // Metacharacters are inert.
        assert_eq!(glob_to_regex("a.b"), "^a\\.b$");
    }

    #[test]
    fn test_translated_globs_match_anchored() {
        let re = Regex::new(&glob_to_regex("delete_*")).unwrap();
        assert!(re.is_match("delete_file"));
        assert!(re.is_match("delete_"));
        assert!(!re.is_match("undelete_file"));
        assert!(!re.is_match("delete"));

        let re = Regex::new(&glob_to_regex("a.b")).unwrap();
        assert!(re.is_match("a.b"));
        assert!(!re.is_match("axb"));
    }

    #[test]
    fn test_cache_reuses_compilations() {
        let cache = PatternCache::new();
        cache.compile("read_*").unwrap();
        cache.compile("read_*").unwrap();
        cache.compile("write_*").unwrap();
        assert_eq!(cache.len(), 2);
    }
}
