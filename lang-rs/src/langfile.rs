//! Translation files: `key = value` lines read without running a script.
//!
//! Used by `linker.link`, which only needs the translation map of a file.
//! Files are parsed once and kept in a process-wide [`cache`] keyed by
//! canonical path.
//!
//! ## Format
//!
//! ```text
//! # comment
//! greeting = Hello\nWorld
//! lang.name = demo
//! ```
//!
//! Values may contain `\n` (newline) and `\\` (backslash); any other
//! backslash is literal.  Everything after `" = "` is the value, trailing
//! blanks included.  Lines with a `$`, `&` or `fp.` assignment, or script
//! control words, are skipped.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use thiserror::Error;

pub type TranslationMap = BTreeMap<String, String>;

/// A line that is neither blank, a comment, script code nor `key = value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum LangFileError {
    #[error("can't read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn decode_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Inverse of [`decode_value`]: a backslash is only doubled where the
/// decoder would otherwise read it as the start of an escape.
fn encode_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if matches!(chars.peek(), Some('n' | '\\' | '\n')) => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

fn is_script_line(line: &str) -> bool {
    line.starts_with(['$', '&']) || line.starts_with("fp.") || line.starts_with("con.")
        || line.starts_with("func.") || line.starts_with("linker.") || line.starts_with("return")
        || line.starts_with("throw")
}

/// Parse translation lines out of `src`.
pub fn read_str(src: &str) -> (TranslationMap, Vec<LineError>) {
    let mut map = TranslationMap::new();
    let mut errors = Vec::new();
    for (i, raw) in src.lines().enumerate() {
        let line = raw.trim_start();
        if line.trim_end().is_empty() || line.starts_with('#') || is_script_line(line) {
            continue;
        }
        match line.split_once(" = ") {
            Some((key, value)) if !key.trim().is_empty() => {
                map.insert(key.trim().to_owned(), decode_value(value));
            }
            _ => errors.push(LineError {
                line: i + 1,
                message: format!("expected \"key = value\": {}", line.trim_end()),
            }),
        }
    }
    (map, errors)
}

/// Serialise `map`, one `key = value` line per entry in key order.
pub fn write_map(map: &TranslationMap) -> String {
    let mut out = String::new();
    for (k, v) in map {
        let _ = writeln!(out, "{k} = {}", encode_value(v));
    }
    out
}

pub fn read_file(path: &Path) -> Result<TranslationMap, LangFileError> {
    let src = std::fs::read_to_string(path)
        .map_err(|source| LangFileError::Io { path: path.to_owned(), source })?;
    let (map, errors) = read_str(&src);
    for e in &errors {
        tracing::warn!(path = %path.display(), line = e.line, message = %e.message, "skipped translation line");
    }
    Ok(map)
}

// ── Cache ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct TranslationCache {
    files: HashMap<PathBuf, Arc<TranslationMap>>,
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_owned())
}

impl TranslationCache {
    pub fn get_or_load(&mut self, path: &Path) -> Result<Arc<TranslationMap>, LangFileError> {
        let key = canonical(path);
        if let Some(map) = self.files.get(&key) {
            return Ok(map.clone());
        }
        self.reload(path)
    }

    /// Re-read `path` even if it is cached.
    pub fn reload(&mut self, path: &Path) -> Result<Arc<TranslationMap>, LangFileError> {
        let key = canonical(path);
        let map = Arc::new(read_file(&key)?);
        tracing::debug!(path = %key.display(), entries = map.len(), "translation file cached");
        self.files.insert(key, map.clone());
        Ok(map)
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

pub fn cache() -> &'static Mutex<TranslationCache> {
    static CACHE: OnceLock<Mutex<TranslationCache>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(TranslationCache::default()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write as _;

    #[test]
    fn reads_pairs_and_reports_bad_lines() {
        let src = "# header\n\ngreeting = Hello\\nWorld\n$x = 1\nnot a pair\npath = C:\\\\dir\n";
        let (map, errors) = read_str(src);
        assert_eq!(map["greeting"], "Hello\nWorld");
        assert_eq!(map["path"], "C:\\dir");
        assert!(!map.contains_key("$x"));
        assert_eq!(errors, vec![LineError { line: 5, message: "expected \"key = value\": not a pair".into() }]);
    }

    #[test]
    fn write_is_sorted_and_reversible() {
        let mut map = TranslationMap::new();
        map.insert("b".into(), "two\nlines".into());
        map.insert("a".into(), "one".into());
        let text = write_map(&map);
        assert_eq!(text, "a = one\nb = two\\nlines\n");
        assert_eq!(read_str(&text).0, map);
    }

    #[test]
    fn literal_backslashes_and_trailing_blanks_survive() {
        for text in ["path = C:\\dir\\file\n", "greeting = hi \n", "esc = a\\\\n\\\\\\b\n", "empty = \n"] {
            assert_eq!(write_map(&read_str(text).0), text);
        }
        assert_eq!(read_str("path = C:\\dir\\file\n").0["path"], "C:\\dir\\file");
        assert_eq!(read_str("greeting = hi \n").0["greeting"], "hi ");
    }

    #[test]
    fn backslash_before_escape_letters_is_doubled() {
        let mut map = TranslationMap::new();
        map.insert("a".into(), "x\\ny\\".into());
        map.insert("b".into(), "\\\n".into());
        let text = write_map(&map);
        assert_eq!(text, "a = x\\\\ny\\\nb = \\\\\\n\n");
        assert_eq!(read_str(&text).0, map);
    }

    #[test]
    fn cache_loads_once_until_reload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "k = v1").unwrap();
        let mut cache = TranslationCache::default();
        assert_eq!(cache.get_or_load(file.path()).unwrap()["k"], "v1");

        std::fs::write(file.path(), "k = v2\n").unwrap();
        assert_eq!(cache.get_or_load(file.path()).unwrap()["k"], "v1");
        assert_eq!(cache.reload(file.path()).unwrap()["k"], "v2");
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn missing_file_is_io_error() {
        let mut cache = TranslationCache::default();
        let err = cache.get_or_load(Path::new("/nonexistent/lang/file.lang")).unwrap_err();
        assert!(matches!(err, LangFileError::Io { .. }));
    }
}
