//! File name pattern matching for selecting which files get transferred
//!
//! Patterns are matched against the base name of a file only, never against the full path.
//!
//! # Pattern Syntax
//!
//! - `*` matches any run of characters (never crosses `/`)
//! - `?` matches a single character
//! - `[...]` character classes, `[!...]` negated classes
//!
//! # Examples
//!
//! ```
//! use common::filter::NamePattern;
//! use std::path::Path;
//!
//! let pattern = NamePattern::parse("*.txt").unwrap();
//! assert!(pattern.matches(Path::new("/data/sub/notes.txt")));
//! assert!(!pattern.matches(Path::new("/data/notes.txt.bak")));
//! ```

use anyhow::{Context, anyhow};
use std::path::Path;

/// A compiled glob applied to file base names
#[derive(Debug, Clone)]
pub struct NamePattern {
    /// original pattern string, kept for log output
    pub original: String,
    matcher: globset::GlobMatcher,
}

impl NamePattern {
    /// Parse a pattern string into a NamePattern
    pub fn parse(pattern: &str) -> Result<Self, anyhow::Error> {
        if pattern.is_empty() {
            return Err(anyhow!("empty pattern is not allowed"));
        }
        if pattern.contains('/') {
            return Err(anyhow!(
                "pattern '{}' contains '/', patterns are matched against file names only",
                pattern
            ));
        }
        let glob = globset::GlobBuilder::new(pattern)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .with_context(|| format!("invalid glob pattern: {}", pattern))?;
        Ok(Self {
            original: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    /// Pattern that accepts every file
    pub fn any() -> Self {
        // "*" always compiles
        Self::parse("*").expect("'*' is a valid glob")
    }

    /// Check the base name of `path` against the pattern
    ///
    /// Paths without a base name (e.g. `/` or `..`) never match.
    pub fn matches(&self, path: &Path) -> bool {
        match path.file_name() {
            Some(name) => self.matcher.is_match(Path::new(name)),
            None => false,
        }
    }
}

impl Default for NamePattern {
    fn default() -> Self {
        Self::any()
    }
}

impl std::fmt::Display for NamePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.original)
    }
}

impl std::str::FromStr for NamePattern {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
