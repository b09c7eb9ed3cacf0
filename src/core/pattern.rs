//! Glob path patterns used to route requests to hook sets.
//!
//! `*` matches any run of characters including `/`, `?` matches exactly one
//! character and everything else is literal. Patterns are anchored at both
//! ends; a missing leading `/` is implied.
use regex::Regex;

use crate::config::models::WILDCARD_PATTERN;

#[derive(Debug, Clone)]
pub struct PathPattern {
    glob: String,
    regex: Regex,
}

impl PathPattern {
    pub fn new(glob: &str) -> Result<Self, regex::Error> {
        let glob = glob.trim();
        let mut source = String::with_capacity(glob.len() * 2 + 4);
        source.push('^');
        if !glob.starts_with('/') && !glob.starts_with('*') {
            source.push('/');
        }
        for ch in glob.chars() {
            match ch {
                '*' => source.push_str(".*"),
                '?' => source.push('.'),
                other => source.push_str(&regex::escape(&other.to_string())),
            }
        }
        source.push('$');

        Ok(Self {
            glob: glob.to_string(),
            regex: Regex::new(&source)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }

    pub fn is_wildcard(&self) -> bool {
        self.glob == WILDCARD_PATTERN
    }

    /// Test a request path; any query string is ignored.
    pub fn matches(&self, path: &str) -> bool {
        let path = path.split_once('?').map_or(path, |(path, _)| path);
        self.regex.is_match(path)
    }
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.glob == other.glob
    }
}

impl Eq for PathPattern {}
