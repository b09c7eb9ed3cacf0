//! Cache policy and TTL derivation.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::event::EdgeHeaders;

pub const DEFAULT_MIN_TTL: u64 = 0;
pub const DEFAULT_MAX_TTL: u64 = 31_536_000;
pub const DEFAULT_TTL: u64 = 86_400;

fn default_methods() -> Vec<String> {
    vec!["GET".to_string(), "HEAD".to_string()]
}

/// TTL bounds plus allowed and cached methods for one hook set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    pub min_ttl: u64,
    pub max_ttl: u64,
    pub default_ttl: u64,
    pub allowed_methods: Vec<String>,
    pub cached_methods: Vec<String>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            min_ttl: DEFAULT_MIN_TTL,
            max_ttl: DEFAULT_MAX_TTL,
            default_ttl: DEFAULT_TTL,
            allowed_methods: default_methods(),
            cached_methods: default_methods(),
        }
    }
}

impl CachePolicy {
    pub fn allows(&self, method: &str) -> bool {
        self.allowed_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
    }

    pub fn caches(&self, method: &str) -> bool {
        self.cached_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
    }

    /// TTL for a response: `max-age` if present, else the default, then
    /// bounded by max first and min second.
    pub fn ttl_for(&self, headers: &EdgeHeaders) -> Duration {
        let mut ttl = headers
            .get("cache-control")
            .and_then(parse_max_age)
            .unwrap_or(self.default_ttl);
        if ttl > self.max_ttl {
            ttl = self.max_ttl;
        }
        if ttl < self.min_ttl {
            ttl = self.min_ttl;
        }
        Duration::from_secs(ttl)
    }
}

/// Extract the `max-age` directive from a `cache-control` value.
pub fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.trim().split_once('=')?;
        if name.trim().eq_ignore_ascii_case("max-age") {
            value.trim().trim_matches('"').parse().ok()
        } else {
            None
        }
    })
}
