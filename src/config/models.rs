//! Configuration data structures for edgesim.
//!
//! These types map directly to YAML (also JSON / TOML) configuration files and
//! describe one emulated distribution: its origins, cache behaviors and the
//! edge functions bound to lifecycle stages. Defaults keep minimal configs short.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{
    event::Stage,
    policy::{CachePolicy, DEFAULT_MAX_TTL, DEFAULT_MIN_TTL, DEFAULT_TTL},
};

/// Pattern of the default cache behavior and the fallback hook set.
pub const WILDCARD_PATTERN: &str = "*";

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_wildcard() -> String {
    WILDCARD_PATTERN.to_string()
}

fn default_methods() -> Vec<String> {
    vec!["GET".to_string(), "HEAD".to_string()]
}

fn default_min_ttl() -> u64 {
    DEFAULT_MIN_TTL
}

fn default_max_ttl() -> u64 {
    DEFAULT_MAX_TTL
}

fn default_ttl() -> u64 {
    DEFAULT_TTL
}

/// Top-level emulator configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SimulatorConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub distribution: DistributionConfig,
    #[serde(default)]
    pub functions: Vec<FunctionConfig>,
    /// Origin id → physical location (base URL or local directory).
    #[serde(default)]
    pub origin_overrides: BTreeMap<String, String>,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            distribution: DistributionConfig::default(),
            functions: Vec::new(),
            origin_overrides: BTreeMap::new(),
            cache: CacheConfig::default(),
        }
    }
}

impl SimulatorConfig {
    pub fn builder() -> SimulatorConfigBuilder {
        SimulatorConfigBuilder::default()
    }

    pub fn origin(&self, id: &str) -> Option<&OriginConfig> {
        self.distribution.origins.iter().find(|o| o.id == id)
    }

    /// Handler locations that are files rather than `builtin:` registrations.
    pub fn hook_files(&self) -> impl Iterator<Item = &str> {
        self.functions
            .iter()
            .map(|f| f.handler.as_str())
            .filter(|handler| !handler.starts_with("builtin:"))
    }

    /// Behavior whose pattern equals `pattern`, the default behavior for `*`.
    pub fn behavior(&self, pattern: &str) -> Option<&BehaviorConfig> {
        if pattern == self.distribution.default_behavior.path_pattern {
            return Some(&self.distribution.default_behavior);
        }
        self.distribution
            .behaviors
            .iter()
            .find(|b| b.path_pattern == pattern)
    }
}

/// Distribution metadata plus its origins and cache behaviors.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DistributionConfig {
    #[serde(default = "default_distribution_id")]
    pub id: String,
    #[serde(default = "default_domain_name")]
    pub domain_name: String,
    #[serde(default)]
    pub origins: Vec<OriginConfig>,
    #[serde(default)]
    pub default_behavior: BehaviorConfig,
    /// Ordered behaviors; earlier patterns take precedence.
    #[serde(default)]
    pub behaviors: Vec<BehaviorConfig>,
}

fn default_distribution_id() -> String {
    "EDGESIMDIST".to_string()
}

fn default_domain_name() -> String {
    "localhost".to_string()
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            id: default_distribution_id(),
            domain_name: default_domain_name(),
            origins: Vec::new(),
            default_behavior: BehaviorConfig::default(),
            behaviors: Vec::new(),
        }
    }
}

/// A logical origin as declared by the distribution.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OriginConfig {
    pub id: String,
    #[serde(default)]
    pub domain_name: String,
    #[serde(default)]
    pub origin_path: String,
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
}

/// Cache behavior bound to a path pattern.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BehaviorConfig {
    #[serde(default = "default_wildcard")]
    pub path_pattern: String,
    #[serde(default)]
    pub target_origin_id: Option<String>,
    #[serde(default = "default_min_ttl")]
    pub min_ttl: u64,
    #[serde(default = "default_max_ttl")]
    pub max_ttl: u64,
    #[serde(default = "default_ttl")]
    pub default_ttl: u64,
    #[serde(default = "default_methods")]
    pub allowed_methods: Vec<String>,
    #[serde(default = "default_methods")]
    pub cached_methods: Vec<String>,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            path_pattern: default_wildcard(),
            target_origin_id: None,
            min_ttl: DEFAULT_MIN_TTL,
            max_ttl: DEFAULT_MAX_TTL,
            default_ttl: DEFAULT_TTL,
            allowed_methods: default_methods(),
            cached_methods: default_methods(),
        }
    }
}

impl BehaviorConfig {
    pub fn for_pattern(pattern: impl Into<String>) -> Self {
        Self {
            path_pattern: pattern.into(),
            ..Self::default()
        }
    }

    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            min_ttl: self.min_ttl,
            max_ttl: self.max_ttl,
            default_ttl: self.default_ttl,
            allowed_methods: self
                .allowed_methods
                .iter()
                .map(|m| m.to_ascii_uppercase())
                .collect(),
            cached_methods: self
                .cached_methods
                .iter()
                .map(|m| m.to_ascii_uppercase())
                .collect(),
        }
    }
}

/// An edge function and the stages it is bound to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FunctionConfig {
    pub name: String,
    /// Handler location: a declarative hook file or `builtin:<name>`.
    pub handler: String,
    #[serde(default)]
    pub events: Vec<EventBindingConfig>,
}

/// Binding of a function to one stage for one path pattern.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EventBindingConfig {
    pub event_type: Stage,
    #[serde(default = "default_wildcard")]
    pub path_pattern: String,
    #[serde(default)]
    pub origin_id: Option<String>,
}

/// Edge cache settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Operator override; `false` bypasses cache lookup and store entirely.
    pub enabled: bool,
    pub dir: String,
    pub namespace: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: ".edgesim/cache".to_string(),
            namespace: "edge-cache".to_string(),
        }
    }
}

/// Fluent builder, mostly for embedding and tests.
#[derive(Debug, Default)]
pub struct SimulatorConfigBuilder {
    config: SimulatorConfig,
}

impl SimulatorConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Declare an origin and, optionally, its physical location
    pub fn origin(mut self, origin: OriginConfig, location: Option<&str>) -> Self {
        if let Some(location) = location {
            self.config
                .origin_overrides
                .insert(origin.id.clone(), location.to_string());
        }
        self.config.distribution.origins.push(origin);
        self
    }

    /// Replace the default (`*`) behavior
    pub fn default_behavior(mut self, behavior: BehaviorConfig) -> Self {
        self.config.distribution.default_behavior = BehaviorConfig {
            path_pattern: default_wildcard(),
            ..behavior
        };
        self
    }

    /// Append an ordered cache behavior
    pub fn behavior(mut self, behavior: BehaviorConfig) -> Self {
        self.config.distribution.behaviors.push(behavior);
        self
    }

    /// Bind a handler to a stage for a path pattern
    pub fn function(
        mut self,
        name: impl Into<String>,
        handler: impl Into<String>,
        events: Vec<EventBindingConfig>,
    ) -> Self {
        self.config.functions.push(FunctionConfig {
            name: name.into(),
            handler: handler.into(),
            events,
        });
        self
    }

    /// Set cache settings
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    pub fn build(self) -> SimulatorConfig {
        self.config
    }
}

impl EventBindingConfig {
    pub fn new(event_type: Stage, path_pattern: impl Into<String>) -> Self {
        Self {
            event_type,
            path_pattern: path_pattern.into(),
            origin_id: None,
        }
    }
}

impl OriginConfig {
    pub fn new(id: impl Into<String>, domain_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            domain_name: domain_name.into(),
            origin_path: String::new(),
            custom_headers: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_behavior_policy_uppercases_methods() {
        let behavior = BehaviorConfig {
            allowed_methods: vec!["get".into(), "post".into()],
            ..BehaviorConfig::for_pattern("/api/*")
        };
        let policy = behavior.policy();
        assert!(policy.allowed_methods.contains(&"POST".to_string()));
        assert_eq!(policy.default_ttl, DEFAULT_TTL);
    }

    #[test]
    fn test_behavior_lookup_prefers_default_for_wildcard() {
        let config = SimulatorConfig::builder()
            .default_behavior(BehaviorConfig {
                default_ttl: 5,
                ..BehaviorConfig::default()
            })
            .behavior(BehaviorConfig::for_pattern("/images/*"))
            .build();

        assert_eq!(config.behavior("*").map(|b| b.default_ttl), Some(5));
        assert!(config.behavior("/images/*").is_some());
        assert!(config.behavior("/other/*").is_none());
    }

    #[test]
    fn test_hook_files_skip_builtins() {
        let config = SimulatorConfig::builder()
            .function("auth", "builtin:auth", vec![])
            .function("headers", "hooks/headers.yaml", vec![])
            .build();

        assert_eq!(config.hook_files().collect::<Vec<_>>(), vec!["hooks/headers.yaml"]);
    }
}
