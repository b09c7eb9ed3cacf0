#![allow(clippy::collapsible_if)]

use std::{collections::HashSet, net::SocketAddr};

use eyre::Result;

use crate::{
    config::models::{BehaviorConfig, SimulatorConfig},
    core::{origin::OriginKind, pattern::PathPattern},
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

const KNOWN_METHODS: [&str; 9] = [
    "GET", "HEAD", "OPTIONS", "PUT", "PATCH", "POST", "DELETE", "CONNECT", "TRACE",
];

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Unknown origin '{origin_id}' referenced by {referrer}")]
    UnknownOrigin { origin_id: String, referrer: String },

    #[error("Duplicate path pattern: {pattern}")]
    DuplicatePattern { pattern: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Emulator configuration validator
pub struct SimulatorConfigValidator;

impl SimulatorConfigValidator {
    /// Validate the entire configuration, collecting every problem found
    pub fn validate(config: &SimulatorConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        let origin_ids: HashSet<&str> = config
            .distribution
            .origins
            .iter()
            .map(|o| o.id.as_str())
            .collect();

        for origin in &config.distribution.origins {
            if origin.id.is_empty() {
                errors.push(ValidationError::MissingField {
                    field: "distribution.origins[].id".to_string(),
                });
            }
        }

        if let Err(mut behavior_errors) =
            Self::validate_behavior(&config.distribution.default_behavior, &origin_ids)
        {
            errors.append(&mut behavior_errors);
        }

        let mut seen_patterns = HashSet::new();
        for behavior in &config.distribution.behaviors {
            if !seen_patterns.insert(behavior.path_pattern.as_str()) {
                errors.push(ValidationError::DuplicatePattern {
                    pattern: behavior.path_pattern.clone(),
                });
            }
            if let Err(mut behavior_errors) = Self::validate_behavior(behavior, &origin_ids) {
                errors.append(&mut behavior_errors);
            }
        }

        for function in &config.functions {
            if function.name.is_empty() {
                errors.push(ValidationError::MissingField {
                    field: "functions[].name".to_string(),
                });
            }
            if function.handler.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("function '{}' handler", function.name),
                });
            }
            for binding in &function.events {
                if let Err(e) = PathPattern::new(&binding.path_pattern) {
                    errors.push(ValidationError::InvalidField {
                        field: format!("function '{}' path_pattern", function.name),
                        message: e.to_string(),
                    });
                }
                if let Some(origin_id) = &binding.origin_id {
                    if !origin_ids.contains(origin_id.as_str()) {
                        errors.push(ValidationError::UnknownOrigin {
                            origin_id: origin_id.clone(),
                            referrer: format!("function '{}'", function.name),
                        });
                    }
                }
            }
        }

        for (origin_id, location) in &config.origin_overrides {
            if !origin_ids.contains(origin_id.as_str()) {
                errors.push(ValidationError::UnknownOrigin {
                    origin_id: origin_id.clone(),
                    referrer: "origin_overrides".to_string(),
                });
            }
            if let Err(e) = Self::validate_location(origin_id, location) {
                errors.push(e);
            }
        }

        if config.cache.enabled && config.cache.dir.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "cache.dir".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(addr: &str) -> ValidationResult<()> {
        addr.parse::<SocketAddr>()
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidListenAddress {
                address: addr.to_string(),
                reason: e.to_string(),
            })
    }

    fn validate_behavior(
        behavior: &BehaviorConfig,
        origin_ids: &HashSet<&str>,
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let pattern = &behavior.path_pattern;

        if let Err(e) = PathPattern::new(pattern) {
            errors.push(ValidationError::InvalidField {
                field: format!("behavior '{pattern}' path_pattern"),
                message: e.to_string(),
            });
        }

        if let Some(origin_id) = &behavior.target_origin_id {
            if !origin_ids.contains(origin_id.as_str()) {
                errors.push(ValidationError::UnknownOrigin {
                    origin_id: origin_id.clone(),
                    referrer: format!("behavior '{pattern}'"),
                });
            }
        }

        for method in behavior
            .allowed_methods
            .iter()
            .chain(behavior.cached_methods.iter())
        {
            if !KNOWN_METHODS.contains(&method.to_ascii_uppercase().as_str()) {
                errors.push(ValidationError::InvalidField {
                    field: format!("behavior '{pattern}' methods"),
                    message: format!("Unknown HTTP method '{method}'"),
                });
            }
        }

        if behavior.min_ttl > behavior.max_ttl {
            // Still usable: the min bound wins when clamping.
            tracing::warn!(
                "Behavior '{}' has min_ttl {} above max_ttl {}; min_ttl will win",
                pattern,
                behavior.min_ttl,
                behavior.max_ttl
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate an origin override location
    fn validate_location(origin_id: &str, location: &str) -> ValidationResult<()> {
        match OriginKind::classify(Some(location)) {
            OriginKind::Http | OriginKind::Https => match url::Url::parse(location) {
                Ok(url) if url.host().is_some() => Ok(()),
                Ok(_) => Err(ValidationError::InvalidField {
                    field: format!("origin_overrides.{origin_id}"),
                    message: "URL must have a valid host".to_string(),
                }),
                Err(e) => Err(ValidationError::InvalidField {
                    field: format!("origin_overrides.{origin_id}"),
                    message: format!("Invalid URL format: {e}"),
                }),
            },
            OriginKind::File => {
                if !std::path::Path::new(location).is_dir() {
                    tracing::warn!(
                        "Origin '{}' directory '{}' does not exist yet",
                        origin_id,
                        location
                    );
                }
                Ok(())
            }
            OriginKind::None => Err(ValidationError::InvalidField {
                field: format!("origin_overrides.{origin_id}"),
                message: "Location cannot be empty".to_string(),
            }),
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::models::{EventBindingConfig, OriginConfig},
        core::event::Stage,
    };

    fn minimal_valid_config() -> SimulatorConfig {
        SimulatorConfig::builder()
            .listen_addr("127.0.0.1:3000")
            .origin(
                OriginConfig::new("site", "example.com"),
                Some("http://localhost:8081"),
            )
            .default_behavior(BehaviorConfig {
                target_origin_id: Some("site".to_string()),
                ..BehaviorConfig::default()
            })
            .build()
    }

    #[test]
    fn validate_accepts_minimal_config() {
        assert!(SimulatorConfigValidator::validate(&minimal_valid_config()).is_ok());
    }

    #[test]
    fn validate_rejects_bad_listen_address() {
        let mut config = minimal_valid_config();
        config.listen_addr = "localhost".to_string();
        assert!(SimulatorConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_unknown_origin_reference() {
        let mut config = minimal_valid_config();
        config.functions.push(crate::config::models::FunctionConfig {
            name: "auth".to_string(),
            handler: "builtin:auth".to_string(),
            events: vec![EventBindingConfig {
                origin_id: Some("missing".to_string()),
                ..EventBindingConfig::new(Stage::ViewerRequest, "/api/*")
            }],
        });

        let err = SimulatorConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn validate_rejects_duplicate_behaviors_and_bad_methods() {
        let mut config = minimal_valid_config();
        config
            .distribution
            .behaviors
            .push(BehaviorConfig::for_pattern("/a/*"));
        config.distribution.behaviors.push(BehaviorConfig {
            allowed_methods: vec!["FETCH".to_string()],
            ..BehaviorConfig::for_pattern("/a/*")
        });

        let err = SimulatorConfigValidator::validate(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Duplicate path pattern"));
        assert!(message.contains("FETCH"));
    }

    #[test]
    fn validate_rejects_override_without_host() {
        let mut config = minimal_valid_config();
        config
            .origin_overrides
            .insert("site".to_string(), "http://".to_string());
        assert!(SimulatorConfigValidator::validate(&config).is_err());
    }
}
