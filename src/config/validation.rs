//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid, weights >= 1)
//! - Check that every bind address parses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("at least one backend must be configured")]
    NoBackends,

    #[error("backend #{index}: host must not be empty")]
    EmptyHost { index: usize },

    #[error("backend #{index}: port must be non-zero")]
    ZeroPort { index: usize },

    #[error("backend #{index}: weight must be at least 1")]
    ZeroWeight { index: usize },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("health_check.path must start with '/', got {0:?}")]
    RelativeHealthPath(String),

    #[error("security.confidence_threshold must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f64),

    #[error("{field} is not a valid socket address: {value:?}")]
    InvalidAddress { field: &'static str, value: String },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }
    for (index, backend) in config.backends.iter().enumerate() {
        if backend.host.trim().is_empty() {
            errors.push(ValidationError::EmptyHost { index });
        }
        if backend.port == 0 {
            errors.push(ValidationError::ZeroPort { index });
        }
        if backend.weight == 0 {
            errors.push(ValidationError::ZeroWeight { index });
        }
    }

    let durations = [
        ("health_check.interval_secs", config.health_check.interval_secs),
        ("health_check.timeout_secs", config.health_check.timeout_secs),
        ("timeouts.forward_secs", config.timeouts.forward_secs),
        ("timeouts.classifier_ms", config.timeouts.classifier_ms),
        ("security.window_secs", config.security.window_secs),
    ];
    for (field, value) in durations {
        if value == 0 {
            errors.push(ValidationError::ZeroDuration { field });
        }
    }

    if !config.health_check.path.starts_with('/') {
        errors.push(ValidationError::RelativeHealthPath(
            config.health_check.path.clone(),
        ));
    }

    let threshold = config.security.confidence_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        errors.push(ValidationError::ThresholdOutOfRange(threshold));
    }

    let mut addresses = vec![("listener.bind_address", &config.listener.bind_address)];
    if config.observability.metrics_enabled {
        addresses.push(("observability.metrics_address", &config.observability.metrics_address));
    }
    if config.admin.enabled {
        addresses.push(("admin.bind_address", &config.admin.bind_address));
    }
    for (field, value) in addresses {
        if value.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                field,
                value: value.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(validate_config(&ProxyConfig::with_default_backends()), Ok(()));
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = ProxyConfig::default();
        config.backends.push(BackendConfig::new(" ", 0, 0));
        config.health_check.path = "health".into();
        config.timeouts.forward_secs = 0;
        config.security.confidence_threshold = 1.5;
        config.listener.bind_address = "nowhere".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::EmptyHost { index: 0 },
                ValidationError::ZeroPort { index: 0 },
                ValidationError::ZeroWeight { index: 0 },
                ValidationError::ZeroDuration { field: "timeouts.forward_secs" },
                ValidationError::RelativeHealthPath("health".into()),
                ValidationError::ThresholdOutOfRange(1.5),
                ValidationError::InvalidAddress {
                    field: "listener.bind_address",
                    value: "nowhere".into(),
                },
            ]
        );
    }

    #[test]
    fn test_empty_backends() {
        let errors = validate_config(&ProxyConfig::default()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::NoBackends]);
    }
}
