//! Configuration loading from disk and environment.
//!
//! Loading runs before the subscriber exists, so anything worth warning
//! about is returned as a [`ConfigWarning`] for the caller to log.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

const DEFAULT_PORT: u16 = 8000;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// Something the loader tolerated but the operator should hear about.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigWarning {
    #[error("config file {} not found, using defaults", .0.display())]
    MissingFile(PathBuf),

    #[error("ignoring unparsable environment override {key}={value:?}")]
    IgnoredOverride { key: &'static str, value: String },
}

/// A validated config plus the warnings raised while building it.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: ProxyConfig,
    pub warnings: Vec<ConfigWarning>,
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a TOML file without validating it.
pub fn read_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Load configuration, apply environment overrides, then validate.
///
/// A missing file is not an error: the stock defaults (three local backends)
/// are used instead and a warning is returned.
pub fn load_config(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let mut warnings = Vec::new();
    let mut config = if path.exists() {
        read_config(path)?
    } else {
        warnings.push(ConfigWarning::MissingFile(path.to_path_buf()));
        ProxyConfig::with_default_backends()
    };

    warnings.extend(apply_env_overrides(&mut config, |key| std::env::var(key).ok()));
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(LoadedConfig { config, warnings })
}

/// Apply the deployment environment variables on top of a parsed config.
///
/// Unparsable values are skipped and reported, so a typo in the environment
/// never hides a valid file setting.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, lookup: F) -> Vec<ConfigWarning>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env = Env {
        lookup,
        warnings: Vec::new(),
    };

    let host = env.raw("LB_HOST");
    let port = env.parsed::<u16>("LB_PORT");
    if host.is_some() || port.is_some() {
        let (current_host, current_port) = split_bind_address(&config.listener.bind_address);
        config.listener.bind_address = join_host_port(
            host.as_deref().unwrap_or(&current_host),
            port.unwrap_or(current_port),
        );
    }
    if let Some(algorithm) = env.parsed("LB_ALGORITHM") {
        config.load_balancer.algorithm = algorithm;
    }
    if let Some(secs) = env.parsed("HEALTH_CHECK_INTERVAL") {
        config.health_check.interval_secs = secs;
    }
    if let Some(secs) = env.parsed("HEALTH_CHECK_TIMEOUT") {
        config.health_check.timeout_secs = secs;
    }
    if let Some(enabled) = env.flag("ENABLE_AI_SECURITY") {
        config.security.screening_enabled = enabled;
    }
    if let Some(block) = env.flag("BLOCK_MALICIOUS_REQUESTS") {
        config.security.block_malicious = block;
    }
    if let Some(level) = env.raw("LOG_LEVEL") {
        config.observability.log_level = level.to_lowercase();
    }
    if let Some(threshold) = env.parsed("MODEL_CONFIDENCE_THRESHOLD") {
        config.security.confidence_threshold = threshold;
    }
    if let Some(secs) = env.parsed("REQUEST_TIMEOUT") {
        config.timeouts.forward_secs = secs;
    }
    if let Some(origins) = env.raw("CORS_ORIGINS") {
        config.admin.cors_origins = origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();
    }

    env.warnings
}

struct Env<F> {
    lookup: F,
    warnings: Vec<ConfigWarning>,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn parsed<T: FromStr>(&mut self, key: &'static str) -> Option<T> {
        let raw = self.raw(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                self.warnings
                    .push(ConfigWarning::IgnoredOverride { key, value: raw });
                None
            }
        }
    }

    fn flag(&self, key: &str) -> Option<bool> {
        self.raw(key)
            .map(|raw| raw.trim().eq_ignore_ascii_case("true"))
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
fn split_bind_address(address: &str) -> (String, u16) {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return (addr.ip().to_string(), addr.port());
    }
    match address.rsplit_once(':') {
        Some((host, port)) => (
            host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port.parse().unwrap_or(DEFAULT_PORT),
        ),
        None => (address.to_string(), DEFAULT_PORT),
    }
}

/// Join a host and port into a bindable address, bracketing IPv6 literals.
fn join_host_port(host: &str, port: u16) -> String {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    match bare.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port).to_string(),
        Err(_) => format!("{}:{}", host, port),
    }
}
