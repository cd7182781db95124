//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, defaults when absent)
//!     → loader.rs (environment overrides)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → handed to subsystems at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; backends are static for the process
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError, ConfigWarning, LoadedConfig};
pub use schema::{
    AdminConfig, BackendConfig, HealthCheckConfig, ListenerConfig, LoadBalancerConfig, LogFormat,
    ObservabilityConfig, ProxyConfig, RequestLogConfig, SecurityConfig, TimeoutConfig,
};
