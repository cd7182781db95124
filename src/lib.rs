//! Secure load-balancing reverse proxy library.

pub mod admin;
pub mod config;
pub mod engine;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod security;

pub use config::schema::ProxyConfig;
pub use engine::ProxyEngine;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
