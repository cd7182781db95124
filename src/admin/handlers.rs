use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::load_balancer::backend::Backend;

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub algorithm: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthSummary {
    pub status: String,
    pub servers: usize,
    pub healthy_servers: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerMetrics {
    pub url: String,
    pub weight: u32,
    pub healthy: bool,
    pub state: String,
    pub active_connections: usize,
    pub total_requests: u64,
    pub failed_requests: u64,
    /// Mean of recent response times in seconds, 3 decimals.
    pub avg_response_time: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalancerMetrics {
    pub algorithm: String,
    pub total_requests: u64,
    pub total_failed: u64,
    pub servers: Vec<ServerMetrics>,
}

impl From<&Backend> for ServerMetrics {
    fn from(b: &Backend) -> Self {
        let avg = b.average_response_time().as_secs_f64();
        Self {
            url: b.url().to_string(),
            weight: b.weight,
            healthy: b.is_healthy(),
            state: b.health().as_str().to_string(),
            active_connections: b.active_connections(),
            total_requests: b.total_requests(),
            failed_requests: b.failed_requests(),
            avg_response_time: (avg * 1000.0).round() / 1000.0,
        }
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        algorithm: state.registry.algorithm().to_string(),
    })
}

pub async fn get_health(State(state): State<AdminState>) -> Json<HealthSummary> {
    let servers = state.registry.all_backends().len();
    let healthy_servers = state.registry.healthy_set().len();
    let status = if healthy_servers > 0 { "healthy" } else { "degraded" };

    Json(HealthSummary {
        status: status.to_string(),
        servers,
        healthy_servers,
    })
}

pub async fn get_metrics(State(state): State<AdminState>) -> Json<BalancerMetrics> {
    let registry = &state.registry;
    Json(BalancerMetrics {
        algorithm: registry.algorithm().to_string(),
        total_requests: registry.total_requests(),
        total_failed: registry.total_failed(),
        servers: registry
            .all_backends()
            .iter()
            .map(|b| ServerMetrics::from(b.as_ref()))
            .collect(),
    })
}
