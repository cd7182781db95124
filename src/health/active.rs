//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe backends, all of them concurrently
//! - Update backend health state based on results

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::health::state::HealthState;
use crate::load_balancer::{backend::Backend, BackendRegistry};
use crate::observability::metrics;

/// Why a probe failed.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("connection error: {0}")]
    Connect(#[from] hyper_util::client::legacy::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid probe request: {0}")]
    Build(#[from] axum::http::Error),
}

pub struct HealthSupervisor {
    backends: Arc<BackendRegistry>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthSupervisor {
    pub fn new(backends: Arc<BackendRegistry>, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            backends,
            config,
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health supervisor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health supervisor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every backend once; a slow backend does not delay the others.
    pub async fn check_all(&self) {
        let probes = self
            .backends
            .all_backends()
            .iter()
            .map(|backend| self.check_one(backend));
        join_all(probes).await;
    }

    async fn check_one(&self, backend: &Arc<Backend>) {
        let result = self.probe(backend).await;
        let previous = backend.apply_probe(result.is_ok());
        let current = backend.health();

        match &result {
            Err(e) if previous != HealthState::Unhealthy => {
                tracing::warn!(backend = %backend.url(), error = %e, "Backend marked unhealthy");
            }
            Err(e) => {
                tracing::debug!(backend = %backend.url(), error = %e, "Health check failed");
            }
            Ok(()) if previous != HealthState::Healthy => {
                tracing::info!(backend = %backend.url(), from = %previous, "Backend marked healthy");
            }
            Ok(()) => {}
        }

        metrics::record_backend_health(backend.url(), current == HealthState::Healthy);
    }

    /// Issue one bounded health probe.
    pub async fn probe(&self, backend: &Backend) -> Result<(), ProbeError> {
        let uri = format!("http://{}{}", backend.authority(), self.config.path);
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header("user-agent", "secure-balancer-health-check")
            .body(Body::empty())?;

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let response = match time::timeout(timeout, self.client.request(request)).await {
            Ok(response) => response?,
            Err(_) => return Err(ProbeError::Timeout(timeout)),
        };

        if response.status().as_u16() == self.config.expected_status {
            Ok(())
        } else {
            Err(ProbeError::Status(response.status()))
        }
    }
}
