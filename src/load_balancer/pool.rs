//! Backend registry.
//!
//! # Responsibilities
//! - Own the ordered set of backends and the rotation cursor
//! - Apply the configured algorithm to the healthy snapshot
//! - Hand out dispatch guards for connection tracking

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::BackendConfig;
use crate::load_balancer::{
    backend::{Backend, DispatchGuard},
    Algorithm, SelectError,
};

/// The set of backends the proxy balances over.
#[derive(Debug)]
pub struct BackendRegistry {
    backends: Vec<Arc<Backend>>,
    algorithm: Algorithm,
    cursor: AtomicUsize,
}

impl BackendRegistry {
    pub fn new(backends: Vec<Arc<Backend>>, algorithm: Algorithm) -> Self {
        Self {
            backends,
            algorithm,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Create the registry from configuration.
    pub fn from_config(
        configs: &[BackendConfig],
        algorithm: Algorithm,
    ) -> Result<Self, url::ParseError> {
        let backends = configs
            .iter()
            .map(|c| Backend::from_config(c).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        for b in &backends {
            tracing::info!(url = %b.url(), weight = b.weight, "Registered backend");
        }

        Ok(Self::new(backends, algorithm))
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Return a list of all backends (for health checking and metrics).
    pub fn all_backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    /// Snapshot of the backends currently eligible for traffic.
    pub fn healthy_set(&self) -> Vec<Arc<Backend>> {
        self.backends
            .iter()
            .filter(|b| b.is_healthy())
            .cloned()
            .collect()
    }

    /// Select a backend with the configured algorithm.
    pub fn select(&self) -> Result<Arc<Backend>, SelectError> {
        let healthy = self.healthy_set();
        if healthy.is_empty() {
            tracing::debug!(backend_count = self.backends.len(), "No healthy backends");
            for b in &self.backends {
                tracing::debug!(url = %b.url(), state = %b.health(), "Backend status");
            }
            return Err(SelectError::NoHealthyBackend);
        }

        // Claim a rotation slot atomically; concurrent callers never share one.
        let cursor = if self.algorithm.rotates() {
            self.cursor.fetch_add(1, Ordering::Relaxed)
        } else {
            self.cursor.load(Ordering::Relaxed)
        };

        self.algorithm
            .select(&healthy, cursor)
            .map(|selection| selection.backend)
    }

    /// Select a backend and start tracking a request against it.
    pub fn acquire(&self) -> Result<DispatchGuard, SelectError> {
        self.select().map(|backend| backend.dispatch())
    }

    pub fn total_requests(&self) -> u64 {
        self.backends.iter().map(|b| b.total_requests()).sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.backends.iter().map(|b| b.failed_requests()).sum()
    }
}
