//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server
//! - Track active connections (for Least Connections LB)
//! - Count total and failed requests
//! - Keep a rolling window of response times
//! - Track health state (Unknown/Healthy/Unhealthy)

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use url::Url;

use crate::config::BackendConfig;
use crate::health::state::HealthState;

/// Number of response time samples kept per backend.
pub const RESPONSE_TIME_WINDOW: usize = 100;

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    /// Host name or IP.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Weight for weighted round robin.
    pub weight: u32,
    /// Pre-calculated base URL.
    pub base_url: Url,

    active_connections: AtomicUsize,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    state: AtomicU8,
    recent_response_times: Mutex<VecDeque<Duration>>,
}

impl Backend {
    /// Create a new backend in the Unknown state.
    pub fn new(host: impl Into<String>, port: u16, weight: u32) -> Result<Self, url::ParseError> {
        let host = host.into();
        let base_url = Url::parse(&format!("http://{}:{}", host, port))?;
        Ok(Self {
            host,
            port,
            weight,
            base_url,
            active_connections: AtomicUsize::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            state: AtomicU8::new(HealthState::Unknown as u8),
            recent_response_times: Mutex::new(VecDeque::with_capacity(RESPONSE_TIME_WINDOW)),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, url::ParseError> {
        Self::new(config.host.clone(), config.port, config.weight)
    }

    /// `host:port`, as used in request URIs.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL without the trailing slash, e.g. `http://localhost:8001`.
    pub fn url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Get the current number of active connections.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    /// Start a dispatch: bumps active and total counters.
    ///
    /// The returned guard decrements the active count when dropped, whatever
    /// path the request takes.
    pub fn dispatch(self: &Arc<Self>) -> DispatchGuard {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        DispatchGuard {
            backend: self.clone(),
        }
    }

    fn release(&self) {
        // Saturating so a stray release can never wrap the counter.
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    fn record_latency(&self, latency: Duration) {
        let mut samples = self
            .recent_response_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if samples.len() == RESPONSE_TIME_WINDOW {
            samples.pop_front();
        }
        samples.push_back(latency);
    }

    /// Mean of the retained response times, zero when none were recorded.
    pub fn average_response_time(&self) -> Duration {
        let samples = self
            .recent_response_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if samples.is_empty() {
            return Duration::ZERO;
        }
        samples.iter().sum::<Duration>() / samples.len() as u32
    }

    pub fn response_time_samples(&self) -> usize {
        self.recent_response_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    // --- Health Logic ---

    pub fn health(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// Return true if backend may receive traffic (Healthy or Unknown).
    pub fn is_healthy(&self) -> bool {
        self.health().is_eligible()
    }

    /// Store the outcome of a probe, returning the previous state.
    pub fn apply_probe(&self, success: bool) -> HealthState {
        let next = HealthState::after_probe(success);
        HealthState::from(self.state.swap(next as u8, Ordering::Relaxed))
    }
}

/// A RAII guard for one in-flight request against a backend.
#[derive(Debug)]
pub struct DispatchGuard {
    backend: Arc<Backend>,
}

impl DispatchGuard {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// The request completed; keep its latency for the rolling average.
    pub fn succeed(self, latency: Duration) {
        self.backend.record_latency(latency);
    }

    /// The request could not be forwarded.
    pub fn fail(self) {
        self.backend.failed_requests.fetch_add(1, Ordering::Relaxed);
    }
}

impl Deref for DispatchGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        self.backend.release();
    }
}
