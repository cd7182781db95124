//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request cleared by screening
//!     → pool.rs (snapshot of eligible backends, shared rotation cursor)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through backends, plain or weighted)
//!         - least_conn.rs (pick backend with fewest connections)
//!     → backend.rs (dispatch guard tracks the in-flight request)
//!     → Return guard or NoHealthyBackend
//! ```
//!
//! # Design Decisions
//! - Algorithms are pure functions over (healthy set, cursor)
//! - The pool owns all mutable state: counters, health, cursor
//! - Unhealthy backends excluded from selection
//! - No retry inside selection; callers map failure to 503

pub mod backend;
pub mod least_conn;
pub mod pool;
pub mod round_robin;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use self::backend::Backend;

pub use self::backend::DispatchGuard;
pub use self::pool::BackendRegistry;

/// Backend selection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    RoundRobin,
    #[default]
    LeastConnections,
    WeightedRoundRobin,
}

/// Result of a successful selection.
#[derive(Debug, Clone)]
pub struct Selection {
    pub backend: Arc<Backend>,
    pub next_cursor: usize,
}

/// Selection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    #[error("no healthy backend available")]
    NoHealthyBackend,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "round_robin",
            Algorithm::LeastConnections => "least_connections",
            Algorithm::WeightedRoundRobin => "weighted_round_robin",
        }
    }

    /// Whether selection consumes the rotation cursor.
    pub fn rotates(self) -> bool {
        !matches!(self, Algorithm::LeastConnections)
    }

    /// Pick one backend from `healthy` using `cursor` as rotation position.
    pub fn select(self, healthy: &[Arc<Backend>], cursor: usize) -> Result<Selection, SelectError> {
        match self {
            Algorithm::RoundRobin => round_robin::select(healthy, cursor),
            Algorithm::WeightedRoundRobin => round_robin::select_weighted(healthy, cursor),
            Algorithm::LeastConnections => least_conn::select(healthy, cursor),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown algorithm name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown load balancing algorithm: {0}")]
pub struct UnknownAlgorithm(pub String);

impl FromStr for Algorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round_robin" => Ok(Algorithm::RoundRobin),
            "least_connections" => Ok(Algorithm::LeastConnections),
            "weighted_round_robin" => Ok(Algorithm::WeightedRoundRobin),
            other => Err(UnknownAlgorithm(other.to_string())),
        }
    }
}
