//! Backend health state machine.
//!
//! # States
//! - Unknown: never probed; still receives traffic
//! - Healthy: last probe succeeded
//! - Unhealthy: last probe failed; excluded from load balancing
//!
//! # State Transitions
//! ```text
//! Unknown → Healthy | Unhealthy: first probe result
//! Healthy ⇄ Unhealthy:           each probe result
//! ```
//!
//! # Design Decisions
//! - Level-triggered: the latest probe alone decides the state
//! - No hysteresis; a single failed probe evicts a backend
//! - Stored as a u8 so the flag is a single atomic load/store

/// Health state of a single backend.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl HealthState {
    /// State after a probe, independent of the current state.
    pub fn after_probe(success: bool) -> Self {
        if success {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        }
    }

    /// Whether a backend in this state may be selected.
    pub fn is_eligible(self) -> bool {
        self != HealthState::Unhealthy
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
        }
    }
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
