//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe every backend concurrently (bounded timeout)
//!     → Store result via state.rs
//!
//! State machine (state.rs):
//!     Unknown → Healthy ⇄ Unhealthy
//!     Level-triggered, latest probe wins
//! ```
//!
//! # Design Decisions
//! - Runs as its own task; shares only the backend registry with the proxy
//! - Probe failures are routine: they flip state, never propagate
//! - Health state is per-backend, not per-pool

pub mod active;
pub mod state;

pub use active::{HealthSupervisor, ProbeError};
pub use state::HealthState;
