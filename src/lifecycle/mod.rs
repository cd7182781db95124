//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → resolve wait_for_termination()
//!
//! Shutdown (shutdown.rs):
//!     trigger() → proxy listener drains → admin listener drains
//!               → health supervisor leaves its loop
//! ```
//!
//! # Design Decisions
//! - One broadcast channel reaches every long-running task
//! - Startup order lives in main: config, logging, metrics, then listeners

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_termination;
