//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! The proxy engine additionally produces:
//!     → request_log.rs (one RequestRecord per request)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint
//!     → request log file, or the `request_log` tracing target
//! ```
//!
//! # Design Decisions
//! - Request ID flows from the request-id layer into every record
//! - Metrics are cheap (atomic increments) and no-ops without a recorder

pub mod logging;
pub mod metrics;
pub mod request_log;

pub use request_log::{JsonLinesLog, MemoryLog, Outcome, RequestLog, RequestRecord, TracingLog};
