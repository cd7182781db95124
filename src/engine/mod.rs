//! Proxy engine: the request path from client to backend and back.
//!
//! # Data Flow
//! ```text
//! http/server.rs (axum handler)
//!     → pipeline.rs (buffer, extract, screen, select)
//!     → forward.rs (hyper client, bounded by the forward timeout)
//!     → error.rs (403/413/502/503 JSON when the proxy answers itself)
//! ```
//!
//! # Design Decisions
//! - No retries and no failover: one backend per request
//! - Counter bookkeeping rides on the dispatch guard, so cancellation is safe

pub mod error;
pub mod forward;
pub mod pipeline;

pub use error::{ForwardError, ProxyError};
pub use forward::Forwarder;
pub use pipeline::{EngineSettings, ProxyEngine};
