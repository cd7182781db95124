//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, connect info)
//!     → request.rs (assign and propagate x-request-id)
//!     → engine (screen, select, forward)
//!     → response.rs (JSON bodies when the proxy answers itself)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{request_id, X_REQUEST_ID};
pub use server::{HttpServer, ServerError};
