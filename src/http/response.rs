//! Proxy-generated responses.
//!
//! # Responsibilities
//! - Build the JSON bodies clients see when the proxy answers itself
//! - Keep status codes and messages in one place
//!
//! # Design Decisions
//! - Relayed backend responses are never rewritten; only proxy errors use this
//! - Bodies are small JSON objects with an `error` field

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub const BLOCKED_MESSAGE: &str = "Request blocked by security system";
pub const NO_BACKEND_MESSAGE: &str = "No healthy backend servers available";
pub const BAD_GATEWAY_MESSAGE: &str = "Bad Gateway";
pub const TOO_LARGE_MESSAGE: &str = "Payload Too Large";
pub const INVALID_BODY_MESSAGE: &str = "Could not read request body";

/// `{"error": message}` with the given status.
pub fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// 403 for a request the classifier flagged.
pub fn blocked(label: &str, confidence: f64) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "error": BLOCKED_MESSAGE,
            "reason": label,
            "confidence": confidence,
        })),
    )
        .into_response()
}
