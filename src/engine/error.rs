//! Request-path errors and their HTTP mapping.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::http::response::{
    self, BAD_GATEWAY_MESSAGE, INVALID_BODY_MESSAGE, NO_BACKEND_MESSAGE, TOO_LARGE_MESSAGE,
};
use crate::load_balancer::SelectError;
use crate::observability::Outcome;

/// Why forwarding to the chosen backend failed.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("backend did not answer within {0:?}")]
    Timeout(Duration),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("could not build upstream request: {0}")]
    Build(#[from] axum::http::Error),

    #[error("reading upstream body failed: {0}")]
    Body(#[source] axum::Error),
}

/// Failures the proxy answers itself.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no healthy backend available")]
    NoHealthyBackend,

    #[error(transparent)]
    Forwarding(#[from] ForwardError),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("could not read request body: {0}")]
    InvalidBody(#[source] axum::Error),
}

impl From<SelectError> for ProxyError {
    fn from(err: SelectError) -> Self {
        match err {
            SelectError::NoHealthyBackend => ProxyError::NoHealthyBackend,
        }
    }
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoHealthyBackend => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Forwarding(_) => StatusCode::BAD_GATEWAY,
            ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::InvalidBody(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            ProxyError::NoHealthyBackend => Outcome::NoBackend,
            ProxyError::Forwarding(_) => Outcome::BadGateway,
            ProxyError::PayloadTooLarge { .. } | ProxyError::InvalidBody(_) => Outcome::Rejected,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let message = match &self {
            ProxyError::NoHealthyBackend => NO_BACKEND_MESSAGE,
            ProxyError::Forwarding(_) => BAD_GATEWAY_MESSAGE,
            ProxyError::PayloadTooLarge { .. } => TOO_LARGE_MESSAGE,
            ProxyError::InvalidBody(_) => INVALID_BODY_MESSAGE,
        };
        response::json_error(self.status(), message)
    }
}
