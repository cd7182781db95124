//! Upstream forwarding.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the chosen backend
//! - Copy method, headers (minus `host`) and the buffered body
//! - Bound the whole exchange, response body included, by the forward timeout
//!
//! # Design Decisions
//! - One pooled hyper client shared by all requests
//! - The response body is buffered under the same deadline, so a backend that
//!   stalls after its headers is a timeout, not a hung client
//! - No retries or failover; a failure is reported once to the caller

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, request::Parts, Request, Response};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::time;

use crate::engine::error::ForwardError;
use crate::load_balancer::backend::Backend;

#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send the request described by `parts` and `body` to `backend` and
    /// read the full response before the deadline.
    pub async fn forward(
        &self,
        backend: &Backend,
        parts: &Parts,
        body: Bytes,
    ) -> Result<Response<Bytes>, ForwardError> {
        let request = upstream_request(backend, parts, body)?;

        let exchange = async {
            let response = self.client.request(request).await?;
            let (parts, body) = response.into_parts();
            let body = axum::body::to_bytes(Body::new(body), usize::MAX)
                .await
                .map_err(ForwardError::Body)?;
            Ok::<_, ForwardError>(Response::from_parts(parts, body))
        };

        match time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ForwardError::Timeout(self.timeout)),
        }
    }
}

/// Build the backend-bound copy of a client request.
pub fn upstream_request(
    backend: &Backend,
    parts: &Parts,
    body: Bytes,
) -> Result<Request<Body>, ForwardError> {
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri = format!("http://{}{}", backend.authority(), path_and_query);

    let mut builder = Request::builder().method(parts.method.clone()).uri(uri);
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in parts.headers.iter() {
            if name != header::HOST {
                headers.append(name.clone(), value.clone());
            }
        }
    }

    Ok(builder.body(Body::from(body))?)
}
