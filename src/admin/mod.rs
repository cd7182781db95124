//! Admin surface: balancer metrics, health and status over JSON.
//!
//! Served on its own listener so admin paths never shadow proxied ones.
//! Dashboards in the browser read these routes cross-origin, so the router
//! carries a CORS layer outside the key check; preflights never need a key.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::get,
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use self::auth::admin_auth_middleware;
use self::handlers::{get_health, get_metrics, get_status};
use crate::load_balancer::BackendRegistry;

#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<BackendRegistry>,
    pub api_key: Option<Arc<str>>,
    pub cors_origins: Arc<[String]>,
}

impl AdminState {
    pub fn new(registry: Arc<BackendRegistry>, api_key: Option<String>) -> Self {
        Self {
            registry,
            api_key: api_key.map(Arc::from),
            cors_origins: Arc::from(Vec::new()),
        }
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Arc::from(origins);
        self
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    let cors = cors_layer(&state.cors_origins);
    let router = Router::new()
        .route("/metrics", get(get_metrics))
        .route("/health", get(get_health))
        .route("/admin/status", get(get_status))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state);

    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// Build the CORS layer for `origins`; `None` when the list is empty.
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }

    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };

    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET])
            .allow_headers([header::AUTHORIZATION]),
    )
}
