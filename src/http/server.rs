//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the backend registry, screening stack and request log from config
//! - Create the Axum router that hands every request to the proxy engine
//! - Wire up middleware (tracing, request ID)
//! - Start the health supervisor and the admin listener next to the proxy
//! - Drain everything on shutdown, including records still queued for the
//!   request log file

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::ProxyConfig;
use crate::engine::ProxyEngine;
use crate::health::HealthSupervisor;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::lifecycle::Shutdown;
use crate::load_balancer::BackendRegistry;
use crate::observability::{JsonLinesLog, RequestLog, TracingLog};
use crate::security::{Classifier, RuleClassifier};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid backend address: {0}")]
    InvalidBackend(#[from] url::ParseError),

    #[error("cannot open request log: {0}")]
    RequestLog(#[source] io::Error),

    #[error("cannot bind admin listener: {0}")]
    AdminBind(#[source] io::Error),

    #[error("listener error: {0}")]
    Listener(#[source] io::Error),
}

/// How long shutdown waits for queued request records to reach disk.
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP server for the balancer.
pub struct HttpServer {
    config: ProxyConfig,
    registry: Arc<BackendRegistry>,
    engine: Arc<ProxyEngine>,
    log_writer: Option<JoinHandle<()>>,
}

impl HttpServer {
    /// Build the server with the built-in classifier and the configured log.
    pub async fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let classifier: Arc<dyn Classifier> =
            Arc::new(RuleClassifier::new(config.security.confidence_threshold));

        let mut log_writer = None;
        let log: Arc<dyn RequestLog> = match &config.request_log.path {
            Some(path) => {
                let (log, writer) = JsonLinesLog::open(path)
                    .await
                    .map_err(ServerError::RequestLog)?;
                tracing::info!(path = %path, "Writing request log");
                log_writer = Some(writer);
                Arc::new(log)
            }
            None => Arc::new(TracingLog),
        };

        let mut server = Self::with_parts(config, classifier, log)?;
        server.log_writer = log_writer;
        Ok(server)
    }

    /// Build the server around a caller-supplied classifier and log.
    pub fn with_parts(
        config: ProxyConfig,
        classifier: Arc<dyn Classifier>,
        log: Arc<dyn RequestLog>,
    ) -> Result<Self, ServerError> {
        let registry = Arc::new(BackendRegistry::from_config(
            &config.backends,
            config.load_balancer.algorithm,
        )?);
        let engine = Arc::new(ProxyEngine::from_config(
            &config,
            registry.clone(),
            classifier,
            log,
        ));

        Ok(Self {
            config,
            registry,
            engine,
            log_writer: None,
        })
    }

    /// The proxy router with all middleware layers.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(self.engine.clone())
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Run the server until `shutdown` fires, binding the admin listener
    /// from configuration when it is enabled.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), ServerError> {
        let admin_listener = if self.config.admin.enabled {
            let admin = TcpListener::bind(&self.config.admin.bind_address)
                .await
                .map_err(ServerError::AdminBind)?;
            Some(admin)
        } else {
            None
        };
        self.run_with(listener, admin_listener, shutdown).await
    }

    /// Run the server on pre-bound listeners until `shutdown` fires.
    pub async fn run_with(
        self,
        listener: TcpListener,
        admin_listener: Option<TcpListener>,
        shutdown: Shutdown,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr().map_err(ServerError::Listener)?;
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let HttpServer {
            config,
            registry,
            engine,
            log_writer,
        } = self;

        tracing::info!(
            address = %addr,
            algorithm = %registry.algorithm(),
            backends = registry.all_backends().len(),
            screening = config.security.screening_enabled,
            "HTTP server starting"
        );

        let supervisor = HealthSupervisor::new(registry.clone(), config.health_check.clone());
        let health_task = tokio::spawn(supervisor.run(shutdown.subscribe()));

        let admin_task = admin_listener.map(|admin| {
            let state = AdminState::new(registry.clone(), config.admin.api_key.clone())
                .with_cors_origins(config.admin.cors_origins.clone());
            tokio::spawn(serve_admin(admin, state, shutdown.clone()))
        });

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.signalled())
            .await
        {
            tracing::error!(error = %e, "HTTP server error");
        }

        // The listener may have stopped on its own; make sure the rest follows.
        shutdown.trigger();
        if let Some(task) = admin_task {
            let _ = task.await;
        }
        let _ = health_task.await;

        // The engine holds the last sender; once it is gone the writer drains
        // the queue and exits.
        drop(engine);
        if let Some(writer) = log_writer {
            match tokio::time::timeout(LOG_DRAIN_TIMEOUT, writer).await {
                Ok(Ok(())) => tracing::debug!("Request log drained"),
                Ok(Err(e)) => tracing::error!(error = %e, "Request log writer failed"),
                Err(_) => tracing::warn!(
                    timeout = ?LOG_DRAIN_TIMEOUT,
                    "Request log still busy at shutdown, some records may be lost"
                ),
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<ProxyEngine> {
        &self.engine
    }
}

async fn serve_admin(listener: TcpListener, state: AdminState, shutdown: Shutdown) {
    match listener.local_addr() {
        Ok(addr) => tracing::info!(address = %addr, "Admin server starting"),
        Err(e) => tracing::warn!(error = %e, "Admin server starting on unknown address"),
    }

    if let Err(e) = axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(shutdown.signalled())
        .await
    {
        tracing::error!(error = %e, "Admin server error");
    }
}

/// Main proxy handler: everything goes through the engine.
async fn proxy_handler(
    State(engine): State<Arc<ProxyEngine>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    engine.handle(addr.ip(), request).await
}
