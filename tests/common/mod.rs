//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::State,
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::stream::{self, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use secure_balancer::config::{BackendConfig, ProxyConfig};
use secure_balancer::lifecycle::Shutdown;
use secure_balancer::load_balancer::BackendRegistry;
use secure_balancer::observability::{MemoryLog, RequestLog};
use secure_balancer::security::{Classifier, RuleClassifier};
use secure_balancer::HttpServer;

#[derive(Clone)]
struct MockState {
    name: &'static str,
    health_status: Arc<AtomicU16>,
    health_delay_ms: Arc<AtomicU64>,
    delay_ms: Arc<AtomicU64>,
    hits: Arc<AtomicU64>,
}

/// An axum backend on an ephemeral port with controllable behaviour.
///
/// `GET /health` answers with the configured status. `GET /stall` sends its
/// headers and a first chunk, then never finishes the body. Every other
/// request sleeps for the configured delay and echoes itself back as JSON.
pub struct MockBackend {
    pub addr: SocketAddr,
    state: MockState,
}

impl MockBackend {
    pub async fn start(name: &'static str) -> Self {
        let state = MockState {
            name,
            health_status: Arc::new(AtomicU16::new(200)),
            health_delay_ms: Arc::new(AtomicU64::new(0)),
            delay_ms: Arc::new(AtomicU64::new(0)),
            hits: Arc::new(AtomicU64::new(0)),
        };

        let app = Router::new()
            .route("/health", get(health))
            .route("/stall", get(stall))
            .fallback(echo)
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    pub fn set_health(&self, status: u16) {
        self.state.health_status.store(status, Ordering::SeqCst);
    }

    pub fn set_health_delay(&self, delay: Duration) {
        self.state
            .health_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Non-health requests served so far.
    pub fn hits(&self) -> u64 {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn config(&self, weight: u32) -> BackendConfig {
        BackendConfig::new(self.addr.ip().to_string(), self.addr.port(), weight)
    }
}

async fn health(State(state): State<MockState>) -> impl IntoResponse {
    let delay = state.health_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let status = StatusCode::from_u16(state.health_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "status": "ok", "server": state.name })))
}

async fn stall(State(state): State<MockState>) -> Body {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let first = stream::once(async { Ok::<_, std::io::Error>(Bytes::from_static(b"start")) });
    Body::from_stream(first.chain(stream::pending()))
}

async fn echo(State(state): State<MockState>, request: Request<Body>) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let delay = state.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let (parts, body) = request.into_parts();
    let body = to_bytes(body, usize::MAX).await.unwrap_or_default();
    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    Json(json!({
        "server": state.name,
        "method": parts.method.as_str(),
        "path": parts.uri.path(),
        "query": parts.uri.query(),
        "host": header("host"),
        "request_id": header("x-request-id"),
        "custom": header("x-custom"),
        "body": String::from_utf8_lossy(&body),
    }))
}

/// Config pointing at `backends`, with background machinery switched off.
pub fn test_config(backends: &[(&MockBackend, u32)]) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.backends = backends.iter().map(|(b, w)| b.config(*w)).collect();
    config.health_check.enabled = false;
    config.admin.enabled = false;
    config.observability.metrics_enabled = false;
    config.timeouts.forward_secs = 2;
    config
}

/// A balancer running in the background.
pub struct RunningBalancer {
    pub addr: SocketAddr,
    pub admin_addr: Option<SocketAddr>,
    pub registry: Arc<BackendRegistry>,
    pub log: Arc<MemoryLog>,
    shutdown: Shutdown,
    handle: JoinHandle<()>,
}

impl RunningBalancer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn admin_url(&self, path: &str) -> String {
        let addr = self.admin_addr.expect("admin listener not started");
        format!("http://{}{}", addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("balancer did not stop")
            .unwrap();
    }
}

pub async fn start_balancer(config: ProxyConfig) -> RunningBalancer {
    start_balancer_with(config, Arc::new(RuleClassifier::new(0.7))).await
}

pub async fn start_balancer_with(
    config: ProxyConfig,
    classifier: Arc<dyn Classifier>,
) -> RunningBalancer {
    let log = Arc::new(MemoryLog::new());
    let sink: Arc<dyn RequestLog> = log.clone();
    let admin_enabled = config.admin.enabled;
    let server = HttpServer::with_parts(config, classifier, sink).unwrap();
    let registry = server.registry().clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let admin_listener = if admin_enabled {
        Some(TcpListener::bind("127.0.0.1:0").await.unwrap())
    } else {
        None
    };
    let admin_addr = admin_listener.as_ref().map(|l| l.local_addr().unwrap());

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.clone();
    let handle = tokio::spawn(async move {
        server
            .run_with(listener, admin_listener, server_shutdown)
            .await
            .unwrap();
    });

    RunningBalancer {
        addr,
        admin_addr,
        registry,
        log,
        shutdown,
        handle,
    }
}

/// Client without pooling so every request opens its own connection.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
