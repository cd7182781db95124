//! The per-request pipeline.
//!
//! # Responsibilities
//! - Buffer the body, extract features, screen, then block or dispatch
//! - Keep backend counters honest on every exit path
//! - Emit exactly one request record and one metrics sample per request,
//!   including requests the client abandons mid-flight
//!
//! # Data Flow
//! ```text
//! received ─▶ features extracted ─▶ classified ─┬─▶ blocked (403)
//!                                               └─▶ dispatching ─┬─▶ forwarded
//!                                                                └─▶ failed (502)
//! every branch ─▶ logged
//! client gone ─▶ logged as cancelled
//! ```

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, Request},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures_util::StreamExt;
use uuid::Uuid;

use crate::config::ProxyConfig;
use crate::engine::error::ProxyError;
use crate::engine::forward::Forwarder;
use crate::http::{request, response};
use crate::load_balancer::BackendRegistry;
use crate::observability::{metrics, Outcome, RequestLog, RequestRecord};
use crate::security::{
    Classifier, FeatureExtractor, FeatureVector, RequestView, Screener, Verdict,
};

/// Status recorded for requests whose client disconnected first.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Engine knobs taken from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub block_malicious: bool,
    pub max_body_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            block_malicious: true,
            max_body_size: 2 * 1024 * 1024,
        }
    }
}

/// What a finished request looked like, for the record and metrics.
struct Exit<'a> {
    status: u16,
    outcome: Outcome,
    verdict: &'a Verdict,
    features: &'a FeatureVector,
}

/// An in-flight request.
///
/// If it is dropped before [`InFlight::finish`] runs, the handler future was
/// cancelled and a `cancelled` record is written instead.
struct InFlight<'a> {
    engine: &'a ProxyEngine,
    request_id: String,
    client_ip: IpAddr,
    method: String,
    path: String,
    start: Instant,
    backend: Option<String>,
    finished: bool,
}

impl InFlight<'_> {
    fn finish(&mut self, exit: Exit<'_>) {
        self.finished = true;
        self.engine.record(self, exit);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::info!(
            request_id = %self.request_id,
            backend = self.backend.as_deref().unwrap_or("-"),
            "Client disconnected before the response was ready"
        );
        let verdict = Verdict::fail_open();
        let features = FeatureVector::default();
        self.engine.record(
            self,
            Exit {
                status: CLIENT_CLOSED_REQUEST,
                outcome: Outcome::Cancelled,
                verdict: &verdict,
                features: &features,
            },
        );
    }
}

pub struct ProxyEngine {
    registry: Arc<BackendRegistry>,
    extractor: FeatureExtractor,
    screener: Screener,
    forwarder: Forwarder,
    log: Arc<dyn RequestLog>,
    settings: EngineSettings,
}

impl ProxyEngine {
    pub fn new(
        registry: Arc<BackendRegistry>,
        extractor: FeatureExtractor,
        screener: Screener,
        forwarder: Forwarder,
        log: Arc<dyn RequestLog>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            extractor,
            screener,
            forwarder,
            log,
            settings,
        }
    }

    /// Wire an engine from configuration around a registry and classifier.
    pub fn from_config(
        config: &ProxyConfig,
        registry: Arc<BackendRegistry>,
        classifier: Arc<dyn Classifier>,
        log: Arc<dyn RequestLog>,
    ) -> Self {
        let security = &config.security;
        Self::new(
            registry,
            FeatureExtractor::new(Duration::from_secs(security.window_secs)),
            Screener::new(
                classifier,
                security.screening_enabled,
                Duration::from_millis(config.timeouts.classifier_ms),
            ),
            Forwarder::new(Duration::from_secs(config.timeouts.forward_secs)),
            log,
            EngineSettings {
                block_malicious: security.block_malicious,
                max_body_size: security.max_body_size,
            },
        )
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// Run one client request through the pipeline.
    pub async fn handle(&self, client_ip: IpAddr, request: Request<Body>) -> Response {
        let (parts, body) = request.into_parts();
        let mut inflight = InFlight {
            engine: self,
            request_id: request::request_id(&parts.headers),
            client_ip,
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            start: Instant::now(),
            backend: None,
            finished: false,
        };

        tracing::debug!(
            request_id = %inflight.request_id,
            method = %inflight.method,
            path = %inflight.path,
            client_ip = %client_ip,
            "Proxying request"
        );

        let body = match read_body(&parts.headers, body, self.settings.max_body_size).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(
                    request_id = %inflight.request_id,
                    limit = self.settings.max_body_size,
                    error = %err,
                    "Rejecting request body"
                );
                inflight.finish(Exit {
                    status: err.status().as_u16(),
                    outcome: err.outcome(),
                    verdict: &Verdict::fail_open(),
                    features: &FeatureVector::default(),
                });
                return err.into_response();
            }
        };

        let view = RequestView {
            method: &parts.method,
            path: parts.uri.path(),
            query: parts.uri.query(),
            headers: &parts.headers,
            body: &body,
            client_ip,
        };
        let mut features = self.extractor.extract(&view);
        let verdict = self.screener.screen(&features).await;
        let blocked = verdict.is_malicious && self.settings.block_malicious;

        if self.screener.is_enabled() {
            metrics::record_verdict(&verdict.predicted_label, blocked);
        }

        if blocked {
            tracing::warn!(
                request_id = %inflight.request_id,
                client_ip = %client_ip,
                label = %verdict.predicted_label,
                confidence = verdict.confidence,
                "Blocked malicious request"
            );
            inflight.finish(Exit {
                status: 403,
                outcome: Outcome::Blocked,
                verdict: &verdict,
                features: &features,
            });
            return response::blocked(&verdict.predicted_label, verdict.confidence);
        }
        if verdict.is_malicious {
            tracing::warn!(
                request_id = %inflight.request_id,
                client_ip = %client_ip,
                label = %verdict.predicted_label,
                "Malicious request allowed, blocking disabled"
            );
        }

        let guard = match self.registry.acquire() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!(request_id = %inflight.request_id, "No healthy backends");
                let err = ProxyError::from(e);
                inflight.finish(Exit {
                    status: err.status().as_u16(),
                    outcome: err.outcome(),
                    verdict: &verdict,
                    features: &features,
                });
                return err.into_response();
            }
        };
        inflight.backend = Some(guard.url().to_string());

        let sent = Instant::now();
        match self.forwarder.forward(&guard, &parts, body.clone()).await {
            Ok(upstream) => {
                guard.succeed(sent.elapsed());
                let (head, bytes) = upstream.into_parts();
                self.extractor.annotate_response(
                    &mut features,
                    &view,
                    head.status.as_u16(),
                    bytes.len() as u64,
                );
                inflight.finish(Exit {
                    status: head.status.as_u16(),
                    outcome: Outcome::Forwarded,
                    verdict: &verdict,
                    features: &features,
                });
                Response::from_parts(head, Body::from(bytes))
            }
            Err(e) => {
                guard.fail();
                tracing::error!(
                    request_id = %inflight.request_id,
                    backend = inflight.backend.as_deref().unwrap_or("-"),
                    error = %e,
                    "Upstream error"
                );
                let err = ProxyError::from(e);
                let status = err.status().as_u16();
                self.extractor
                    .annotate_response(&mut features, &view, status, 0);
                inflight.finish(Exit {
                    status,
                    outcome: err.outcome(),
                    verdict: &verdict,
                    features: &features,
                });
                err.into_response()
            }
        }
    }

    fn record(&self, inflight: &InFlight<'_>, exit: Exit<'_>) {
        let backend_label = inflight.backend.as_deref().unwrap_or("none");
        metrics::record_request(
            &inflight.method,
            exit.status,
            backend_label,
            exit.outcome.as_str(),
            inflight.start,
        );

        let record = RequestRecord {
            timestamp: Utc::now(),
            id: Uuid::new_v4(),
            request_id: inflight.request_id.clone(),
            client_ip: inflight.client_ip,
            method: inflight.method.clone(),
            path: inflight.path.clone(),
            backend: inflight.backend.clone(),
            status_code: exit.status,
            response_time: inflight.start.elapsed().as_secs_f64(),
            outcome: exit.outcome,
            is_malicious: exit.verdict.is_malicious,
            prediction: exit.verdict.predicted_label.clone(),
            confidence: exit.verdict.confidence,
            flag: exit.features.category("flag").to_string(),
            hot: exit.features.number("hot") as u8,
        };
        self.log.append(record);
    }
}

/// Buffer the client body, refusing anything over `limit` bytes.
///
/// Only an actual overrun is a 413; a body that fails mid-read is a 400.
async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Result<Bytes, ProxyError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(ProxyError::PayloadTooLarge { limit });
    }

    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ProxyError::InvalidBody)?;
        if buf.len() + chunk.len() > limit {
            return Err(ProxyError::PayloadTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::{backend::Backend, Algorithm};
    use crate::observability::MemoryLog;
    use crate::security::{ClassifierError, RuleClassifier};
    use axum::http::StatusCode;
    
    struct AlwaysMalicious;

    impl Classifier for AlwaysMalicious {
        fn classify(&self, _: &FeatureVector) -> Result<Verdict, ClassifierError> {
            Ok(Verdict {
                is_malicious: true,
                predicted_label: "dos".into(),
                confidence: 0.93,
                category_probabilities: Vec::new(),
            })
        }

        fn name(&self) -> &str {
            "always-malicious"
        }
    }

    fn registry() -> Arc<BackendRegistry> {
        let backends = (8001..=8003)
            .map(|port| Arc::new(Backend::new("127.0.0.1", port, 1).unwrap()))
            .collect();
        Arc::new(BackendRegistry::new(backends, Algorithm::RoundRobin))
    }

    fn engine(
        registry: Arc<BackendRegistry>,
        classifier: Arc<dyn Classifier>,
        settings: EngineSettings,
    ) -> (ProxyEngine, Arc<MemoryLog>) {
        let log = Arc::new(MemoryLog::new());
        let engine = ProxyEngine::new(
            registry,
            FeatureExtractor::new(Duration::from_secs(60)),
            Screener::new(classifier, true, Duration::from_millis(500)),
            Forwarder::new(Duration::from_secs(1)),
            log.clone(),
            settings,
        );
        (engine, log)
    }

    fn client() -> IpAddr {
        IpAddr::from([203, 0, 113, 9])
    }

    #[tokio::test]
    async fn test_blocked_request_touches_no_backend() {
        let registry = registry();
        let (engine, log) = engine(
            registry.clone(),
            Arc::new(AlwaysMalicious),
            EngineSettings::default(),
        );

        let request = Request::builder()
            .uri("/api/users")
            .header("x-request-id", "req-42")
            .body(Body::empty())
            .unwrap();
        let response = engine.handle(client(), request).await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        for backend in registry.all_backends() {
            assert_eq!(backend.total_requests(), 0);
            assert_eq!(backend.active_connections(), 0);
        }

        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, Outcome::Blocked);
        assert_eq!(records[0].request_id, "req-42");
        assert_eq!(records[0].backend, None);
        assert_eq!(records[0].prediction, "dos");
    }

    #[tokio::test]
    async fn test_no_healthy_backend_is_503() {
        let registry = registry();
        for backend in registry.all_backends() {
            backend.apply_probe(false);
        }
        let (engine, log) = engine(
            registry,
            Arc::new(RuleClassifier::new(0.7)),
            EngineSettings::default(),
        );

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = engine.handle(client(), request).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(log.records()[0].outcome, Outcome::NoBackend);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let registry = registry();
        let (engine, log) = engine(
            registry.clone(),
            Arc::new(RuleClassifier::new(0.7)),
            EngineSettings {
                block_malicious: true,
                max_body_size: 16,
            },
        );

        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .body(Body::from(vec![b'x'; 64]))
            .unwrap();
        let response = engine.handle(client(), request).await;

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(log.records()[0].outcome, Outcome::Rejected);
        assert_eq!(registry.total_requests(), 0);
    }

    #[tokio::test]
    async fn test_detection_only_mode_forwards() {
        let registry = registry();
        for backend in registry.all_backends() {
            backend.apply_probe(false);
        }
        let (engine, log) = engine(
            registry,
            Arc::new(AlwaysMalicious),
            EngineSettings {
                block_malicious: false,
                ..EngineSettings::default()
            },
        );

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = engine.handle(client(), request).await;

        // Not blocked, so it reaches selection and finds nothing healthy.
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let record = &log.records()[0];
        assert!(record.is_malicious);
        assert_eq!(record.outcome, Outcome::NoBackend);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_502() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let backend = Arc::new(Backend::new("127.0.0.1", port, 1).unwrap());
        let registry = Arc::new(BackendRegistry::new(
            vec![backend.clone()],
            Algorithm::LeastConnections,
        ));
        let (engine, log) = engine(
            registry,
            Arc::new(RuleClassifier::new(0.7)),
            EngineSettings::default(),
        );

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = engine.handle(client(), request).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(backend.failed_requests(), 1);
        assert_eq!(backend.total_requests(), 1);
        assert_eq!(backend.active_connections(), 0);
        let record = &log.records()[0];
        assert_eq!(record.outcome, Outcome::BadGateway);
        assert_eq!(record.flag, "RSTR");
    }

    #[tokio::test]
    async fn test_broken_body_is_400_not_413() {
        let registry = registry();
        let (engine, log) = engine(
            registry.clone(),
            Arc::new(RuleClassifier::new(0.7)),
            EngineSettings::default(),
        );

        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "client went away",
            )),
        ];
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .body(Body::from_stream(futures_util::stream::iter(chunks)))
            .unwrap();
        let response = engine.handle(client(), request).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let record = &log.records()[0];
        assert_eq!(record.outcome, Outcome::Rejected);
        assert_eq!(record.status_code, 400);
        assert_eq!(registry.total_requests(), 0);
    }

    #[tokio::test]
    async fn test_declared_oversize_rejected_before_reading() {
        let (engine, log) = engine(
            registry(),
            Arc::new(RuleClassifier::new(0.7)),
            EngineSettings {
                block_malicious: true,
                max_body_size: 16,
            },
        );

        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(header::CONTENT_LENGTH, "1048576")
            .body(Body::empty())
            .unwrap();
        let response = engine.handle(client(), request).await;

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(log.records()[0].outcome, Outcome::Rejected);
    }

    #[tokio::test]
    async fn test_dropped_request_is_logged_as_cancelled() {
        // Accepts connections into the backlog but never answers.
        let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = silent.local_addr().unwrap().port();

        let backend = Arc::new(Backend::new("127.0.0.1", port, 1).unwrap());
        let registry = Arc::new(BackendRegistry::new(
            vec![backend.clone()],
            Algorithm::LeastConnections,
        ));
        let (engine, log) = engine(
            registry,
            Arc::new(RuleClassifier::new(0.7)),
            EngineSettings::default(),
        );

        let request = Request::builder()
            .uri("/slow")
            .header("x-request-id", "req-gone")
            .body(Body::empty())
            .unwrap();
        let abandoned =
            tokio::time::timeout(Duration::from_millis(100), engine.handle(client(), request)).await;
        assert!(abandoned.is_err());

        assert_eq!(backend.active_connections(), 0);
        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, Outcome::Cancelled);
        assert_eq!(records[0].status_code, 499);
        assert_eq!(records[0].request_id, "req-gone");
        assert_eq!(records[0].backend.as_deref(), Some(backend.url()));
        drop(silent);
    }
}
