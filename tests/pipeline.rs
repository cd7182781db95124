//! End-to-end request pipeline tests: screening, selection, forwarding, logging.

use axum::http::StatusCode;
use serde_json::Value;

use secure_balancer::config::ProxyConfig;
use secure_balancer::load_balancer::Algorithm;
use secure_balancer::observability::{Outcome, RequestRecord};
use secure_balancer::HttpServer;

mod common;

use common::{client, start_balancer, test_config, MockBackend};

#[tokio::test]
async fn test_forwards_and_relays() {
    let backend = MockBackend::start("server1").await;
    let balancer = start_balancer(test_config(&[(&backend, 1)])).await;

    let res = client()
        .post(balancer.url("/api/orders?page=2"))
        .header("x-custom", "kept")
        .body("item=42")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["server"], "server1");
    assert_eq!(body["method"], "POST");
    assert_eq!(body["path"], "/api/orders");
    assert_eq!(body["query"], "page=2");
    assert_eq!(body["body"], "item=42");
    assert_eq!(body["custom"], "kept");
    // The client's Host is dropped; the backend sees its own authority.
    assert_eq!(body["host"], backend.addr.to_string());
    assert!(body["request_id"].is_string());

    let records = balancer.log.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.outcome, Outcome::Forwarded);
    assert_eq!(record.status_code, 200);
    assert_eq!(record.backend.as_deref(), Some(backend.url().as_str()));
    assert_eq!(record.path, "/api/orders");
    assert_eq!(record.flag, "SF");
    assert_eq!(record.request_id, body["request_id"].as_str().unwrap());

    let stats = &balancer.registry.all_backends()[0];
    assert_eq!(stats.total_requests(), 1);
    assert_eq!(stats.active_connections(), 0);
    assert_eq!(stats.response_time_samples(), 1);

    balancer.stop().await;
}

#[tokio::test]
async fn test_blocked_request_never_dispatched() {
    let backend = MockBackend::start("server1").await;
    let mut config = test_config(&[(&backend, 1)]);
    config.security.screening_enabled = true;
    let balancer = start_balancer(config).await;

    let res = client()
        .post(balancer.url("/api/users"))
        .body("' OR '1'='1")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Request blocked by security system");
    assert_eq!(body["reason"], "r2l");
    assert!(body["confidence"].as_f64().unwrap() >= 0.7);

    assert_eq!(backend.hits(), 0);
    assert_eq!(balancer.registry.total_requests(), 0);

    let record = &balancer.log.records()[0];
    assert_eq!(record.outcome, Outcome::Blocked);
    assert!(record.is_malicious);
    assert_eq!(record.hot, 1);
    assert_eq!(record.backend, None);

    balancer.stop().await;
}

#[tokio::test]
async fn test_benign_request_passes_screening() {
    let backend = MockBackend::start("server1").await;
    let mut config = test_config(&[(&backend, 1)]);
    config.security.screening_enabled = true;
    let balancer = start_balancer(config).await;

    let res = client()
        .get(balancer.url("/api/products"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let record = &balancer.log.records()[0];
    assert!(!record.is_malicious);
    assert_eq!(record.prediction, "normal");
    assert_eq!(record.confidence, 1.0);

    balancer.stop().await;
}

#[tokio::test]
async fn test_detection_only_mode_forwards_attacks() {
    let backend = MockBackend::start("server1").await;
    let mut config = test_config(&[(&backend, 1)]);
    config.security.screening_enabled = true;
    config.security.block_malicious = false;
    let balancer = start_balancer(config).await;

    let res = client()
        .get(balancer.url("/search?q=<script>alert(1)</script>"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(backend.hits(), 1);
    let record = &balancer.log.records()[0];
    assert!(record.is_malicious);
    assert_eq!(record.outcome, Outcome::Forwarded);

    balancer.stop().await;
}

#[tokio::test]
async fn test_no_healthy_backend_is_503() {
    let backend = MockBackend::start("server1").await;
    let balancer = start_balancer(test_config(&[(&backend, 1)])).await;
    balancer.registry.all_backends()[0].apply_probe(false);

    let res = client().get(balancer.url("/")).send().await.unwrap();

    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "No healthy backend servers available");
    assert_eq!(backend.hits(), 0);
    assert_eq!(balancer.log.records()[0].outcome, Outcome::NoBackend);

    balancer.stop().await;
}

#[tokio::test]
async fn test_oversized_body_is_413() {
    let backend = MockBackend::start("server1").await;
    let mut config = test_config(&[(&backend, 1)]);
    config.security.max_body_size = 1024;
    let balancer = start_balancer(config).await;

    let res = client()
        .post(balancer.url("/upload"))
        .body(vec![b'a'; 4096])
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(backend.hits(), 0);
    assert_eq!(balancer.log.records()[0].outcome, Outcome::Rejected);

    balancer.stop().await;
}

#[tokio::test]
async fn test_round_robin_visits_in_order() {
    let a = MockBackend::start("a").await;
    let b = MockBackend::start("b").await;
    let c = MockBackend::start("c").await;
    let mut config = test_config(&[(&a, 1), (&b, 1), (&c, 1)]);
    config.load_balancer.algorithm = Algorithm::RoundRobin;
    let balancer = start_balancer(config).await;

    let client = client();
    let mut seen = Vec::new();
    for _ in 0..6 {
        let body: Value = client
            .get(balancer.url("/"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        seen.push(body["server"].as_str().unwrap().to_string());
    }

    assert_eq!(seen, vec!["a", "b", "c", "a", "b", "c"]);
    balancer.stop().await;
}

#[tokio::test]
async fn test_weighted_round_robin_follows_weights() {
    let a = MockBackend::start("a").await;
    let b = MockBackend::start("b").await;
    let mut config = test_config(&[(&a, 2), (&b, 1)]);
    config.load_balancer.algorithm = Algorithm::WeightedRoundRobin;
    let balancer = start_balancer(config).await;

    let client = client();
    let mut seen = Vec::new();
    for _ in 0..6 {
        let body: Value = client
            .get(balancer.url("/"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        seen.push(body["server"].as_str().unwrap().to_string());
    }

    assert_eq!(seen, vec!["a", "a", "b", "a", "a", "b"]);
    assert_eq!((a.hits(), b.hits()), (4, 2));
    balancer.stop().await;
}

#[tokio::test]
async fn test_admin_metrics_reflect_traffic() {
    let a = MockBackend::start("a").await;
    let b = MockBackend::start("b").await;
    let mut config = test_config(&[(&a, 1), (&b, 3)]);
    config.admin.enabled = true;
    config.load_balancer.algorithm = Algorithm::RoundRobin;
    let balancer = start_balancer(config).await;

    let client = client();
    for _ in 0..4 {
        client.get(balancer.url("/")).send().await.unwrap();
    }

    let metrics: Value = client
        .get(balancer.admin_url("/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["algorithm"], "round_robin");
    assert_eq!(metrics["total_requests"], 4);
    assert_eq!(metrics["total_failed"], 0);
    assert_eq!(metrics["servers"][1]["weight"], 3);
    assert_eq!(metrics["servers"][0]["total_requests"], 2);
    assert_eq!(metrics["servers"][0]["active_connections"], 0);

    let health: Value = client
        .get(balancer.admin_url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["servers"], 2);

    // Admin paths are not served on the proxy listener; they are proxied.
    let proxied: Value = client
        .get(balancer.url("/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(proxied["path"], "/metrics");

    balancer.stop().await;
}

#[tokio::test]
async fn test_request_log_file_drained_on_shutdown() {
    let backend = MockBackend::start("server1").await;
    let path = std::env::temp_dir().join(format!("balancer-{}.jsonl", uuid::Uuid::new_v4()));
    let mut config: ProxyConfig = test_config(&[(&backend, 1)]);
    config.admin.enabled = false;
    config.request_log.path = Some(path.to_string_lossy().into_owned());

    let server = HttpServer::new(config).await.unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = secure_balancer::Shutdown::new();
    let server_shutdown = shutdown.clone();
    let handle = tokio::spawn(async move { server.run(listener, server_shutdown).await });

    let client = client();
    for i in 0..20 {
        let res = client
            .get(format!("http://{}/api/users/{}", addr, i))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    // No polling: once `run` returns every record must already be on disk.
    shutdown.trigger();
    handle.await.unwrap().unwrap();

    let contents = tokio::fs::read_to_string(&path).await.unwrap();
    let records: Vec<RequestRecord> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 20);
    assert!(records.iter().all(|r| r.outcome == Outcome::Forwarded));
    assert!(records.iter().any(|r| r.path == "/api/users/19"));

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_every_request_logged_once() {
    let backend = MockBackend::start("server1").await;
    let mut config = test_config(&[(&backend, 1)]);
    config.security.screening_enabled = true;
    let balancer = start_balancer(config).await;

    let client = client();
    client.get(balancer.url("/ok")).send().await.unwrap();
    client
        .get(balancer.url("/files?name=../../etc/passwd"))
        .send()
        .await
        .unwrap();
    balancer.registry.all_backends()[0].apply_probe(false);
    client.get(balancer.url("/ok")).send().await.unwrap();

    let outcomes: Vec<Outcome> = balancer.log.records().iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.contains(&Outcome::Forwarded));
    assert!(outcomes.contains(&Outcome::Blocked));
    assert!(outcomes.contains(&Outcome::NoBackend));

    balancer.stop().await;
}
