use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use orchestrator_api::{create_app, AppState};
use orchestrator_core::{ApiConfig, BatchConfig, CacheConfig, RateLimitConfig, RegistryConfig};
use orchestrator_dispatcher::{BatchAggregator, JobSubmitter};
use orchestrator_domain::{KeyValueStore, SummaryMetricsAggregator, TaskRegistry};
use orchestrator_infrastructure::{
    CacheLayer, InMemoryStore, RateLimiter, StoreBatchRepository, StoreTaskRegistry,
};
use orchestrator_testing_utils::MockJobQueue;
use serde_json::{json, Value};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    registry: Arc<dyn TaskRegistry>,
    cache: Arc<CacheLayer>,
    queue: MockJobQueue,
}

fn test_app(rate_limit: RateLimitConfig) -> TestApp {
    let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
    let registry: Arc<dyn TaskRegistry> = Arc::new(StoreTaskRegistry::new(
        Arc::clone(&store),
        RegistryConfig::default(),
    ));
    let queue = MockJobQueue::new();
    let cache = Arc::new(CacheLayer::new(Arc::clone(&store), CacheConfig::default()));
    let submitter = Arc::new(JobSubmitter::new(
        Arc::clone(&registry),
        Arc::new(queue.clone()),
        Arc::clone(&cache),
    ));
    let aggregator = Arc::new(BatchAggregator::new(
        Arc::clone(&submitter),
        Arc::clone(&registry),
        Arc::new(StoreBatchRepository::new(
            Arc::clone(&store),
            BatchConfig::default(),
        )),
        Arc::clone(&cache),
        Arc::new(SummaryMetricsAggregator),
        BatchConfig::default(),
    ));

    let state = AppState {
        submitter,
        aggregator,
        registry: Arc::clone(&registry),
        cache: Arc::clone(&cache),
        rate_limiter: Arc::new(RateLimiter::new(Arc::clone(&store), rate_limit)),
        store,
        metrics_handle: None,
    };

    TestApp {
        router: create_app(state, &ApiConfig::default(), "/metrics"),
        registry,
        cache,
        queue,
    }
}

fn generous_limits() -> RateLimitConfig {
    RateLimitConfig {
        window_seconds: 3600,
        submission_limit: 100,
        status_limit: 100,
        admin_limit: 100,
        ..RateLimitConfig::default()
    }
}

fn post_json(uri: &str, owner: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(owner) = owner {
        builder = builder.header("x-owner-id", owner);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

#[tokio::test]
async fn test_submit_returns_handle_and_rate_limit_headers() {
    let app = test_app(generous_limits());

    let (status, headers, body) = send(
        &app.router,
        post_json("/api/analyses", Some("u1"), json!({"target": "g1", "params": {"depth": 18}})),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["state"], "PENDING");
    assert_eq!(body["data"]["deduplicated"], false);
    assert_eq!(headers["x-ratelimit-limit"], "100");
    assert_eq!(headers["x-ratelimit-remaining"], "99");
    assert!(headers.contains_key("x-ratelimit-reset"));
    assert_eq!(app.queue.count(), 1);
}

#[tokio::test]
async fn test_duplicate_submission_is_deduplicated() {
    let app = test_app(generous_limits());
    let request = || post_json("/api/analyses", Some("u1"), json!({"target": "g1"}));

    let (_, _, first) = send(&app.router, request()).await;
    let (_, _, second) = send(&app.router, request()).await;

    assert_eq!(first["data"]["task_id"], second["data"]["task_id"]);
    assert_eq!(second["data"]["deduplicated"], true);
    assert_eq!(app.queue.count(), 1);
}

#[tokio::test]
async fn test_submission_over_limit_gets_429_with_retry_after() {
    let app = test_app(RateLimitConfig {
        window_seconds: 3600,
        submission_limit: 2,
        ..RateLimitConfig::default()
    });

    for target in ["g1", "g2"] {
        let (status, _, _) = send(
            &app.router,
            post_json("/api/analyses", Some("u1"), json!({"target": target})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    let (status, headers, body) = send(
        &app.router,
        post_json("/api/analyses", Some("u1"), json!({"target": "g3"})),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["status"], "error");
    assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
    assert_eq!(headers["x-ratelimit-remaining"], "0");
    let retry_after: u64 = headers[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
    assert!(retry_after > 0);
    assert_eq!(app.queue.count(), 2);

    // 其他调用方不受影响
    let (status, _, _) = send(
        &app.router,
        post_json("/api/analyses", Some("u2"), json!({"target": "g3"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_missing_owner_is_rejected() {
    let app = test_app(generous_limits());

    let (status, _, body) = send(
        &app.router,
        post_json("/api/analyses", None, json!({"target": "g1"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MISSING_OWNER");
    assert_eq!(app.queue.count(), 0);
}

#[tokio::test]
async fn test_malformed_body_is_validation_error() {
    let app = test_app(generous_limits());

    let (status, _, body) = send(
        &app.router,
        post_json("/api/analyses", Some("u1"), json!({"params": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, _, body) = send(
        &app.router,
        post_json("/api/analyses", Some("u1"), json!({"target": "g1", "params": [1, 2]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_unknown_task_reports_unknown() {
    let app = test_app(generous_limits());

    let (status, headers, body) = send(&app.router, get("/api/analyses/nope")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "UNKNOWN");
    assert_eq!(body["data"]["task_id"], "nope");
    assert!(headers.contains_key("x-ratelimit-limit"));
}

#[tokio::test]
async fn test_cancel_pending_task() {
    let app = test_app(generous_limits());
    let (_, _, submitted) = send(
        &app.router,
        post_json("/api/analyses", Some("u1"), json!({"target": "g1"})),
    )
    .await;
    let task_id = submitted["data"]["task_id"].as_str().unwrap().to_string();

    let (status, _, body) = send(
        &app.router,
        post_json(&format!("/api/analyses/{task_id}/cancel"), Some("u1"), json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "FAILURE");
    assert_eq!(body["data"]["error"]["code"], "CANCELLED");
}

#[tokio::test]
async fn test_result_lookup() {
    let app = test_app(generous_limits());

    let (status, _, body) = send(&app.router, get("/api/results/analysis:g1:missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "RESULT_NOT_FOUND");

    app.cache
        .put(
            "analysis:g1:abc",
            &json!({"best": "e4"}),
            Duration::from_secs(600),
            &["result".to_string()],
        )
        .await
        .unwrap();
    let (status, _, body) = send(&app.router, get("/api/results/analysis:g1:abc")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["artifact"]["best"], "e4");
}

#[tokio::test]
async fn test_result_lookup_serves_ageing_results_only_for_analysis_refs() {
    let app = test_app(generous_limits());
    app.cache
        .put("analysis:g2:old", &json!({"best": "d4"}), Duration::ZERO, &[])
        .await
        .unwrap();
    app.cache
        .put("view:batch:b1", &json!({"state": "SUCCESS"}), Duration::from_secs(600), &[])
        .await
        .unwrap();

    let (status, _, body) = send(&app.router, get("/api/results/analysis:g2:old")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["artifact"]["best"], "d4");

    let (status, _, body) = send(&app.router, get("/api/results/view:batch:b1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "RESULT_NOT_FOUND");
}

#[tokio::test]
async fn test_batch_create_and_poll() {
    let app = test_app(generous_limits());

    let (status, _, created) = send(
        &app.router,
        post_json(
            "/api/batches",
            Some("u1"),
            json!({"targets": ["g1", "g2"], "params": {"depth": 12}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(created["data"]["total"], 2);
    let batch_id = created["data"]["batch_id"].as_str().unwrap().to_string();

    let (status, _, body) = send(&app.router, get(&format!("/api/batches/{batch_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "PROGRESS");
    assert_eq!(body["data"]["children"].as_array().unwrap().len(), 2);

    let (status, _, body) = send(&app.router, get("/api/batches/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "BATCH_NOT_FOUND");
}

#[tokio::test]
async fn test_invalidate_by_tag() {
    let app = test_app(generous_limits());
    for (key, tag) in [("a", "owner:u1"), ("b", "owner:u1"), ("c", "owner:u2")] {
        app.cache
            .put(key, &json!(1), Duration::from_secs(600), &[tag.to_string()])
            .await
            .unwrap();
    }

    let (status, _, body) = send(
        &app.router,
        post_json(
            "/api/cache/invalidate",
            Some("admin"),
            json!({"kind": "tag", "value": "owner:u1"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["invalidated"], 2);
    assert!(app.cache.get::<Value>("a").await.unwrap().is_none());
    assert_eq!(app.cache.get::<Value>("c").await.unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn test_health_is_not_rate_limited() {
    let app = test_app(generous_limits());

    let (status, headers, body) = send(&app.router, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(!headers.contains_key("x-ratelimit-limit"));
    assert!(app.registry.list_live().await.unwrap().is_empty());
}
