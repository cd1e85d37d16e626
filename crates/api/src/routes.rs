use std::sync::Arc;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator_dispatcher::{BatchAggregator, JobSubmitter};
use orchestrator_domain::{EndpointClass, KeyValueStore, TaskRegistry};
use orchestrator_infrastructure::{CacheLayer, RateLimiter};

use crate::handlers::{
    analyses::{cancel_analysis, get_analysis, submit_analysis},
    batches::{create_batch, get_batch},
    cache::invalidate_cache,
    health::health_check,
    metrics::render_metrics,
    results::get_result,
};
use crate::middleware::{enforce_rate_limit, RateLimitGate};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub submitter: Arc<JobSubmitter>,
    pub aggregator: Arc<BatchAggregator>,
    pub registry: Arc<dyn TaskRegistry>,
    pub cache: Arc<CacheLayer>,
    pub rate_limiter: Arc<RateLimiter>,
    pub store: Arc<dyn KeyValueStore>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    fn gate(&self, class: EndpointClass) -> RateLimitGate {
        RateLimitGate {
            limiter: Arc::clone(&self.rate_limiter),
            class,
        }
    }
}

/// 创建API路由；`/api` 下的路由按端点类别分别限流
pub fn create_routes(state: AppState, metrics_path: &str) -> Router {
    let submission = Router::new()
        .route("/api/analyses", post(submit_analysis))
        .route("/api/analyses/{task_id}/cancel", post(cancel_analysis))
        .route("/api/batches", post(create_batch))
        .route_layer(from_fn_with_state(
            state.gate(EndpointClass::Submission),
            enforce_rate_limit,
        ));

    let status = Router::new()
        .route("/api/analyses/{task_id}", get(get_analysis))
        .route("/api/batches/{batch_id}", get(get_batch))
        .route("/api/results/{result_ref}", get(get_result))
        .route_layer(from_fn_with_state(
            state.gate(EndpointClass::Status),
            enforce_rate_limit,
        ));

    let admin = Router::new()
        .route("/api/cache/invalidate", post(invalidate_cache))
        .route_layer(from_fn_with_state(
            state.gate(EndpointClass::Admin),
            enforce_rate_limit,
        ));

    let mut router = Router::new()
        // 健康检查
        .route("/health", get(health_check))
        .merge(submission)
        .merge(status)
        .merge(admin);

    if state.metrics_handle.is_some() {
        router = router.route(metrics_path, get(render_metrics));
    }

    router.with_state(state)
}
