use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use orchestrator_domain::{EndpointClass, RateLimitDecision};
use orchestrator_errors::OrchestratorError;
use orchestrator_infrastructure::RateLimiter;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{auth::OWNER_HEADER, error::ApiError};

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

pub async fn request_logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    info!("开始处理请求: {} {}", method, uri);

    let response = next.run(request).await;
    let duration = start.elapsed();

    info!(
        "完成请求处理: {} {} - 状态: {} - 耗时: {:?}",
        method,
        uri,
        response.status(),
        duration
    );

    response
}

pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING, RATE_LIMIT_RESET])
}

pub fn trace_layer(
) -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>>
{
    TraceLayer::new_for_http()
}

/// 某一类端点的限流闸门
#[derive(Clone)]
pub struct RateLimitGate {
    pub limiter: Arc<RateLimiter>,
    pub class: EndpointClass,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// 限流身份：调用方标识优先，其次是代理转发的客户端地址
fn caller_identity(headers: &HeaderMap) -> String {
    header_str(headers, OWNER_HEADER)
        .or_else(|| {
            header_str(headers, "x-forwarded-for")
                .and_then(|forwarded| forwarded.split(',').next())
                .map(str::trim)
        })
        .unwrap_or("anonymous")
        .to_string()
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit()));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining()));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(decision.reset_in_seconds()));
}

pub async fn enforce_rate_limit(
    State(gate): State<RateLimitGate>,
    request: Request,
    next: Next,
) -> Response {
    let identity = caller_identity(request.headers());

    let decision = match gate.limiter.check_and_increment(&identity, gate.class).await {
        Ok(decision) => decision,
        Err(e) => {
            warn!("限流检查失败，放行请求: {}", e);
            return next.run(request).await;
        }
    };

    let mut response = if decision.is_allowed() {
        next.run(request).await
    } else {
        info!(
            "请求被限流: identity={}, class={}, reset_in={}s",
            identity,
            gate.class,
            decision.reset_in_seconds()
        );
        ApiError::from(OrchestratorError::RateLimitExceeded {
            retry_after_seconds: decision.reset_in_seconds(),
        })
        .into_response()
    };

    apply_rate_limit_headers(response.headers_mut(), &decision);
    response
}
