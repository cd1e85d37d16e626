use axum::{extract::State, Json};
use serde_json::{json, Value};
use tracing::warn;

use crate::routes::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let store_healthy = match state.store.health_check().await {
        Ok(healthy) => healthy,
        Err(e) => {
            warn!("存储健康检查失败: {}", e);
            false
        }
    };
    let cache = state.cache.stats().await;

    Json(json!({
        "status": if store_healthy { "ok" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "analysis-orchestrator",
        "version": env!("CARGO_PKG_VERSION"),
        "store": { "healthy": store_healthy },
        "cache": {
            "hit_rate": cache.hit_rate(),
            "stats": cache,
        }
    }))
}
