//! Liveness, readiness and metrics sidecar

use axum::{Router, extract::State, http::StatusCode, routing::get};

use super::state::HealthState;

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<HealthState>) -> (StatusCode, &'static str) {
    if let Some(db) = &state.db
        && let Err(e) = db.health_check().await
    {
        tracing::error!("[HEALTH] database ping failed: {}", e);
        return (StatusCode::SERVICE_UNAVAILABLE, "not ready");
    }
    (StatusCode::OK, "ready")
}

async fn metrics(State(state): State<HealthState>) -> (StatusCode, String) {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics disabled".to_string()),
    }
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_path(path: &str) -> (StatusCode, String) {
        let response = health_router(HealthState::default())
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_healthz_and_readyz() {
        assert_eq!(get_path("/healthz").await, (StatusCode::OK, "ok".to_string()));
        assert_eq!(get_path("/readyz").await, (StatusCode::OK, "ready".to_string()));
    }

    #[tokio::test]
    async fn test_metrics_disabled() {
        let (status, _) = get_path("/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
