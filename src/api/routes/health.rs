//! Health endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::api::server::AppState;

/// GET /api/health: liveness, readiness, version and uptime.
///
/// `ready` turns true once the server has bound its listener and false again
/// during shutdown.
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "ready": state.metrics().is_ready(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.metrics().uptime().as_secs(),
    }))
}

#[cfg(test)]
mod tests {
    use crate::api::server::tests::{body_json, scripted_router};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_get_health_returns_ok() {
        let (router, _, _) = scripted_router(vec![]);
        let response = router
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert!(body["version"].is_string());
        assert!(body["uptime_secs"].is_number());
        assert_eq!(body["ready"], false, "router alone is not a bound server");
    }

    #[tokio::test]
    async fn test_get_health_reports_readiness() {
        let (router, _, state) = scripted_router(vec![]);
        state.metrics().set_ready(true);
        let response = router
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["ready"], true);
    }
}
