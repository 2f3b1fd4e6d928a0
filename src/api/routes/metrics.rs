//! Usage and cache metrics.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::api::server::AppState;

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "model": state.decoder.model(),
        "usage": state.metrics().snapshot(),
        "cache": state.decoder.cache().stats(),
        "in_flight": state.decoder.coordinator().len(),
    }))
}

#[cfg(test)]
mod tests {
    use crate::api::server::tests::{body_json, scripted_router};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_get_metrics_reports_usage_and_cache() {
        let (router, _, state) = scripted_router(vec![]);
        state.metrics().record_request();
        state.metrics().record_cache_hit();

        let response = router
            .oneshot(Request::get("/api/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["usage"]["requests"], 1);
        assert_eq!(body["usage"]["cache_hits"], 1);
        assert_eq!(body["cache"]["total_entries"], 0);
        assert_eq!(body["cache"]["max_entries"], 500);
        assert_eq!(body["in_flight"], 0);
        assert_eq!(body["model"], "gemini-test");
    }
}
