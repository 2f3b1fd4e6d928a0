//! POST /api/decode.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::api::server::AppState;
use crate::error::DecoderError;
use crate::extraction::ExtractionResult;

/// Request body. The key is forwarded to Gemini and never stored.
#[derive(Deserialize)]
pub struct DecodeRequest {
    pub api_key: String,
    pub job_description: String,
}

/// A [`DecoderError`] rendered as `{"detail": ...}` with its mapped status.
#[derive(Debug)]
pub struct ApiError(pub DecoderError);

impl From<DecoderError> for ApiError {
    fn from(err: DecoderError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

pub async fn decode(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DecodeRequest>,
) -> Result<Json<ExtractionResult>, ApiError> {
    let result = state
        .decoder
        .decode(&request.api_key, &request.job_description)
        .await?;
    Ok(Json(result))
}
