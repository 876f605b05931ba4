use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};

use super::super::AppState;
use super::error_response;

pub async fn dataset_count_endpoint(State(state): State<AppState>) -> Response {
    match state.service.dataset() {
        Ok(dataset) => Json(serde_json::json!({
            "success": true,
            "count": dataset.count(),
        }))
        .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}
