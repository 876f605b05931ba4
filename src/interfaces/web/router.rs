use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::{delete, get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::AppState;
use super::handlers::{batch, dataset, health, process};

fn build_cors(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    layer.allow_origin(origins)
}

pub fn build_api_router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/api/health", get(health::health_endpoint))
        .route("/api/process", post(process::process_endpoint))
        .route("/api/process/start", post(process::process_start_endpoint))
        .route(
            "/api/process/status/{job_id}",
            get(process::job_status_endpoint),
        )
        .route("/api/process/jobs", get(process::list_jobs_endpoint))
        .route(
            "/api/process/jobs/{job_id}",
            delete(process::delete_job_endpoint),
        )
        .route("/api/process/batch", post(batch::batch_endpoint))
        .route("/api/process/batch/start", post(batch::batch_start_endpoint))
        .route("/api/dataset/count", get(dataset::dataset_count_endpoint))
        .route("/api/logs", get(super::sse_logs_endpoint))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors(cors_origins))
        .with_state(state)
}
