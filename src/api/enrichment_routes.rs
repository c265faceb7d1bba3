//! Enrichment trigger routes
//!
//! ## Endpoints
//!
//! - `GET /` - start an enrichment run in the background
//! - `GET /api/health` - liveness check

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::services::{AddressEnrichmentService, TriggerOutcome};

/// Application state for the trigger routes
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AddressEnrichmentService>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(start_enrichment))
        .route("/api/health", get(health_check))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// GET /
///
/// Returns as soon as the run is scheduled; results only reach the logs.
async fn start_enrichment(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<String>>) {
    match state.service.trigger() {
        TriggerOutcome::Started => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::ok("started".to_string())),
        ),
        TriggerOutcome::AlreadyRunning => (
            StatusCode::CONFLICT,
            Json(ApiResponse::err("already running")),
        ),
    }
}

async fn health_check() -> Json<ApiResponse<String>> {
    Json(ApiResponse::ok("OK".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::config::EnrichConfig;
    use crate::database::InMemoryDictionaryStore;

    fn router(dir: &std::path::Path) -> (Router, Arc<AddressEnrichmentService>) {
        let service = Arc::new(AddressEnrichmentService::new(
            EnrichConfig::new(dir, "missing.zip"),
            Arc::new(InMemoryDictionaryStore::new()),
        ));
        let app = create_router(AppState {
            service: service.clone(),
        });
        (app, service)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = router(dir.path());
        let (status, body) = get_json(app, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "OK");
    }

    #[tokio::test]
    async fn trigger_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = router(dir.path());
        let (status, body) = get_json(app, "/").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["data"], "started");
    }

    #[tokio::test]
    async fn trigger_conflicts_while_a_run_holds_the_guard() {
        let dir = tempfile::tempdir().unwrap();
        let (app, service) = router(dir.path());

        let _guard = service.begin_run().unwrap();
        let (status, body) = get_json(app, "/").await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "already running");
    }
}
