//! REST endpoints for onboarding status and the calorie plan.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use super::manager::OnboardingManager;

/// State handed to the onboarding handlers.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub manager: Arc<OnboardingManager>,
}

/// GET /api/onboarding/status
///
/// Current step, sync state and finalization state.
async fn get_status(State(state): State<OnboardingRouteState>) -> impl IntoResponse {
    Json(state.manager.status().await)
}

/// GET /api/onboarding/plan
///
/// The calorie preview, or 404 while the metrics it needs are incomplete.
async fn get_plan(State(state): State<OnboardingRouteState>) -> impl IntoResponse {
    match state.manager.preview().await {
        Some(preview) => Json(preview).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "onboarding.plan.errors.missing_metrics"})),
        )
            .into_response(),
    }
}

/// Router for the read-only onboarding endpoints.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/api/onboarding/status", get(get_status))
        .route("/api/onboarding/plan", get(get_plan))
        .with_state(state)
}
