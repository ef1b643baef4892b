pub mod routes;

use crate::state::AnalysisServiceState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn router(state: AnalysisServiceState, max_upload_bytes: usize) -> Router {
    Router::new()
        // Health and metrics endpoints
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        // Inference endpoints
        .route("/v1/ai/test", post(routes::test_prompt))
        .route(
            "/v1/ai/frames",
            post(routes::analyze_frame).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route(
            "/v1/ai/videos",
            post(routes::analyze_video).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        // Catalog endpoints
        .route("/v1/cameras", get(routes::list_cameras).post(routes::create_camera))
        .route(
            "/v1/cameras/:id",
            get(routes::get_camera)
                .put(routes::update_camera)
                .delete(routes::delete_camera),
        )
        .route("/v1/analytics", get(routes::list_analytics))
        .route("/v1/analytics/:id", get(routes::get_analytic))
        .route("/v1/analytics/:id/cameras", put(routes::apply_analytic))
        .route("/v1/events", get(routes::list_events).post(routes::create_event))
        // Session endpoints
        .route("/v1/sessions", get(routes::list_sessions).post(routes::start_session))
        .route(
            "/v1/sessions/:id",
            get(routes::get_session).delete(routes::stop_session),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
