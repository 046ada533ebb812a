use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{routes, state::AppState};

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// Middleware is applied in outer-to-inner order (outermost runs first on
/// request, last on response):
///
/// 1. `TraceLayer` — structured request/response logging via `tracing`.
/// 2. `CorsLayer` — permissive CORS for the tracking endpoints (the snippet
///    is embedded on third-party sites; browsers need CORS headers).
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/track", post(routes::track::track))
        .route("/api/track/step", post(routes::track::track_step))
        .route(
            "/api/websites",
            get(routes::websites::list_websites).post(routes::websites::create_website),
        )
        .route(
            "/api/websites/{website_id}",
            get(routes::websites::get_website)
                .put(routes::websites::update_website)
                .delete(routes::websites::delete_website),
        )
        .route(
            "/api/websites/{website_id}/funnels",
            get(routes::funnels::list_funnels).post(routes::funnels::create_funnel),
        )
        .route(
            "/api/websites/{website_id}/funnels/{funnel_id}",
            get(routes::funnels::get_funnel)
                .put(routes::funnels::update_funnel)
                .delete(routes::funnels::delete_funnel),
        )
        .route(
            "/api/websites/{website_id}/funnels/{funnel_id}/results",
            get(routes::funnels::get_funnel_results),
        )
        .route(
            "/api/websites/{website_id}/funnels/{funnel_id}/completions",
            delete(routes::funnels::reset_funnel_completions),
        )
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
