//! Axum router construction.

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::routes;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health::health))
        .route(
            "/stream/formats",
            get(routes::formats::get_formats).post(routes::formats::post_formats),
        )
        .route("/stream/sessions", get(routes::sessions::list_sessions))
        .route("/stream/{provider}/{*id}", get(routes::stream::stream))
        .route("/cover/{provider}/{*path}", get(routes::cover::get_cover))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
}
