use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::context::AppContext;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// False until ffmpeg capability discovery has succeeded.
    pub streaming: bool,
    pub providers: Vec<String>,
    pub active_streams: usize,
}

/// GET /health
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        streaming: ctx.gate.is_ready(),
        providers: ctx.providers.names().into_iter().map(String::from).collect(),
        active_streams: ctx.active.len(),
    })
}
