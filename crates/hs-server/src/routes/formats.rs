//! Client format negotiation endpoints.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hs_transcode::{ClientCapabilities, FormatsMatrix};

use crate::client_caps::{new_session_id, session_cookie, session_id};
use crate::context::AppContext;

/// GET /stream/formats
///
/// Every container and codec combination the server can produce. Once
/// ffmpeg has been probed, combinations it cannot mux or encode are left out.
pub async fn get_formats(State(ctx): State<AppContext>) -> Json<FormatsMatrix> {
    Json(ctx.registry.matrix(ctx.gate.get()))
}

/// POST /stream/formats
///
/// Store what the calling client can play. Issues the session cookie on the
/// first call.
pub async fn post_formats(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(caps): Json<ClientCapabilities>,
) -> Response {
    match session_id(&headers) {
        Some(id) => {
            ctx.client_caps.set(&id, caps);
            StatusCode::NO_CONTENT.into_response()
        }
        None => {
            let id = new_session_id();
            ctx.client_caps.set(&id, caps);
            let cookie = session_cookie(&id, ctx.config.streaming.client_session_ttl_secs);
            (StatusCode::NO_CONTENT, [(header::SET_COOKIE, cookie)]).into_response()
        }
    }
}
