use axum::extract::State;
use axum::Json;

use crate::context::AppContext;
use crate::streaming::ActiveStreamInfo;

/// GET /stream/sessions
///
/// Live transcodes, oldest first.
pub async fn list_sessions(State(ctx): State<AppContext>) -> Json<Vec<ActiveStreamInfo>> {
    Json(ctx.active.list())
}
