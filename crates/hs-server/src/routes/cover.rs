//! `GET /cover/{provider}/{*path}`: artwork referenced by item descriptions.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use hs_core::Error;

use crate::context::AppContext;
use crate::error::AppError;

/// URL under which the description of an item exposes its cover.
pub fn cover_url(provider: &str, cover: &str) -> String {
    format!("/cover/{provider}/{cover}")
}

fn content_type(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// GET /cover/{provider}/{*path}
pub async fn get_cover(
    State(ctx): State<AppContext>,
    Path((provider_name, cover)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let provider = ctx
        .providers
        .get(&provider_name)
        .ok_or_else(|| Error::bad_request(format!("unknown provider '{provider_name}'")))?;

    let path = provider
        .cover(&cover)
        .await?
        .ok_or_else(|| Error::not_found("cover", &cover))?;
    let data = tokio::fs::read(&path).await.map_err(Error::from)?;

    Ok((StatusCode::OK, [(header::CONTENT_TYPE, content_type(&path))], data))
}
