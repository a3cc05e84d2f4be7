//! `GET /stream/{provider}/{id}`: item description or a live transcode.
//!
//! Without a `client` parameter the handler only describes the item. With
//! one, everything that can fail (gate, lookup, negotiation, command
//! construction) is decided before ffmpeg is spawned, so errors never
//! arrive mid-body.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hs_core::{Error, MediaType, SourceDescriptor};
use hs_transcode::candidate::parse_candidates;
use hs_transcode::{build_command, negotiate, ClientCapabilities, NegotiationRequest, StreamSelection};
use serde::{Deserialize, Serialize};

use crate::client_caps::session_id;
use crate::context::AppContext;
use crate::error::AppError;
use crate::providers::ResourceProvider;
use crate::routes::cover::cover_url;
use crate::streaming::{session, StreamLabel};

/// Remaining play time of the response, in seconds.
pub const CONTENT_DURATION: &str = "x-content-duration";

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    /// `web` (declared via `POST /stream/formats`) or `cast`.
    pub client: Option<String>,
    /// `auto` or `kind:index,...`.
    pub streams: Option<String>,
    /// Start offset in seconds.
    pub seek: Option<f64>,
    /// Audio bitrate in kbps, or video height.
    pub quality: Option<u32>,
}

/// Item metadata returned when no client is given.
#[derive(Debug, Serialize)]
pub struct DescriptionResponse {
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub bitrate: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub length: Option<f64>,
    /// URL of the cover image, served by `/cover/{provider}/...`.
    pub cover: Option<String>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
}

impl DescriptionResponse {
    fn from_descriptor(provider: &str, desc: &SourceDescriptor) -> Self {
        Self {
            media_type: desc.media_type,
            bitrate: desc.bitrate,
            width: desc.width,
            height: desc.height,
            length: desc.length,
            cover: desc.cover.as_deref().map(|cover| cover_url(provider, cover)),
            title: desc.title.clone(),
            subtitle: desc.subtitle.clone(),
        }
    }
}

/// GET /stream/{provider}/{id}
pub async fn stream(
    State(ctx): State<AppContext>,
    Path((provider, id)): Path<(String, String)>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    match params.client.clone() {
        None => describe_only(&ctx, &provider, &id).await,
        Some(client) => start_stream(&ctx, provider, id, &client, params, &headers).await,
    }
}

async fn describe_only(ctx: &AppContext, provider_name: &str, id: &str) -> Result<Response, AppError> {
    let provider = lookup_provider(ctx, provider_name)?;
    let desc = describe(provider_name, provider.as_ref(), id).await?;
    Ok(Json(DescriptionResponse::from_descriptor(provider_name, &desc)).into_response())
}

async fn start_stream(
    ctx: &AppContext,
    provider_name: String,
    id: String,
    client: &str,
    params: StreamParams,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let caps = ctx.gate.require()?;
    let provider = lookup_provider(ctx, &provider_name)?;
    let client_caps = client_capabilities(ctx, client, headers)?;
    let source = describe(&provider_name, provider.as_ref(), &id).await?;

    if !source.has_primary_stream() {
        return Err(Error::Internal(format!(
            "provider '{provider_name}' described '{id}' as {} without a {} stream",
            source.media_type, source.media_type
        ))
        .into());
    }

    let selection: StreamSelection = params.streams.as_deref().unwrap_or("auto").parse()?;
    let seek = params.seek.unwrap_or(0.0);
    let candidates = parse_candidates(
        &ctx.registry,
        source.media_type,
        client_caps.for_media(source.media_type),
        Some(caps),
    );

    let choice = negotiate(
        &ctx.registry,
        &source,
        NegotiationRequest {
            selection,
            candidates,
            seek,
            quality: params.quality,
        },
    )?;
    let spec = build_command(&ctx.registry, &choice, &source, seek)?;
    let ffmpeg = ctx.tools.ffmpeg()?;

    let duration = source.length.map(|length| (length - seek).max(0.0));
    let label = StreamLabel {
        provider: provider_name,
        resource: id,
        mimetype: spec.mimetype,
        copy_audio: choice.copy_audio,
        copy_video: choice.copy_video,
        remux: choice.remux,
        seek,
    };
    let started = session::launch(ffmpeg, &spec, source.source, &ctx.session, &ctx.active, label)?;

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, spec.mimetype);
    if let Some(duration) = duration {
        response = response.header(CONTENT_DURATION, format_duration(duration));
    }
    response
        .body(Body::from_stream(started.body))
        .map_err(|e| Error::Internal(format!("failed to build stream response: {e}")).into())
}

fn lookup_provider(ctx: &AppContext, name: &str) -> Result<Arc<dyn ResourceProvider>, AppError> {
    ctx.providers
        .get(name)
        .ok_or_else(|| Error::bad_request(format!("unknown provider '{name}'")).into())
}

/// `cast` is a fixed set; `web` is whatever the session declared.
fn client_capabilities(
    ctx: &AppContext,
    client: &str,
    headers: &HeaderMap,
) -> Result<ClientCapabilities, AppError> {
    match client {
        "cast" => Ok(ClientCapabilities::cast()),
        "web" => session_id(headers)
            .and_then(|id| ctx.client_caps.get(&id))
            .ok_or_else(|| {
                Error::bad_request("unknown client capabilities; POST /stream/formats first").into()
            }),
        other => Err(Error::bad_request(format!("unknown client '{other}'")).into()),
    }
}

/// Ask the provider; failures and unknown ids both end as 404.
async fn describe(
    provider_name: &str,
    provider: &dyn ResourceProvider,
    id: &str,
) -> Result<SourceDescriptor, AppError> {
    match provider.describe(id).await {
        Ok(Some(desc)) => Ok(desc),
        Ok(None) => {
            tracing::debug!(provider = %provider_name, id = %id, "Resource not found");
            Err(Error::not_found("resource", id).into())
        }
        Err(e) => {
            tracing::warn!(provider = %provider_name, id = %id, error = %e, "Provider failed to describe resource");
            Err(Error::not_found("resource", id).into())
        }
    }
}

fn format_duration(secs: f64) -> String {
    let s = format!("{secs:.3}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}
