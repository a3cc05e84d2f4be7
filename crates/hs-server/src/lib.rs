//! hs-server: HTTP streaming service.
//!
//! Ties the homestream crates into a running server:
//!
//! - Axum router with the `/stream` API and `/health`
//! - Resource providers, including directory-backed libraries
//! - Streaming session runner with optional speed monitoring
//! - One-shot ffmpeg capability discovery gating the streaming routes
//! - Graceful shutdown via signal handling

pub mod client_caps;
pub mod context;
pub mod error;
pub mod providers;
pub mod router;
pub mod routes;
pub mod streaming;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hs_av::ToolRegistry;
use hs_core::config::Config;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;
use crate::providers::{LibraryProvider, ProviderRegistry};

/// How often idle client capability sessions are swept.
const CLIENT_SESSION_SWEEP: Duration = Duration::from_secs(5 * 60);

/// Providers for every configured library.
pub fn library_providers(config: &Config, tools: &Arc<ToolRegistry>) -> ProviderRegistry {
    let mut providers = ProviderRegistry::new();
    for lib in &config.libraries {
        tracing::info!(
            provider = %lib.name,
            kind = %lib.kind,
            path = %lib.path.display(),
            "Registered library"
        );
        providers.register(
            lib.name.clone(),
            Arc::new(LibraryProvider::new(&lib.path, lib.kind, Arc::clone(tools))),
        );
    }
    providers
}

/// Start the homestream server.
///
/// Returns when a shutdown signal is received. The streaming routes answer
/// 503 until capability discovery, which runs in the background, succeeds.
pub async fn start(config: Config) -> hs_core::Result<()> {
    run(config, CancellationToken::new()).await
}

/// Like [`start`], additionally stopping when `cancel` fires.
pub async fn run(config: Config, cancel: CancellationToken) -> hs_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    for info in tools.check_all().await {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}", info.name);
        }
    }

    let providers = library_providers(&config, &tools);
    let ctx = AppContext::new(config.clone(), Arc::clone(&tools), providers);
    ctx.registry.validate()?;

    let gate = ctx.gate.clone();
    let discovery_tools = Arc::clone(&tools);
    tokio::spawn(async move {
        gate.discover(&discovery_tools).await;
    });

    let cleanup = client_caps::start_cleanup_task(ctx.client_caps.clone(), CLIENT_SESSION_SWEEP);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| hs_core::Error::Config(format!("Invalid server address: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| hs_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;
    tracing::info!("Starting server on {addr}");

    let app = router::build_router(ctx.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .map_err(|e| hs_core::Error::Internal(format!("Server error: {e}")))?;

    cleanup.abort();
    drain_sessions(&ctx).await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Give sessions whose clients were cut off a chance to stop their process.
async fn drain_sessions(ctx: &AppContext) {
    let remaining = ctx.active.len();
    if remaining == 0 {
        return;
    }
    tracing::info!(remaining, "Waiting for transcodes to stop");

    let deadline = tokio::time::Instant::now() + ctx.session.terminate_grace + Duration::from_secs(1);
    while !ctx.active.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    if !ctx.active.is_empty() {
        tracing::warn!(remaining = ctx.active.len(), "Transcodes still running at shutdown");
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
