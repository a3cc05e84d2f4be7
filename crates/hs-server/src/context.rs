//! Application context shared by all route handlers via Axum state.

use std::sync::Arc;

use hs_av::{CapabilityGate, ToolRegistry};
use hs_core::config::Config;
use hs_transcode::Registry;

use crate::client_caps::CapabilityStore;
use crate::providers::ProviderRegistry;
use crate::streaming::{ActiveStreams, SessionConfig};

/// Everything a request handler needs.
///
/// Cheaply cloneable; the registry is a static table and everything else is
/// behind an `Arc`.
#[derive(Clone)]
pub struct AppContext {
    /// Immutable application configuration snapshot.
    pub config: Arc<Config>,
    /// External tool registry.
    pub tools: Arc<ToolRegistry>,
    /// Opens once ffmpeg's formats, encoders and filters are known.
    pub gate: CapabilityGate,
    pub registry: Registry,
    pub providers: Arc<ProviderRegistry>,
    /// Capability sets declared by clients, keyed by session cookie.
    pub client_caps: CapabilityStore,
    pub active: ActiveStreams,
    pub session: SessionConfig,
}

impl AppContext {
    /// Build a context with a closed gate and the built-in registry.
    pub fn new(config: Config, tools: Arc<ToolRegistry>, providers: ProviderRegistry) -> Self {
        let client_caps = CapabilityStore::new(config.streaming.client_session_ttl_secs);
        let session = SessionConfig::from_config(&config.streaming);
        Self {
            config: Arc::new(config),
            tools,
            gate: CapabilityGate::new(),
            registry: Registry::builtin(),
            providers: Arc::new(providers),
            client_caps,
            active: ActiveStreams::new(),
            session,
        }
    }

    /// Same context with `gate` in place of the closed one.
    pub fn with_gate(mut self, gate: CapabilityGate) -> Self {
        self.gate = gate;
        self
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("providers", &self.providers)
            .field("gate_ready", &self.gate.is_ready())
            .field("active_streams", &self.active.len())
            .finish_non_exhaustive()
    }
}
