//! Server configuration, read from a JSON file.
//!
//! [`Config`] groups the listener address, ffmpeg/ffprobe locations, the
//! session runner tuning and the list of media libraries.
//! Every section defaults sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::media::MediaType;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Everything the server reads at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tools: ToolsConfig,
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub libraries: Vec<LibraryConfig>,
}

impl Config {
    /// Parse a configuration document.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Config(format!("config parse error: {e}")))
    }

    /// Read `path`, or use defaults when there is no usable file there.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Problems worth logging that do not prevent startup.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.streaming.channel_capacity == 0 {
            warnings.push("streaming.channel_capacity is 0; 1 will be used".into());
        }

        if self.streaming.chunk_size < 4096 {
            warnings.push(format!(
                "streaming.chunk_size {} is very small; expect high per-chunk overhead",
                self.streaming.chunk_size
            ));
        }

        if self.streaming.monitor && self.streaming.max_buffered_bytes == 0 {
            warnings.push(
                "streaming.monitor is enabled but max_buffered_bytes is 0; \
                 every chunk will wait for the client"
                    .into(),
            );
        }

        for (i, lib) in self.libraries.iter().enumerate() {
            if lib.name.is_empty() {
                warnings.push(format!("libraries[{i}].name is empty"));
            }
            if lib.name == "formats" || lib.name == "sessions" {
                warnings.push(format!(
                    "libraries[{i}].name '{}' collides with a reserved /stream route",
                    lib.name
                ));
            }
            if !lib.path.exists() {
                warnings.push(format!(
                    "libraries[{i}].path {} does not exist",
                    lib.path.display()
                ));
            }
            if self.libraries[..i].iter().any(|other| other.name == lib.name) {
                warnings.push(format!("libraries[{i}].name '{}' is duplicated", lib.name));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

/// Where to find ffmpeg and ffprobe; `PATH` is searched otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    /// Upper bound for one-shot tool invocations (capability and media probes).
    pub probe_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            probe_timeout_secs: 30,
        }
    }
}

/// Live transcoding and output pipe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Number of chunks in flight between the process pump and the HTTP body.
    pub channel_capacity: usize,
    /// Read size for process stdout.
    pub chunk_size: usize,
    /// Route output through the speed/backpressure monitor.
    pub monitor: bool,
    /// Bytes the monitor may hold back before it waits for the client.
    pub max_buffered_bytes: usize,
    /// Sliding window used for throughput measurement.
    pub rate_window_ms: u64,
    /// Minimum delay between two rate-change notifications.
    pub report_interval_ms: u64,
    /// Time between SIGTERM and a hard kill when a session ends early.
    pub terminate_grace_ms: u64,
    /// Idle lifetime of a client capability session.
    pub client_session_ttl_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 16,
            chunk_size: 64 * 1024,
            monitor: false,
            max_buffered_bytes: 8 * 1024 * 1024,
            rate_window_ms: 5_000,
            report_interval_ms: 1_000,
            terminate_grace_ms: 2_000,
            client_session_ttl_secs: 24 * 60 * 60,
        }
    }
}

/// A directory of media files exposed as a resource provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Provider name used in `/stream/{provider}/{id}`.
    pub name: String,
    pub kind: MediaType,
    pub path: PathBuf,
}
