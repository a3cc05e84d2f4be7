//! External tool detection.
//!
//! The [`ToolRegistry`] finds and caches the locations of ffmpeg and ffprobe
//! and hands out [`ToolCommand`](crate::ToolCommand)s preconfigured with the
//! configured probe timeout.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ToolCommand;

/// Known tool names that the registry manages.
const KNOWN_TOOLS: &[&str] = &["ffmpeg", "ffprobe"];

/// Configuration for a single external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Human-readable tool name (e.g. "ffmpeg").
    pub name: String,
    /// Resolved path to the executable.
    pub path: PathBuf,
}

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of `-version` output, if available.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool configurations.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolConfig>,
    timeout: Duration,
}

impl ToolRegistry {
    /// Discover tools by searching `PATH` (or using overrides from config).
    ///
    /// A configured path is used when it exists; otherwise [`which::which`]
    /// locates the tool. Tools that are not found are omitted.
    pub fn discover(tools_config: &hs_core::config::ToolsConfig) -> Self {
        let mut tools = HashMap::new();

        for &name in KNOWN_TOOLS {
            let custom_path = match name {
                "ffmpeg" => tools_config.ffmpeg_path.as_deref(),
                "ffprobe" => tools_config.ffprobe_path.as_deref(),
                _ => None,
            };

            let resolved = match custom_path {
                Some(p) if p.exists() => Some(p.to_path_buf()),
                Some(p) => {
                    tracing::warn!(tool = name, path = %p.display(), "Configured tool path does not exist; searching PATH");
                    which::which(name).ok()
                }
                None => which::which(name).ok(),
            };

            if let Some(path) = resolved {
                tracing::debug!(tool = name, path = %path.display(), "Found tool");
                tools.insert(
                    name.to_string(),
                    ToolConfig {
                        name: name.to_string(),
                        path,
                    },
                );
            }
        }

        Self {
            tools,
            timeout: Duration::from_secs(tools_config.probe_timeout_secs.max(1)),
        }
    }

    /// Build a registry from explicit paths, bypassing discovery.
    pub fn with_paths(ffmpeg: Option<PathBuf>, ffprobe: Option<PathBuf>) -> Self {
        let mut tools = HashMap::new();
        for (name, path) in [("ffmpeg", ffmpeg), ("ffprobe", ffprobe)] {
            if let Some(path) = path {
                tools.insert(
                    name.to_string(),
                    ToolConfig {
                        name: name.to_string(),
                        path,
                    },
                );
            }
        }
        Self {
            tools,
            timeout: Duration::from_secs(hs_core::config::ToolsConfig::default().probe_timeout_secs),
        }
    }

    /// Return the [`ToolConfig`] for the given tool, or an
    /// [`hs_core::Error::Tool`] if it was not found during discovery.
    pub fn require(&self, name: &str) -> hs_core::Result<&ToolConfig> {
        self.tools.get(name).ok_or_else(|| {
            hs_core::Error::tool(name, format!("{name} not found; is it installed and in PATH?"))
        })
    }

    /// Path to ffmpeg, if discovered.
    pub fn ffmpeg(&self) -> hs_core::Result<&Path> {
        self.require("ffmpeg").map(|c| c.path.as_path())
    }

    /// Path to ffprobe, if discovered.
    pub fn ffprobe(&self) -> hs_core::Result<&Path> {
        self.require("ffprobe").map(|c| c.path.as_path())
    }

    /// A one-shot command for `name` carrying the configured timeout.
    pub fn command(&self, name: &str) -> hs_core::Result<ToolCommand> {
        let cfg = self.require(name)?;
        let mut cmd = ToolCommand::new(cfg.path.clone());
        cmd.timeout(self.timeout);
        Ok(cmd)
    }

    /// Check all known tools and return availability information.
    pub async fn check_all(&self) -> Vec<ToolInfo> {
        let mut infos = Vec::with_capacity(KNOWN_TOOLS.len());
        for &name in KNOWN_TOOLS {
            let info = match self.tools.get(name) {
                Some(cfg) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: self.detect_version(name).await,
                    path: Some(cfg.path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            };
            infos.push(info);
        }
        infos
    }

    /// Run `<tool> -version` and return the first line of stdout.
    async fn detect_version(&self, name: &str) -> Option<String> {
        let output = self.command(name).ok()?.arg("-version").execute().await.ok()?;
        output.stdout.lines().next().map(|s| s.to_string())
    }
}
