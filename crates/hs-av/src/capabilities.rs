//! Discovery of what the installed ffmpeg can do.
//!
//! At startup the server asks ffmpeg for its muxers (`-formats`), encoders
//! (`-encoders`) and filters (`-filters`). Until that probe has succeeded the
//! streaming endpoint answers 503; see [`CapabilityGate`].

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock, OnceLock};

use regex::Regex;
use serde::Serialize;

use crate::ToolRegistry;

/// Muxers, encoders and filters reported by ffmpeg.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ToolCapabilities {
    pub muxers: BTreeSet<String>,
    pub audio_encoders: BTreeSet<String>,
    pub video_encoders: BTreeSet<String>,
    pub subtitle_encoders: BTreeSet<String>,
    pub filters: BTreeSet<String>,
}

impl ToolCapabilities {
    /// Run the three ffmpeg queries and parse their output.
    pub async fn discover(tools: &ToolRegistry) -> hs_core::Result<Self> {
        let formats = tools
            .command("ffmpeg")?
            .args(["-hide_banner", "-formats"])
            .execute()
            .await?;
        let encoders = tools
            .command("ffmpeg")?
            .args(["-hide_banner", "-encoders"])
            .execute()
            .await?;
        let filters = tools
            .command("ffmpeg")?
            .args(["-hide_banner", "-filters"])
            .execute()
            .await?;

        let mut caps = Self {
            muxers: parse_muxers(&formats.stdout),
            filters: parse_filters(&filters.stdout),
            ..Default::default()
        };
        for (kind, name) in parse_encoders(&encoders.stdout) {
            match kind {
                'V' => caps.video_encoders.insert(name),
                'A' => caps.audio_encoders.insert(name),
                _ => caps.subtitle_encoders.insert(name),
            };
        }

        if caps.muxers.is_empty() || caps.encoders_len() == 0 {
            return Err(hs_core::Error::tool(
                "ffmpeg",
                "capability listing contained no muxers or encoders",
            ));
        }
        Ok(caps)
    }

    pub fn has_muxer(&self, name: &str) -> bool {
        self.muxers.contains(name)
    }

    pub fn has_encoder(&self, name: &str) -> bool {
        self.audio_encoders.contains(name)
            || self.video_encoders.contains(name)
            || self.subtitle_encoders.contains(name)
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.contains(name)
    }

    pub fn encoders_len(&self) -> usize {
        self.audio_encoders.len() + self.video_encoders.len() + self.subtitle_encoders.len()
    }
}

static MUXER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ ([D ])([E ])[d ]?\s+(\S+)").expect("muxer line pattern"));
static ENCODER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ ([VAS])[F.][S.][X.][B.][D.] (\S+)").expect("encoder line pattern"));
static FILTER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ [T.][S.][C.] (\S+)\s+\S+->\S+").expect("filter line pattern"));

/// Lines after the first line starting with `marker` (trimmed).
fn after_marker<'a>(text: &'a str, marker: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    text.lines().skip_while(move |l| !l.trim_start().starts_with(marker)).skip(1)
}

/// `ffmpeg -formats`: ` DE  matroska,webm   Matroska / WebM`.
fn parse_muxers(text: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for line in after_marker(text, "--") {
        if let Some(caps) = MUXER_LINE.captures(line) {
            if &caps[2] == "E" {
                out.extend(caps[3].split(',').map(str::to_string));
            }
        }
    }
    out
}

/// `ffmpeg -encoders`: ` A....D aac   AAC (Advanced Audio Coding)`.
fn parse_encoders(text: &str) -> Vec<(char, String)> {
    after_marker(text, "------")
        .filter_map(|line| {
            let caps = ENCODER_LINE.captures(line)?;
            let kind = caps[1].chars().next()?;
            Some((kind, caps[2].to_string()))
        })
        .collect()
}

/// `ffmpeg -filters`: ` TSC scale   V->V   Scale the input video size...`.
fn parse_filters(text: &str) -> BTreeSet<String> {
    text.lines()
        .filter_map(|line| FILTER_LINE.captures(line).map(|c| c[1].to_string()))
        .collect()
}

/// One-shot flag guarding the streaming subsystem.
///
/// Holds `None` until discovery succeeds; once set it never changes.
#[derive(Debug, Clone, Default)]
pub struct CapabilityGate {
    inner: Arc<OnceLock<ToolCapabilities>>,
}

impl CapabilityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate that is already open, for tests and offline tooling.
    pub fn ready(caps: ToolCapabilities) -> Self {
        let gate = Self::new();
        gate.open(caps);
        gate
    }

    /// Record the discovered capabilities. Later calls are ignored.
    pub fn open(&self, caps: ToolCapabilities) {
        let _ = self.inner.set(caps);
    }

    pub fn get(&self) -> Option<&ToolCapabilities> {
        self.inner.get()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.get().is_some()
    }

    /// Capabilities, or [`hs_core::Error::Unavailable`] while closed.
    pub fn require(&self) -> hs_core::Result<&ToolCapabilities> {
        self.get().ok_or_else(|| {
            hs_core::Error::Unavailable("ffmpeg capabilities have not been discovered".into())
        })
    }

    /// Run discovery once and open the gate on success.
    ///
    /// A failure is logged here and leaves the gate closed for good.
    pub async fn discover(&self, tools: &ToolRegistry) -> bool {
        match ToolCapabilities::discover(tools).await {
            Ok(caps) => {
                tracing::info!(
                    muxers = caps.muxers.len(),
                    encoders = caps.encoders_len(),
                    filters = caps.filters.len(),
                    "ffmpeg capabilities discovered"
                );
                self.open(caps);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "ffmpeg capability discovery failed; streaming disabled");
                false
            }
        }
    }
}
