//! ffprobe-based media probing.
//!
//! Converts `ffprobe -print_format json -show_format -show_streams` output
//! into [`StreamInfo`] records plus the container-level facts a provider
//! needs to build a [`SourceDescriptor`].

use std::collections::HashMap;
use std::path::Path;

use hs_core::{Error, MediaSource, MediaType, Result, SourceDescriptor, StreamInfo, StreamKind};
use serde::{Deserialize, Serialize};

use crate::ToolRegistry;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: usize,
    codec_type: Option<String>,
    codec_name: Option<String>,
    profile: Option<String>,
    level: Option<i32>,
    width: Option<u32>,
    height: Option<u32>,
    bit_rate: Option<String>,
}

/// Facts extracted from one ffprobe run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProbeResult {
    pub streams: Vec<StreamInfo>,
    /// Duration in seconds.
    pub duration: Option<f64>,
    /// Container bitrate in kbps.
    pub bitrate: Option<u32>,
    /// Demuxer names, comma separated as ffprobe prints them.
    pub format_name: Option<String>,
    /// Format tags with lowercased keys.
    pub tags: HashMap<String, String>,
}

impl ProbeResult {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str).filter(|s| !s.is_empty())
    }

    /// Build a descriptor for `source` from the probed facts.
    ///
    /// Audio bitrate prefers the first audio stream's rate over the
    /// container's. Video size comes from the first video stream.
    pub fn into_descriptor(self, media_type: MediaType, source: MediaSource) -> SourceDescriptor {
        let mut desc = SourceDescriptor::new(media_type, source);

        let audio = self.streams.iter().find(|s| s.is(StreamKind::Audio));
        desc.bitrate = audio.and_then(|s| s.bitrate).or(self.bitrate);

        if let Some(video) = self.streams.iter().find(|s| s.is(StreamKind::Video)) {
            desc.width = video.width;
            desc.height = video.height;
        }

        desc.length = self.duration;
        desc.container = self.format_name.clone();
        desc.title = self.tag("title").map(str::to_string);
        desc.subtitle = match (self.tag("artist"), self.tag("album")) {
            (Some(artist), Some(album)) => Some(format!("{artist} - {album}")),
            (Some(one), None) | (None, Some(one)) => Some(one.to_string()),
            (None, None) => None,
        };
        desc.streams = self.streams;
        desc
    }
}

/// Probe a file with the discovered ffprobe.
pub async fn probe_file(tools: &ToolRegistry, path: &Path) -> Result<ProbeResult> {
    let output = tools
        .command("ffprobe")?
        .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path.to_string_lossy())
        .execute()
        .await?;
    parse_ffprobe_json(&output.stdout)
}

/// Parse ffprobe JSON output.
pub fn parse_ffprobe_json(json: &str) -> Result<ProbeResult> {
    let raw: FfprobeOutput =
        serde_json::from_str(json).map_err(|e| Error::Probe(format!("invalid ffprobe output: {e}")))?;

    let streams = raw
        .streams
        .into_iter()
        .map(|s| {
            let kind = match s.codec_type.as_deref() {
                Some("audio") => StreamKind::Audio,
                Some("video") => StreamKind::Video,
                Some("subtitle") => StreamKind::Subtitle,
                _ => StreamKind::Other,
            };
            StreamInfo {
                index: s.index,
                kind,
                codec: s.codec_name.unwrap_or_default(),
                profile: s.profile,
                // ffprobe reports -99 for "no level".
                level: s.level.filter(|l| *l >= 0),
                width: s.width,
                height: s.height,
                bitrate: s.bit_rate.as_deref().and_then(kbps),
            }
        })
        .collect();

    let (format_name, duration, bitrate, tags) = match raw.format {
        Some(f) => (
            f.format_name.filter(|n| !n.is_empty()),
            f.duration.and_then(|d| d.parse::<f64>().ok()),
            f.bit_rate.as_deref().and_then(kbps),
            f.tags
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        ),
        None => (None, None, None, HashMap::new()),
    };

    Ok(ProbeResult {
        streams,
        format_name,
        duration,
        bitrate,
        tags,
    })
}

fn kbps(bits: &str) -> Option<u32> {
    bits.parse::<u64>().ok().map(|b| (b / 1000) as u32)
}
