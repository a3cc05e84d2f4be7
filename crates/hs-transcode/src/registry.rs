//! Static table of output containers, encoders and copy-compatibility rules.
//!
//! Containers are keyed by the mimetype clients send in their capability
//! strings. Each container lists the encoders it accepts per slot together
//! with the [`CompatRule`] deciding whether a source stream can be copied
//! into it unchanged.

use std::collections::BTreeMap;

use hs_av::ToolCapabilities;
use hs_core::{Error, MediaType, Result, StreamInfo, StreamKind};
use serde::Serialize;

/// Decides whether a source stream already satisfies a target encoder.
#[derive(Clone, Copy)]
pub enum CompatRule {
    /// The stream's decoder-side codec name equals this name.
    MatchesCodecName(&'static str),
    /// Arbitrary check over the whole stream (profile, level...).
    Predicate(fn(&StreamInfo) -> bool),
}

impl CompatRule {
    pub fn matches(&self, stream: &StreamInfo) -> bool {
        match self {
            CompatRule::MatchesCodecName(name) => stream.codec == *name,
            CompatRule::Predicate(check) => check(stream),
        }
    }
}

impl std::fmt::Debug for CompatRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompatRule::MatchesCodecName(name) => f.debug_tuple("MatchesCodecName").field(name).finish(),
            CompatRule::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Which track of the output an encoder feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecSlot {
    Audio,
    Video,
}

impl CodecSlot {
    fn stream_kind(self) -> StreamKind {
        match self {
            CodecSlot::Audio => StreamKind::Audio,
            CodecSlot::Video => StreamKind::Video,
        }
    }
}

/// An output container.
#[derive(Debug)]
pub struct ContainerFormat {
    /// Wire mimetype, also the table key.
    pub mimetype: &'static str,
    pub media_type: MediaType,
    /// ffmpeg muxer name (`-f`).
    pub format: &'static str,
    /// Extra muxer options, placed after `-f`.
    pub muxer_options: &'static [&'static str],
    /// Demuxer names (as ffprobe reports them) of sources already in this
    /// container.
    pub compat: &'static [&'static str],
    pub audio: &'static [(&'static str, CompatRule)],
    pub video: &'static [(&'static str, CompatRule)],
}

impl ContainerFormat {
    pub fn codecs(&self, slot: CodecSlot) -> &'static [(&'static str, CompatRule)] {
        match slot {
            CodecSlot::Audio => self.audio,
            CodecSlot::Video => self.video,
        }
    }

    /// Whether a source probed as `format_name` is already in this
    /// container. ffprobe lists aliases comma separated (`matroska,webm`).
    pub fn matches_source(&self, format_name: &str) -> bool {
        format_name
            .split(',')
            .map(str::trim)
            .any(|name| self.compat.contains(&name))
    }

    pub fn rule(&self, slot: CodecSlot, codec: &str) -> Option<&CompatRule> {
        self.codecs(slot)
            .iter()
            .find(|(name, _)| *name == codec)
            .map(|(_, rule)| rule)
    }
}

/// An ffmpeg encoder.
#[derive(Debug)]
pub struct CodecDefinition {
    /// ffmpeg encoder name (`-c:a`/`-c:v`).
    pub name: &'static str,
    /// Short name advertised to clients.
    pub display: &'static str,
    pub slot: CodecSlot,
    /// Extra encoder options appended after the codec selection.
    pub options: &'static [&'static str],
}

const H264_LEVELS: &[i32] = &[30, 31, 32, 40, 41];

fn h264_compatible(stream: &StreamInfo) -> bool {
    stream.codec == "h264"
        && matches!(stream.profile.as_deref(), Some("High") | Some("Main"))
        && stream.level.is_some_and(|l| H264_LEVELS.contains(&l))
}

const MP3: (&str, CompatRule) = ("libmp3lame", CompatRule::MatchesCodecName("mp3"));
const VORBIS: (&str, CompatRule) = ("libvorbis", CompatRule::MatchesCodecName("vorbis"));
const OPUS: (&str, CompatRule) = ("libopus", CompatRule::MatchesCodecName("opus"));
const FLAC: (&str, CompatRule) = ("flac", CompatRule::MatchesCodecName("flac"));
const AAC: (&str, CompatRule) = ("aac", CompatRule::MatchesCodecName("aac"));
const H264: (&str, CompatRule) = ("libx264", CompatRule::Predicate(h264_compatible));
const VP8: (&str, CompatRule) = ("libvpx", CompatRule::MatchesCodecName("vp8"));
const VP9: (&str, CompatRule) = ("libvpx-vp9", CompatRule::MatchesCodecName("vp9"));
const THEORA: (&str, CompatRule) = ("libtheora", CompatRule::MatchesCodecName("theora"));

static CONTAINERS: &[ContainerFormat] = &[
    ContainerFormat {
        mimetype: "audio/mpeg",
        media_type: MediaType::Audio,
        format: "mp3",
        muxer_options: &[],
        compat: &["mp3"],
        audio: &[MP3],
        video: &[],
    },
    ContainerFormat {
        mimetype: "audio/ogg",
        media_type: MediaType::Audio,
        format: "ogg",
        muxer_options: &[],
        compat: &["ogg"],
        audio: &[VORBIS, OPUS, FLAC],
        video: &[],
    },
    ContainerFormat {
        mimetype: "audio/webm",
        media_type: MediaType::Audio,
        format: "webm",
        muxer_options: &[],
        compat: &["webm"],
        audio: &[VORBIS, OPUS],
        video: &[],
    },
    ContainerFormat {
        mimetype: "audio/flac",
        media_type: MediaType::Audio,
        format: "flac",
        muxer_options: &[],
        compat: &["flac"],
        audio: &[FLAC],
        video: &[],
    },
    ContainerFormat {
        mimetype: "audio/aac",
        media_type: MediaType::Audio,
        format: "adts",
        muxer_options: &[],
        compat: &["aac"],
        audio: &[AAC],
        video: &[],
    },
    ContainerFormat {
        mimetype: "video/webm",
        media_type: MediaType::Video,
        format: "webm",
        muxer_options: &[],
        compat: &["webm"],
        audio: &[VORBIS, OPUS],
        video: &[VP8, VP9],
    },
    ContainerFormat {
        mimetype: "video/mp4",
        media_type: MediaType::Video,
        format: "mp4",
        // The output pipe is not seekable; write a fragmented file.
        muxer_options: &["-movflags", "frag_keyframe+empty_moov"],
        compat: &["mp4", "mov"],
        audio: &[AAC, MP3],
        video: &[H264],
    },
    ContainerFormat {
        mimetype: "video/x-matroska",
        media_type: MediaType::Video,
        format: "matroska",
        muxer_options: &[],
        compat: &["matroska"],
        audio: &[AAC, MP3, VORBIS, OPUS, FLAC],
        video: &[H264, VP8, VP9],
    },
    ContainerFormat {
        mimetype: "video/ogg",
        media_type: MediaType::Video,
        format: "ogg",
        muxer_options: &[],
        compat: &["ogg"],
        audio: &[VORBIS],
        video: &[THEORA],
    },
];

static CODECS: &[CodecDefinition] = &[
    CodecDefinition {
        name: "libmp3lame",
        display: "mp3",
        slot: CodecSlot::Audio,
        options: &[],
    },
    CodecDefinition {
        name: "libvorbis",
        display: "vorbis",
        slot: CodecSlot::Audio,
        options: &[],
    },
    CodecDefinition {
        name: "libopus",
        display: "opus",
        slot: CodecSlot::Audio,
        options: &[],
    },
    CodecDefinition {
        name: "flac",
        display: "flac",
        slot: CodecSlot::Audio,
        options: &[],
    },
    CodecDefinition {
        name: "aac",
        display: "mp4a.40.2",
        slot: CodecSlot::Audio,
        options: &[],
    },
    CodecDefinition {
        name: "libx264",
        display: "avc1.4d401e",
        slot: CodecSlot::Video,
        options: &["-profile:v", "main", "-preset", "veryfast"],
    },
    CodecDefinition {
        name: "libvpx",
        display: "vp8",
        slot: CodecSlot::Video,
        options: &["-deadline", "realtime", "-cpu-used", "8"],
    },
    CodecDefinition {
        name: "libvpx-vp9",
        display: "vp9",
        slot: CodecSlot::Video,
        options: &["-deadline", "realtime", "-cpu-used", "8", "-row-mt", "1"],
    },
    CodecDefinition {
        name: "libtheora",
        display: "theora",
        slot: CodecSlot::Video,
        options: &["-q:v", "7"],
    },
];

/// Capability matrix as served by `GET /stream/formats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormatsMatrix {
    /// mimetype -> encoder -> display name.
    pub audio: BTreeMap<String, BTreeMap<String, String>>,
    /// mimetype -> "vcodec;acodec" -> "vdisplay, adisplay".
    pub video: BTreeMap<String, BTreeMap<String, String>>,
}

/// Read-only view over a container and codec table.
#[derive(Debug, Clone, Copy)]
pub struct Registry {
    containers: &'static [ContainerFormat],
    codecs: &'static [CodecDefinition],
}

impl Registry {
    /// The compiled-in table.
    pub const fn builtin() -> Self {
        Self {
            containers: CONTAINERS,
            codecs: CODECS,
        }
    }

    #[cfg(test)]
    pub(crate) const fn from_tables(
        containers: &'static [ContainerFormat],
        codecs: &'static [CodecDefinition],
    ) -> Self {
        Self { containers, codecs }
    }

    pub fn containers(&self) -> impl Iterator<Item = &'static ContainerFormat> {
        self.containers.iter()
    }

    pub fn container(&self, mimetype: &str) -> Option<&'static ContainerFormat> {
        self.containers.iter().find(|c| c.mimetype == mimetype)
    }

    /// Audio and video encoder names accepted by a container.
    pub fn container_codecs(&self, mimetype: &str) -> Option<(Vec<&'static str>, Vec<&'static str>)> {
        let c = self.container(mimetype)?;
        Some((
            c.audio.iter().map(|(n, _)| *n).collect(),
            c.video.iter().map(|(n, _)| *n).collect(),
        ))
    }

    pub fn codec(&self, name: &str) -> Option<&'static CodecDefinition> {
        self.codecs.iter().find(|c| c.name == name)
    }

    pub fn codec_display_name(&self, name: &str) -> Option<&'static str> {
        self.codec(name).map(|c| c.display)
    }

    /// Whether `stream` can be copied into `container` as `codec`.
    ///
    /// Unknown containers, codecs and kind mismatches are never compatible.
    pub fn is_stream_compatible(
        &self,
        container: &ContainerFormat,
        slot: CodecSlot,
        codec: &str,
        stream: &StreamInfo,
    ) -> bool {
        stream.is(slot.stream_kind())
            && container
                .rule(slot, codec)
                .is_some_and(|rule| rule.matches(stream))
    }

    /// Check the table's internal consistency.
    pub fn validate(&self) -> Result<()> {
        for (i, c) in self.containers.iter().enumerate() {
            if self.containers[..i].iter().any(|o| o.mimetype == c.mimetype) {
                return Err(Error::Config(format!("duplicate container '{}'", c.mimetype)));
            }
            if c.audio.is_empty() {
                return Err(Error::Config(format!("container '{}' has no audio codecs", c.mimetype)));
            }
            if c.compat.is_empty() {
                return Err(Error::Config(format!("container '{}' has no source format names", c.mimetype)));
            }
            match (c.media_type, c.video.is_empty()) {
                (MediaType::Video, true) => {
                    return Err(Error::Config(format!(
                        "video container '{}' has no video codecs",
                        c.mimetype
                    )))
                }
                (MediaType::Audio, false) => {
                    return Err(Error::Config(format!(
                        "audio container '{}' lists video codecs",
                        c.mimetype
                    )))
                }
                _ => {}
            }
            for slot in [CodecSlot::Audio, CodecSlot::Video] {
                for (name, _) in c.codecs(slot) {
                    let def = self.codec(name).ok_or_else(|| {
                        Error::Config(format!(
                            "container '{}' references codec '{name}' without a definition",
                            c.mimetype
                        ))
                    })?;
                    if def.slot != slot {
                        return Err(Error::Config(format!(
                            "codec '{name}' used in the wrong slot of container '{}'",
                            c.mimetype
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Build the client-facing matrix. With `caps`, containers whose muxer
    /// and encoders the installed ffmpeg lacks are left out.
    pub fn matrix(&self, caps: Option<&ToolCapabilities>) -> FormatsMatrix {
        let supported = |c: &ContainerFormat, codecs: &[&str]| match caps {
            Some(caps) => caps.has_muxer(c.format) && codecs.iter().all(|n| caps.has_encoder(n)),
            None => true,
        };

        let mut matrix = FormatsMatrix::default();
        for c in self.containers {
            match c.media_type {
                MediaType::Audio => {
                    let entries: BTreeMap<String, String> = c
                        .audio
                        .iter()
                        .filter(|(a, _)| supported(c, &[*a]))
                        .filter_map(|(a, _)| Some((a.to_string(), self.codec_display_name(a)?.to_string())))
                        .collect();
                    if !entries.is_empty() {
                        matrix.audio.insert(c.mimetype.to_string(), entries);
                    }
                }
                MediaType::Video => {
                    let mut entries = BTreeMap::new();
                    for (v, _) in c.video {
                        for (a, _) in c.audio {
                            if !supported(c, &[*v, *a]) {
                                continue;
                            }
                            if let (Some(vd), Some(ad)) =
                                (self.codec_display_name(v), self.codec_display_name(a))
                            {
                                entries.insert(format!("{v};{a}"), format!("{vd}, {ad}"));
                            }
                        }
                    }
                    if !entries.is_empty() {
                        matrix.video.insert(c.mimetype.to_string(), entries);
                    }
                }
            }
        }
        matrix
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}
