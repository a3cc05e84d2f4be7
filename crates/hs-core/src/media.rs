//! Media-domain types shared by providers, the negotiator, and the runner.

use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::Error;

/// Kind of playable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of an elementary stream inside a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Audio,
    Video,
    Subtitle,
    #[default]
    Other,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Audio => "audio",
            StreamKind::Video => "video",
            StreamKind::Subtitle => "subtitle",
            StreamKind::Other => "other",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(StreamKind::Audio),
            "video" => Ok(StreamKind::Video),
            "subtitle" => Ok(StreamKind::Subtitle),
            other => Err(Error::bad_request(format!("unknown stream type '{other}'"))),
        }
    }
}

impl From<MediaType> for StreamKind {
    fn from(t: MediaType) -> Self {
        match t {
            MediaType::Audio => StreamKind::Audio,
            MediaType::Video => StreamKind::Video,
        }
    }
}

/// One elementary stream as reported by the prober.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Index of the stream in the source container (ffmpeg `0:<index>`).
    pub index: usize,
    pub kind: StreamKind,
    /// Decoder-side codec name (`h264`, `mp3`, `vorbis`...).
    pub codec: String,
    /// Codec profile (`High`, `Main`...), video only.
    pub profile: Option<String>,
    /// Codec level as reported by ffprobe (`41` for 4.1), video only.
    pub level: Option<i32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Bitrate in kbps when known.
    pub bitrate: Option<u32>,
}

impl StreamInfo {
    pub fn is(&self, kind: StreamKind) -> bool {
        self.kind == kind
    }
}

/// Where the bytes of a source come from.
///
/// The provider owns whatever handle backs the source; the streaming core
/// only reads from it.
pub enum MediaSource {
    Path(PathBuf),
    Stream(Pin<Box<dyn AsyncRead + Send>>),
}

impl MediaSource {
    pub fn is_pipe(&self) -> bool {
        matches!(self, MediaSource::Stream(_))
    }
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::Path(p) => f.debug_tuple("Path").field(p).finish(),
            MediaSource::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Everything the streaming core needs to know about one playable item.
///
/// Request-scoped: built by a provider for each request and consumed by the
/// session that plays it.
#[derive(Debug)]
pub struct SourceDescriptor {
    pub media_type: MediaType,
    pub source: MediaSource,
    /// Demuxer names reported by ffprobe, e.g. `matroska,webm`.
    pub container: Option<String>,
    pub streams: Vec<StreamInfo>,
    /// Audio bitrate in kbps.
    pub bitrate: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Duration in seconds.
    pub length: Option<f64>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub cover: Option<String>,
    /// Raw ffmpeg output options, appended verbatim after codec options.
    pub options: Vec<String>,
    /// Extra video filters, appended to the filter chain.
    pub filters: Vec<String>,
}

impl SourceDescriptor {
    /// Minimal descriptor for a file; callers fill in the rest.
    pub fn new(media_type: MediaType, source: MediaSource) -> Self {
        Self {
            media_type,
            source,
            container: None,
            streams: Vec::new(),
            bitrate: None,
            width: None,
            height: None,
            length: None,
            title: None,
            subtitle: None,
            cover: None,
            options: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn first_stream(&self, kind: StreamKind) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.is(kind))
    }

    pub fn stream(&self, index: usize) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.index == index)
    }

    /// Native quality figure: audio bitrate for audio, frame height for video.
    pub fn native_quality(&self) -> Option<u32> {
        match self.media_type {
            MediaType::Audio => self.bitrate,
            MediaType::Video => self.height,
        }
    }

    /// Check the "at least one stream of my own type" invariant.
    pub fn has_primary_stream(&self) -> bool {
        self.first_stream(self.media_type.into()).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_stream(index: usize, codec: &str) -> StreamInfo {
        StreamInfo {
            index,
            kind: StreamKind::Audio,
            codec: codec.into(),
            ..Default::default()
        }
    }

    #[test]
    fn stream_kind_parse() {
        assert_eq!("audio".parse::<StreamKind>().unwrap(), StreamKind::Audio);
        assert_eq!("video".parse::<StreamKind>().unwrap(), StreamKind::Video);
        assert!("bogus".parse::<StreamKind>().is_err());
    }

    #[test]
    fn media_type_serde_lowercase() {
        let json = serde_json::to_string(&MediaType::Video).unwrap();
        assert_eq!(json, "\"video\"");
        let back: MediaType = serde_json::from_str("\"audio\"").unwrap();
        assert_eq!(back, MediaType::Audio);
    }

    #[test]
    fn descriptor_lookups() {
        let mut d = SourceDescriptor::new(MediaType::Audio, MediaSource::Path("/a.mp3".into()));
        d.bitrate = Some(256);
        d.streams = vec![
            StreamInfo {
                index: 0,
                kind: StreamKind::Video,
                codec: "mjpeg".into(),
                ..Default::default()
            },
            audio_stream(1, "mp3"),
        ];

        assert_eq!(d.first_stream(StreamKind::Audio).unwrap().index, 1);
        assert_eq!(d.stream(0).unwrap().codec, "mjpeg");
        assert!(d.stream(7).is_none());
        assert_eq!(d.native_quality(), Some(256));
        assert!(d.has_primary_stream());
    }

    #[test]
    fn descriptor_without_primary_stream() {
        let d = SourceDescriptor::new(MediaType::Video, MediaSource::Path("/v.mkv".into()));
        assert!(!d.has_primary_stream());
        assert!(!d.source.is_pipe());
    }
}
