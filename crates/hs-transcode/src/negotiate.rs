//! Choosing what to play: stream selection, copy narrowing, final pick.

use std::str::FromStr;

use hs_core::{Error, MediaType, Result, SourceDescriptor, StreamInfo, StreamKind};

use crate::candidate::Candidate;
use crate::registry::{CodecSlot, ContainerFormat, Registry};

/// Which source streams feed the output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StreamSelection {
    /// First audio stream, plus the first video stream for video requests.
    #[default]
    Auto,
    /// Explicit `(kind, index)` pairs, as in `audio:1,video:0`.
    Explicit(Vec<(StreamKind, usize)>),
}

impl FromStr for StreamSelection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "auto" {
            return Ok(StreamSelection::Auto);
        }

        let mut picks = Vec::new();
        for item in s.split(',') {
            let (kind, index) = item
                .trim()
                .split_once(':')
                .ok_or_else(|| Error::bad_request(format!("invalid stream reference '{item}'")))?;
            let kind: StreamKind = kind.parse()?;
            let index = index
                .parse::<usize>()
                .map_err(|_| Error::bad_request(format!("invalid stream index in '{item}'")))?;
            picks.push((kind, index));
        }
        Ok(StreamSelection::Explicit(picks))
    }
}

/// Per-request negotiation inputs.
#[derive(Debug, Clone)]
pub struct NegotiationRequest {
    pub selection: StreamSelection,
    /// Parsed client candidates in preference order.
    pub candidates: Vec<Candidate>,
    /// Seek offset in seconds.
    pub seek: f64,
    /// Target bitrate (audio, kbps) or height (video). `None` means native.
    pub quality: Option<u32>,
}

/// Outcome of a negotiation.
#[derive(Debug, Clone)]
pub struct NegotiatedChoice {
    pub media_type: MediaType,
    pub container: &'static ContainerFormat,
    pub acodec: &'static str,
    pub vcodec: Option<&'static str>,
    pub copy_audio: bool,
    pub copy_video: bool,
    /// The source is already in the chosen container and every selected
    /// track is copied, so the output only re-wraps the input.
    pub remux: bool,
    /// Selected audio stream; absent for silent videos.
    pub audio_stream: Option<StreamInfo>,
    pub video_stream: Option<StreamInfo>,
    /// Target quality; the source's native figure when none was requested.
    pub quality: Option<u32>,
}

/// Resolve streams and pick the first viable candidate.
///
/// Candidate order is preserved: copy compatibility only narrows the list,
/// audio first, then video on what the audio pass left.
pub fn negotiate(
    registry: &Registry,
    source: &SourceDescriptor,
    request: NegotiationRequest,
) -> Result<NegotiatedChoice> {
    let media_type = source.media_type;
    let (audio_stream, video_stream) = select_streams(source, &request.selection)?;

    if !request.seek.is_finite() || request.seek < 0.0 {
        return Err(Error::bad_request(format!("invalid seek offset {}", request.seek)));
    }

    if request.quality == Some(0) {
        return Err(Error::bad_request("invalid quality 0"));
    }

    let mut candidates = request.candidates;
    if candidates.is_empty() {
        return Err(Error::bad_request("no compatible client format"));
    }

    let native = source.native_quality();
    let quality = request.quality.or(native);
    let at_start = request.seek == 0.0;
    let native_quality = request.quality.is_none() || request.quality == native;

    let audio_copy_allowed = at_start && native_quality;
    // Filters need decoded frames.
    let video_copy_allowed = at_start && native_quality && source.filters.is_empty();

    let mut copy_audio = false;
    if let (Some(stream), true) = (&audio_stream, audio_copy_allowed) {
        copy_audio = narrow(registry, &mut candidates, CodecSlot::Audio, stream);
    }

    let mut copy_video = false;
    if let (Some(stream), true) = (&video_stream, video_copy_allowed) {
        copy_video = narrow(registry, &mut candidates, CodecSlot::Video, stream);
    }

    let chosen = candidates[0];
    let remux = source
        .container
        .as_deref()
        .is_some_and(|name| chosen.container.matches_source(name))
        && (audio_stream.is_none() || copy_audio)
        && (video_stream.is_none() || copy_video);

    tracing::debug!(
        candidate = %chosen,
        copy_audio,
        copy_video,
        remux,
        seek = request.seek,
        quality = ?quality,
        "Negotiated output format"
    );

    Ok(NegotiatedChoice {
        media_type,
        container: chosen.container,
        acodec: chosen.acodec,
        vcodec: chosen.vcodec,
        copy_audio,
        copy_video,
        remux,
        audio_stream,
        video_stream,
        quality,
    })
}

/// Keep only candidates that can copy `stream`; leaves the list untouched
/// and returns `false` when none can.
fn narrow(registry: &Registry, candidates: &mut Vec<Candidate>, slot: CodecSlot, stream: &StreamInfo) -> bool {
    let compatible: Vec<Candidate> = candidates
        .iter()
        .copied()
        .filter(|c| {
            let codec = match slot {
                CodecSlot::Audio => Some(c.acodec),
                CodecSlot::Video => c.vcodec,
            };
            codec.is_some_and(|codec| registry.is_stream_compatible(c.container, slot, codec, stream))
        })
        .collect();

    if compatible.is_empty() {
        false
    } else {
        *candidates = compatible;
        true
    }
}

fn select_streams(
    source: &SourceDescriptor,
    selection: &StreamSelection,
) -> Result<(Option<StreamInfo>, Option<StreamInfo>)> {
    let media_type = source.media_type;

    let (audio, video) = match selection {
        StreamSelection::Auto => (
            source.first_stream(StreamKind::Audio).cloned(),
            match media_type {
                MediaType::Video => source.first_stream(StreamKind::Video).cloned(),
                MediaType::Audio => None,
            },
        ),
        StreamSelection::Explicit(picks) => {
            let mut audio = None;
            let mut video = None;
            for &(kind, index) in picks {
                let stream = source
                    .stream(index)
                    .ok_or_else(|| Error::bad_request(format!("stream {index} does not exist")))?;
                if stream.kind != kind {
                    return Err(Error::bad_request(format!(
                        "stream {index} is {}, not {kind}",
                        stream.kind
                    )));
                }
                let slot = match (kind, media_type) {
                    (StreamKind::Audio, _) => &mut audio,
                    (StreamKind::Video, MediaType::Video) => &mut video,
                    _ => {
                        return Err(Error::bad_request(format!(
                            "{kind} streams cannot be selected for {media_type} output"
                        )))
                    }
                };
                if slot.is_some() {
                    return Err(Error::bad_request(format!("more than one {kind} stream selected")));
                }
                *slot = Some(stream.clone());
            }
            (audio, video)
        }
    };

    match media_type {
        MediaType::Audio if audio.is_none() => Err(Error::bad_request("no audio stream selected")),
        MediaType::Video if video.is_none() => Err(Error::bad_request("no video stream selected")),
        _ => Ok((audio, video)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::parse_candidates;
    use hs_core::MediaSource;

    fn stream(index: usize, kind: StreamKind, codec: &str) -> StreamInfo {
        StreamInfo {
            index,
            kind,
            codec: codec.into(),
            ..Default::default()
        }
    }

    fn mp3_source() -> SourceDescriptor {
        let mut d = SourceDescriptor::new(MediaType::Audio, MediaSource::Path("/m/a.mp3".into()));
        d.bitrate = Some(256);
        d.streams = vec![stream(0, StreamKind::Audio, "mp3")];
        d
    }

    fn video_source() -> SourceDescriptor {
        let mut d = SourceDescriptor::new(MediaType::Video, MediaSource::Path("/m/v.mkv".into()));
        d.height = Some(1080);
        d.width = Some(1920);
        d.streams = vec![
            StreamInfo {
                profile: Some("High".into()),
                level: Some(41),
                height: Some(1080),
                ..stream(0, StreamKind::Video, "h264")
            },
            stream(1, StreamKind::Audio, "aac"),
            stream(2, StreamKind::Audio, "vorbis"),
        ];
        d
    }

    fn request(media_type: MediaType, entries: &[&str]) -> NegotiationRequest {
        let entries: Vec<String> = entries.iter().map(|s| s.to_string()).collect();
        NegotiationRequest {
            selection: StreamSelection::Auto,
            candidates: parse_candidates(&Registry::builtin(), media_type, &entries, None),
            seek: 0.0,
            quality: None,
        }
    }

    #[test]
    fn parse_selection() {
        assert_eq!("auto".parse::<StreamSelection>().unwrap(), StreamSelection::Auto);
        assert_eq!("".parse::<StreamSelection>().unwrap(), StreamSelection::Auto);
        assert_eq!(
            "video:0, audio:2".parse::<StreamSelection>().unwrap(),
            StreamSelection::Explicit(vec![(StreamKind::Video, 0), (StreamKind::Audio, 2)])
        );
        assert!("video".parse::<StreamSelection>().is_err());
        assert!("video:x".parse::<StreamSelection>().is_err());
        assert!("data:1".parse::<StreamSelection>().is_err());
    }

    #[test]
    fn copy_narrowing_picks_first_compatible() {
        let src = mp3_source();
        let req = request(
            MediaType::Audio,
            &["audio/ogg;libvorbis", "audio/mpeg;libmp3lame", "audio/webm;libopus"],
        );
        let choice = negotiate(&Registry::builtin(), &src, req).unwrap();
        assert_eq!(choice.container.mimetype, "audio/mpeg");
        assert!(choice.copy_audio);
    }

    #[test]
    fn no_compatible_candidate_keeps_client_order() {
        let src = mp3_source();
        let req = request(MediaType::Audio, &["audio/ogg;libvorbis", "audio/webm;libopus"]);
        let choice = negotiate(&Registry::builtin(), &src, req).unwrap();
        assert_eq!(choice.container.mimetype, "audio/ogg");
        assert_eq!(choice.acodec, "libvorbis");
        assert!(!choice.copy_audio);
        assert_eq!(choice.quality, Some(256));
    }

    #[test]
    fn seek_disables_copy() {
        let src = mp3_source();
        for seek in [0.5, 10.0, 90.0] {
            let mut req = request(MediaType::Audio, &["audio/ogg;libvorbis", "audio/mpeg;libmp3lame"]);
            req.seek = seek;
            let choice = negotiate(&Registry::builtin(), &src, req).unwrap();
            assert!(!choice.copy_audio, "seek {seek}");
            assert_eq!(choice.container.mimetype, "audio/ogg");
        }
    }

    #[test]
    fn quality_change_disables_copy() {
        let src = mp3_source();
        let mut req = request(MediaType::Audio, &["audio/mpeg;libmp3lame"]);
        req.quality = Some(128);
        let choice = negotiate(&Registry::builtin(), &src, req).unwrap();
        assert!(!choice.copy_audio);
        assert_eq!(choice.quality, Some(128));

        let mut req = request(MediaType::Audio, &["audio/mpeg;libmp3lame"]);
        req.quality = Some(256);
        assert!(negotiate(&Registry::builtin(), &src, req).unwrap().copy_audio);
    }

    #[test]
    fn empty_candidates_is_bad_request() {
        let src = mp3_source();
        let req = request(MediaType::Audio, &["audio/x-wav;pcm"]);
        let err = negotiate(&Registry::builtin(), &src, req).unwrap_err();
        assert_eq!(err.to_string(), "Bad request: no compatible client format");
    }

    #[test]
    fn video_and_audio_narrow_independently() {
        let src = video_source();
        let req = request(
            MediaType::Video,
            &[
                "video/webm;libvpx;libvorbis",
                "video/x-matroska;libvpx-vp9;aac",
                "video/mp4;libx264;libmp3lame",
                "video/mp4;libx264;aac",
            ],
        );
        let choice = negotiate(&Registry::builtin(), &src, req).unwrap();
        assert_eq!(choice.container.mimetype, "video/mp4");
        assert_eq!(choice.acodec, "aac");
        assert!(choice.copy_audio);
        assert!(choice.copy_video);
        assert_eq!(choice.audio_stream.unwrap().index, 1);
        assert_eq!(choice.video_stream.unwrap().index, 0);
    }

    #[test]
    fn lower_video_quality_disables_all_copies() {
        let src = video_source();
        let mut req = request(MediaType::Video, &["video/webm;libvpx;libvorbis", "video/mp4;libx264;aac"]);
        req.quality = Some(720);
        let choice = negotiate(&Registry::builtin(), &src, req).unwrap();
        assert_eq!(choice.container.mimetype, "video/webm");
        assert!(!choice.copy_audio);
        assert!(!choice.copy_video);
        assert_eq!(choice.quality, Some(720));

        let mut req = request(MediaType::Video, &["video/webm;libvpx;libvorbis", "video/mp4;libx264;aac"]);
        req.quality = Some(1080);
        let choice = negotiate(&Registry::builtin(), &src, req).unwrap();
        assert_eq!(choice.container.mimetype, "video/mp4");
        assert!(choice.copy_audio);
        assert!(choice.copy_video);
    }

    #[test]
    fn zero_quality_rejected() {
        let mut req = request(MediaType::Audio, &["audio/mpeg;libmp3lame"]);
        req.quality = Some(0);
        let err = negotiate(&Registry::builtin(), &mp3_source(), req).unwrap_err();
        assert_eq!(err.http_status(), 400);

        let mut req = request(MediaType::Video, &["video/mp4;libx264;aac"]);
        req.quality = Some(0);
        assert!(negotiate(&Registry::builtin(), &video_source(), req).is_err());
    }

    #[test]
    fn provider_filters_disable_video_copy() {
        let mut src = video_source();
        src.filters.push("yadif".into());
        let req = request(MediaType::Video, &["video/mp4;libx264;aac"]);
        let choice = negotiate(&Registry::builtin(), &src, req).unwrap();
        assert!(!choice.copy_video);
        assert!(choice.copy_audio);
    }

    #[test]
    fn explicit_selection() {
        let src = video_source();
        let mut req = request(MediaType::Video, &["video/webm;libvpx;libvorbis"]);
        req.selection = "video:0,audio:2".parse().unwrap();
        let choice = negotiate(&Registry::builtin(), &src, req).unwrap();
        assert_eq!(choice.audio_stream.unwrap().codec, "vorbis");
        assert!(choice.copy_audio);
        assert!(!choice.copy_video);
    }

    #[test]
    fn explicit_kind_mismatch_is_bad_request() {
        let src = video_source();
        let mut req = request(MediaType::Video, &["video/mp4;libx264;aac"]);
        req.selection = "video:2".parse().unwrap();
        let err = negotiate(&Registry::builtin(), &src, req).unwrap_err();
        assert_eq!(err.http_status(), 400);
        assert!(err.to_string().contains("stream 2 is audio"), "{err}");
    }

    #[test]
    fn explicit_missing_index_is_bad_request() {
        let src = video_source();
        let mut req = request(MediaType::Video, &["video/mp4;libx264;aac"]);
        req.selection = "video:0,audio:9".parse().unwrap();
        assert!(negotiate(&Registry::builtin(), &src, req).is_err());
    }

    #[test]
    fn explicit_duplicate_and_foreign_kind_rejected() {
        let src = video_source();
        let mut req = request(MediaType::Video, &["video/mp4;libx264;aac"]);
        req.selection = "video:0,audio:1,audio:2".parse().unwrap();
        assert!(negotiate(&Registry::builtin(), &src, req).is_err());

        let mut audio_src = mp3_source();
        audio_src.streams.push(stream(1, StreamKind::Video, "mjpeg"));
        let mut req = request(MediaType::Audio, &["audio/mpeg;libmp3lame"]);
        req.selection = "audio:0,video:1".parse().unwrap();
        assert!(negotiate(&Registry::builtin(), &audio_src, req).is_err());
    }

    #[test]
    fn same_container_with_copied_tracks_is_a_remux() {
        let mut src = mp3_source();
        src.container = Some("mp3".into());
        let req = request(MediaType::Audio, &["audio/ogg;libvorbis", "audio/mpeg;libmp3lame"]);
        let choice = negotiate(&Registry::builtin(), &src, req).unwrap();
        assert!(choice.copy_audio);
        assert!(choice.remux);

        // Copied, but into a different container.
        let mut src = video_source();
        src.container = Some("matroska,webm".into());
        let req = request(MediaType::Video, &["video/mp4;libx264;aac"]);
        let choice = negotiate(&Registry::builtin(), &src, req).unwrap();
        assert!(choice.copy_video && choice.copy_audio);
        assert!(!choice.remux);

        let req = request(MediaType::Video, &["video/x-matroska;libx264;aac"]);
        assert!(negotiate(&Registry::builtin(), &src, req).unwrap().remux);
    }

    #[test]
    fn reencoded_or_unprobed_sources_are_not_remuxed() {
        let mut src = mp3_source();
        src.container = Some("mp3".into());
        let mut req = request(MediaType::Audio, &["audio/mpeg;libmp3lame"]);
        req.seek = 5.0;
        let choice = negotiate(&Registry::builtin(), &src, req).unwrap();
        assert!(!choice.copy_audio);
        assert!(!choice.remux);

        let src = mp3_source();
        let req = request(MediaType::Audio, &["audio/mpeg;libmp3lame"]);
        let choice = negotiate(&Registry::builtin(), &src, req).unwrap();
        assert!(choice.copy_audio);
        assert!(!choice.remux);
    }

    #[test]
    fn silent_video_has_no_audio_stream() {
        let mut src = video_source();
        src.streams.truncate(1);
        let req = request(MediaType::Video, &["video/mp4;libx264;aac"]);
        let choice = negotiate(&Registry::builtin(), &src, req).unwrap();
        assert!(choice.audio_stream.is_none());
        assert!(!choice.copy_audio);
        assert!(choice.copy_video);
    }

    #[test]
    fn audio_request_without_audio_stream_fails() {
        let mut src = mp3_source();
        src.streams = vec![stream(0, StreamKind::Video, "mjpeg")];
        let req = request(MediaType::Audio, &["audio/mpeg;libmp3lame"]);
        assert!(negotiate(&Registry::builtin(), &src, req).is_err());
    }

    #[test]
    fn negative_seek_rejected() {
        let mut req = request(MediaType::Audio, &["audio/mpeg;libmp3lame"]);
        req.seek = -1.0;
        assert!(negotiate(&Registry::builtin(), &mp3_source(), req).is_err());
    }
}
