//! Client capability strings and their parsed form.
//!
//! A client declares what it can play as `"mimetype;codec"` for audio and
//! `"mimetype;vcodec;acodec"` for video, in preference order.

use hs_av::ToolCapabilities;
use hs_core::MediaType;
use serde::{Deserialize, Serialize};

use crate::registry::{CodecSlot, ContainerFormat, Registry};

/// Body of `POST /stream/formats`, stored per client session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientCapabilities {
    pub audio: Vec<String>,
    pub video: Vec<String>,
}

impl ClientCapabilities {
    /// Fixed set played by Chromecast receivers.
    pub fn cast() -> Self {
        Self {
            audio: vec![
                "audio/mpeg;libmp3lame".into(),
                "audio/aac;aac".into(),
                "audio/webm;libvorbis".into(),
            ],
            video: vec![
                "video/mp4;libx264;aac".into(),
                "video/webm;libvpx;libvorbis".into(),
            ],
        }
    }

    pub fn for_media(&self, media_type: MediaType) -> &[String] {
        match media_type {
            MediaType::Audio => &self.audio,
            MediaType::Video => &self.video,
        }
    }
}

/// One playable output the client declared and the registry knows.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub container: &'static ContainerFormat,
    /// Video encoder, set for video candidates only.
    pub vcodec: Option<&'static str>,
    pub acodec: &'static str,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.container.mimetype == other.container.mimetype
            && self.vcodec == other.vcodec
            && self.acodec == other.acodec
    }
}

impl Eq for Candidate {}

impl std::fmt::Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.vcodec {
            Some(v) => write!(f, "{};{};{}", self.container.mimetype, v, self.acodec),
            None => write!(f, "{};{}", self.container.mimetype, self.acodec),
        }
    }
}

/// Parse client strings for `media_type`, keeping declaration order.
///
/// Entries the registry does not know, that belong to the other media
/// type, or (with `caps`) that the installed ffmpeg cannot produce are
/// skipped.
pub fn parse_candidates(
    registry: &Registry,
    media_type: MediaType,
    entries: &[String],
    caps: Option<&ToolCapabilities>,
) -> Vec<Candidate> {
    entries
        .iter()
        .filter_map(|entry| {
            let parsed = parse_one(registry, media_type, entry);
            if parsed.is_none() {
                tracing::debug!(entry = %entry, media_type = %media_type, "Skipping unknown client format");
            }
            parsed
        })
        .filter(|c| match caps {
            Some(caps) => {
                let ok = caps.has_muxer(c.container.format)
                    && caps.has_encoder(c.acodec)
                    && c.vcodec.map_or(true, |v| caps.has_encoder(v));
                if !ok {
                    tracing::debug!(candidate = %c, "Skipping client format unsupported by ffmpeg");
                }
                ok
            }
            None => true,
        })
        .collect()
}

fn parse_one(registry: &Registry, media_type: MediaType, entry: &str) -> Option<Candidate> {
    let parts: Vec<&str> = entry.split(';').map(str::trim).collect();
    let container = registry.container(parts.first()?)?;
    if container.media_type != media_type {
        return None;
    }

    let (vcodec, acodec) = match (media_type, parts.as_slice()) {
        (MediaType::Audio, [_, a]) => (None, *a),
        (MediaType::Video, [_, v, a]) => (Some(*v), *a),
        _ => return None,
    };

    let acodec = codec_in(container, CodecSlot::Audio, acodec)?;
    let vcodec = match vcodec {
        Some(v) => Some(codec_in(container, CodecSlot::Video, v)?),
        None => None,
    };

    Some(Candidate {
        container,
        vcodec,
        acodec,
    })
}

/// The container's own `'static` name for `codec`, if it accepts it.
fn codec_in(container: &ContainerFormat, slot: CodecSlot, codec: &str) -> Option<&'static str> {
    container
        .codecs(slot)
        .iter()
        .find(|(name, _)| *name == codec)
        .map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn audio_candidates_keep_order() {
        let reg = Registry::builtin();
        let list = parse_candidates(
            &reg,
            MediaType::Audio,
            &strings(&["audio/ogg;libvorbis", "audio/mpeg;libmp3lame"]),
            None,
        );
        let names: Vec<String> = list.iter().map(|c| c.to_string()).collect();
        assert_eq!(names, vec!["audio/ogg;libvorbis", "audio/mpeg;libmp3lame"]);
        assert!(list[0].vcodec.is_none());
    }

    #[test]
    fn video_candidates() {
        let reg = Registry::builtin();
        let list = parse_candidates(
            &reg,
            MediaType::Video,
            &strings(&["video/mp4;libx264;aac"]),
            None,
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].vcodec, Some("libx264"));
        assert_eq!(list[0].acodec, "aac");
        assert_eq!(list[0].container.format, "mp4");
    }

    #[test]
    fn unknown_and_mismatched_entries_are_skipped() {
        let reg = Registry::builtin();
        let entries = strings(&[
            "audio/x-wav;pcm",
            "audio/mpeg;libvorbis",
            "video/webm;libvpx;libvorbis",
            "audio/mpeg",
            "audio/mpeg;libmp3lame;extra",
            "",
        ]);
        assert!(parse_candidates(&reg, MediaType::Audio, &entries, None).is_empty());
    }

    #[test]
    fn video_slots_are_checked() {
        let reg = Registry::builtin();
        // Codecs swapped.
        let entries = strings(&["video/webm;libvorbis;libvpx"]);
        assert!(parse_candidates(&reg, MediaType::Video, &entries, None).is_empty());
    }

    #[test]
    fn capabilities_filter_candidates() {
        let reg = Registry::builtin();
        let mut caps = ToolCapabilities::default();
        caps.muxers.insert("ogg".into());
        caps.audio_encoders.insert("libvorbis".into());

        let list = parse_candidates(
            &reg,
            MediaType::Audio,
            &strings(&["audio/mpeg;libmp3lame", "audio/ogg;libvorbis"]),
            Some(&caps),
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].container.mimetype, "audio/ogg");
    }

    #[test]
    fn cast_set_is_fully_known() {
        let reg = Registry::builtin();
        let cast = ClientCapabilities::cast();
        assert_eq!(
            parse_candidates(&reg, MediaType::Audio, cast.for_media(MediaType::Audio), None).len(),
            cast.audio.len()
        );
        assert_eq!(
            parse_candidates(&reg, MediaType::Video, cast.for_media(MediaType::Video), None).len(),
            cast.video.len()
        );
    }

    #[test]
    fn capabilities_deserialize_with_missing_lists() {
        let caps: ClientCapabilities = serde_json::from_str(r#"{"audio": ["audio/mpeg;libmp3lame"]}"#).unwrap();
        assert_eq!(caps.audio.len(), 1);
        assert!(caps.video.is_empty());
    }
}
