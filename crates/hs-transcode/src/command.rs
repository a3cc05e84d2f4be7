//! ffmpeg invocation for a negotiated choice.
//!
//! [`build_command`] is pure: it only decides the argument list. Spawning
//! is the session runner's job.

use std::fmt;
use std::path::PathBuf;

use hs_core::{Error, MediaSource, MediaType, Result, SourceDescriptor};

use crate::negotiate::NegotiatedChoice;
use crate::registry::Registry;

/// Offsets at or above this many seconds use a fast input seek first.
pub const SEEK_THRESHOLD: f64 = 30.0;

/// Two-phase seek: a cheap container-level seek before `-i`, then a
/// frame-accurate one after it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SeekPlan {
    pub fast: Option<f64>,
    pub slow: Option<f64>,
}

impl SeekPlan {
    pub fn for_offset(seek: f64) -> Self {
        if seek <= 0.0 {
            Self::default()
        } else if seek < SEEK_THRESHOLD {
            Self {
                fast: None,
                slow: Some(seek),
            }
        } else {
            Self {
                fast: Some(seek - SEEK_THRESHOLD),
                slow: Some(SEEK_THRESHOLD),
            }
        }
    }
}

/// Output frame size with the width left to the scaler, as in `?x720`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSize {
    pub height: u32,
}

impl TargetSize {
    /// Scale filter keeping the aspect ratio with an even width.
    pub fn filter(&self) -> String {
        format!("scale=-2:{}", self.height)
    }
}

impl fmt::Display for TargetSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?x{}", self.height)
    }
}

/// Where ffmpeg reads the source from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessInput {
    Path(PathBuf),
    /// Source bytes are written to stdin.
    Pipe,
}

/// Everything needed to run one transcode, decided up front.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSpec {
    /// Arguments after the program name.
    pub args: Vec<String>,
    pub input: ProcessInput,
    /// ffmpeg muxer name.
    pub format: &'static str,
    /// `Content-Type` of the output.
    pub mimetype: &'static str,
    pub seek: SeekPlan,
    pub size: Option<TargetSize>,
}

fn secs(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        let s = format!("{value:.3}");
        s.trim_end_matches('0').to_string()
    }
}

/// Build the ffmpeg arguments for `choice` over `source` starting at `seek`.
pub fn build_command(
    registry: &Registry,
    choice: &NegotiatedChoice,
    source: &SourceDescriptor,
    seek: f64,
) -> Result<ProcessSpec> {
    if !seek.is_finite() || seek < 0.0 {
        return Err(Error::bad_request(format!("invalid seek offset {seek}")));
    }
    if seek > 0.0 && (choice.copy_audio || choice.copy_video) {
        return Err(Error::Internal("stream copy requested together with a seek".into()));
    }

    let plan = SeekPlan::for_offset(seek);
    let input = match &source.source {
        MediaSource::Path(p) => ProcessInput::Path(p.clone()),
        MediaSource::Stream(_) => ProcessInput::Pipe,
    };

    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
    match &input {
        ProcessInput::Path(p) if p.as_os_str().is_empty() => {
            return Err(Error::Internal("provider returned an empty source path".into()))
        }
        ProcessInput::Path(_) => args.push("-nostdin".into()),
        ProcessInput::Pipe => {}
    }

    if let Some(fast) = plan.fast {
        args.extend(["-ss".into(), secs(fast)]);
    }
    args.push("-i".into());
    args.push(match &input {
        ProcessInput::Path(p) => p.to_string_lossy().to_string(),
        ProcessInput::Pipe => "pipe:0".into(),
    });
    if let Some(slow) = plan.slow {
        args.extend(["-ss".into(), secs(slow)]);
    }

    if let Some(v) = &choice.video_stream {
        args.extend(["-map".into(), format!("0:{}", v.index)]);
    }
    if let Some(a) = &choice.audio_stream {
        args.extend(["-map".into(), format!("0:{}", a.index)]);
    }

    let mut size = None;
    if let (Some(_), Some(vcodec)) = (&choice.video_stream, choice.vcodec) {
        if choice.copy_video {
            args.extend(["-c:v".into(), "copy".into()]);
        } else {
            let def = registry
                .codec(vcodec)
                .ok_or_else(|| Error::Config(format!("no definition for codec '{vcodec}'")))?;
            args.extend(["-c:v".into(), def.name.into()]);
            args.extend(def.options.iter().map(|o| o.to_string()));

            size = match (choice.quality, source.height) {
                (Some(q), Some(h)) if q != h => Some(TargetSize { height: q }),
                (Some(q), None) => Some(TargetSize { height: q }),
                _ => None,
            };
        }
    }

    if choice.audio_stream.is_some() {
        if choice.copy_audio {
            args.extend(["-c:a".into(), "copy".into()]);
        } else {
            let def = registry
                .codec(choice.acodec)
                .ok_or_else(|| Error::Config(format!("no definition for codec '{}'", choice.acodec)))?;
            args.extend(["-c:a".into(), def.name.into()]);
            args.extend(def.options.iter().map(|o| o.to_string()));

            if choice.media_type == MediaType::Audio {
                if let Some(q) = choice.quality.filter(|q| Some(*q) != source.bitrate) {
                    args.extend(["-b:a".into(), format!("{q}k")]);
                }
            }
        }
    }

    if choice.media_type == MediaType::Video && !choice.copy_video {
        let filters: Vec<String> = size
            .iter()
            .map(TargetSize::filter)
            .chain(source.filters.iter().cloned())
            .collect();
        if !filters.is_empty() {
            args.extend(["-vf".into(), filters.join(",")]);
        }
    }

    args.extend(source.options.iter().cloned());

    args.extend(["-f".into(), choice.container.format.into()]);
    args.extend(choice.container.muxer_options.iter().map(|o| o.to_string()));
    args.push("pipe:1".into());

    Ok(ProcessSpec {
        args,
        input,
        format: choice.container.format,
        mimetype: choice.container.mimetype,
        seek: plan,
        size,
    })
}
