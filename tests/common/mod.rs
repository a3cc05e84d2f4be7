//! Shared test harness for integration tests.
//!
//! [`TestHarness`] registers an in-memory `test` provider over a few fixture
//! files and starts Axum on a random port. A fake `ffmpeg` shell script,
//! written once per test binary, answers the capability queries, records
//! each file-input transcode next to the fixtures, and `cat`s its input.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use hs_av::ToolRegistry;
use hs_core::config::Config;
use hs_core::{Error, MediaSource, MediaType, SourceDescriptor, StreamInfo, StreamKind};
use hs_server::context::AppContext;
use hs_server::providers::{ProviderRegistry, ResourceProvider};
use hs_server::router::build_router;

const FAKE_FFMPEG: &str = r#"#!/bin/sh
case "$*" in
  *-version*)
    echo "ffmpeg version 6.1-test"
    exit 0 ;;
  *-formats*)
    cat <<'EOT'
File formats:
 D. = Demuxing supported
 .E = Muxing supported
 --
 DE adts            raw ADTS AAC (Advanced Audio Coding)
 DE flac            raw FLAC
 DE matroska,webm   Matroska / WebM
 DE mp3             MP3 (MPEG audio layer 3)
  E mp4             MP4 (MPEG-4 Part 14)
 DE ogg             Ogg
EOT
    exit 0 ;;
  *-encoders*)
    cat <<'EOT'
Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC (codec h264)
 V....D libvpx               libvpx VP8 (codec vp8)
 A....D aac                  AAC (Advanced Audio Coding)
 A....D libmp3lame           libmp3lame MP3 (MPEG audio layer 3) (codec mp3)
 A....D libvorbis            libvorbis (codec vorbis)
 A....D flac                 FLAC (Free Lossless Audio Codec)
EOT
    exit 0 ;;
  *-filters*)
    cat <<'EOT'
Filters:
  T.. = Timeline support
 ..C scale             V->V       Scale the input video size and/or convert the image format.
EOT
    exit 0 ;;
esac
prev=""
input=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then input="$arg"; fi
  prev="$arg"
done
if [ "$input" != "pipe:0" ]; then
  echo "$*" >> "$(dirname "$input")/../invocations.log"
fi
case "$input" in
  *endless*) exec yes streaming ;;
  *broken*) echo "Invalid data found when processing input" >&2; exit 1 ;;
  pipe:0) exec cat ;;
  *) exec cat "$input" ;;
esac
"#;

/// Cover image served for `song.flac`.
pub const COVER_JPEG: &[u8] = b"\xff\xd8\xff\xe0 cover";

/// Fixture bytes served by the fake ffmpeg for `song.mp3`.
pub fn mp3_bytes() -> Vec<u8> {
    let mut data = b"ID3\x04\x00\x00\x00\x00\x00\x00".to_vec();
    data.extend((0..64 * 1024).map(|i| (i % 251) as u8));
    data
}

pub fn flac_bytes() -> Vec<u8> {
    let mut data = b"fLaC".to_vec();
    data.extend((0..32 * 1024).map(|i| (i % 239) as u8));
    data
}

fn audio_stream(index: usize, codec: &str, bitrate: u32) -> StreamInfo {
    StreamInfo {
        index,
        kind: StreamKind::Audio,
        codec: codec.into(),
        bitrate: Some(bitrate),
        ..Default::default()
    }
}

/// Provider over the fixture directory with hand-written descriptors.
pub struct TestProvider {
    root: PathBuf,
}

impl TestProvider {
    fn audio(&self, file: &str, codec: &str, bitrate: u32, length: f64) -> SourceDescriptor {
        let mut desc = SourceDescriptor::new(MediaType::Audio, MediaSource::Path(self.root.join(file)));
        desc.container = file.rsplit('.').next().map(str::to_string);
        desc.streams = vec![audio_stream(0, codec, bitrate)];
        desc.bitrate = Some(bitrate);
        desc.length = Some(length);
        desc.title = Some("Song".into());
        desc.subtitle = Some("Artist - Album".into());
        desc
    }
}

#[async_trait]
impl ResourceProvider for TestProvider {
    async fn describe(&self, id: &str) -> hs_core::Result<Option<SourceDescriptor>> {
        let desc = match id {
            "song.mp3" => self.audio("song.mp3", "mp3", 320, 180.0),
            "song.flac" => {
                let mut desc = self.audio("song.flac", "flac", 900, 200.0);
                desc.cover = Some("art/cover.jpg".into());
                desc
            }
            "endless.mp3" => self.audio("endless.mp3", "mp3", 320, 3600.0),
            "broken.mp3" => self.audio("broken.mp3", "mp3", 320, 60.0),
            "piped.mp3" => {
                let mut desc = self.audio("song.mp3", "mp3", 320, 180.0);
                desc.source = MediaSource::Stream(Box::pin(std::io::Cursor::new(mp3_bytes())));
                desc
            }
            "film.mkv" => {
                let mut desc =
                    SourceDescriptor::new(MediaType::Video, MediaSource::Path(self.root.join("film.mkv")));
                desc.streams = vec![
                    StreamInfo {
                        index: 0,
                        kind: StreamKind::Video,
                        codec: "h264".into(),
                        profile: Some("High".into()),
                        level: Some(41),
                        width: Some(1920),
                        height: Some(1080),
                        bitrate: None,
                    },
                    audio_stream(1, "aac", 192),
                    audio_stream(2, "mp3", 128),
                ];
                desc.width = Some(1920);
                desc.height = Some(1080);
                desc.length = Some(5400.0);
                desc
            }
            "corrupt.mp3" => return Err(Error::Probe("moov atom not found".into())),
            "no-streams.mp3" => {
                SourceDescriptor::new(MediaType::Audio, MediaSource::Path(self.root.join("song.mp3")))
            }
            _ => return Ok(None),
        };
        Ok(Some(desc))
    }

    async fn cover(&self, cover: &str) -> hs_core::Result<Option<PathBuf>> {
        Ok((cover == "art/cover.jpg").then(|| self.root.join("art/cover.jpg")))
    }
}

/// A running server with a fake ffmpeg.
pub struct TestHarness {
    pub ctx: AppContext,
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    dir: tempfile::TempDir,
}

impl TestHarness {
    /// Server with capability discovery completed.
    pub async fn start() -> Self {
        Self::build(Config::default(), true).await
    }

    pub async fn with_config(config: Config) -> Self {
        Self::build(config, true).await
    }

    /// Server whose capability gate is still closed.
    pub async fn without_discovery() -> Self {
        Self::build(Config::default(), false).await
    }

    async fn build(config: Config, discover: bool) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let ffmpeg = fake_ffmpeg();

        let media = dir.path().join("media");
        std::fs::create_dir(&media).unwrap();
        std::fs::write(media.join("song.mp3"), mp3_bytes()).unwrap();
        std::fs::write(media.join("song.flac"), flac_bytes()).unwrap();
        std::fs::write(media.join("film.mkv"), b"\x1a\x45\xdf\xa3 matroska").unwrap();
        std::fs::write(media.join("endless.mp3"), b"").unwrap();
        std::fs::write(media.join("broken.mp3"), b"").unwrap();
        std::fs::create_dir(media.join("art")).unwrap();
        std::fs::write(media.join("art/cover.jpg"), COVER_JPEG).unwrap();

        let tools = Arc::new(ToolRegistry::with_paths(Some(ffmpeg), None));
        let mut providers = ProviderRegistry::new();
        providers.register("test", Arc::new(TestProvider { root: media }));

        let ctx = AppContext::new(config, Arc::clone(&tools), providers);
        if discover {
            assert!(ctx.gate.discover(&tools).await, "fake ffmpeg discovery failed");
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");
        let app = build_router(ctx.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            ctx,
            addr,
            client: reqwest::Client::new(),
            dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    pub async fn get_with_cookie(&self, path: &str, cookie: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .header("cookie", cookie)
            .send()
            .await
            .unwrap()
    }

    /// Declare client formats; returns the `name=value` cookie pair.
    pub async fn declare(&self, audio: &[&str], video: &[&str]) -> String {
        let resp = self
            .client
            .post(self.url("/stream/formats"))
            .json(&serde_json::json!({ "audio": audio, "video": video }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);
        let cookie = resp.headers()["set-cookie"].to_str().unwrap();
        cookie.split(';').next().unwrap().to_string()
    }

    /// Argument lines of every transcode the fake ffmpeg ran.
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("invocations.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn last_invocation(&self) -> String {
        self.invocations().pop().expect("ffmpeg was not invoked")
    }

    /// Wait until no session is tracked any more.
    pub async fn wait_idle(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !self.ctx.active.is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "sessions still active");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Path of the fake ffmpeg, written before any test spawns it.
fn fake_ffmpeg() -> PathBuf {
    static SCRIPT: OnceLock<(tempfile::TempDir, PathBuf)> = OnceLock::new();
    let (_, path) = SCRIPT.get_or_init(|| {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("ffmpeg");
        std::fs::write(&path, FAKE_FFMPEG).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        (dir, path)
    });
    path.clone()
}

/// True when `pid` no longer names a running process.
pub fn process_gone(pid: u64) -> bool {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).unwrap_or_default();
    stat.is_empty() || stat.contains(") Z")
}
