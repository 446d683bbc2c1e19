//! Media probing with ffprobe
//!
//! Produces a [`QualityProfile`] for duplicate resolution. Every failure mode
//! (binary missing, non-zero exit, timeout, unreadable JSON, no video stream)
//! collapses to `None`; callers treat that as "quality unknown".

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use super::quality_evaluator::{QualityProfile, audio_codec_rank};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Anything that can describe a media file's technical quality
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn analyze(&self, path: &Path) -> Option<QualityProfile>;
}

/// ffprobe JSON output (subset)
mod ffprobe {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub format: Option<Format>,
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub bit_rate: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_name: Option<String>,
        pub codec_type: Option<String>,
        pub profile: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub channels: Option<u32>,
        pub bit_rate: Option<String>,
    }
}

/// Runs the ffprobe binary under a timeout
pub struct FfprobeAnalyzer {
    ffprobe_path: PathBuf,
    timeout: Duration,
}

impl FfprobeAnalyzer {
    pub fn new(ffprobe_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
            timeout,
        }
    }

    /// Check if ffprobe can be executed at all
    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffprobe_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn probe(&self, path: &Path) -> Result<QualityProfile> {
        let child = Command::new(&self.ffprobe_path)
            .args(["-v", "error"])
            .args(["-print_format", "json"])
            .args(["-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .with_context(|| format!("ffprobe timed out after {:?}", self.timeout))?
            .with_context(|| format!("Failed to execute {}", self.ffprobe_path.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "ffprobe exited with {}: {}",
                output.status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".into()),
                stderr.trim()
            );
        }

        parse_profile(&output.stdout)
    }
}

impl Default for FfprobeAnalyzer {
    fn default() -> Self {
        Self::new("ffprobe", DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl MediaProbe for FfprobeAnalyzer {
    async fn analyze(&self, path: &Path) -> Option<QualityProfile> {
        match self.probe(path).await {
            Ok(profile) => {
                debug!(path = %path.display(), profile = ?profile, "Probed media file");
                Some(profile)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Quality probe unavailable");
                None
            }
        }
    }
}

/// Build a profile from raw ffprobe JSON
pub fn parse_profile(json: &[u8]) -> Result<QualityProfile> {
    let output: ffprobe::FfprobeOutput =
        serde_json::from_slice(json).context("Malformed ffprobe output")?;
    let streams = output.streams.unwrap_or_default();

    let video = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .context("No video stream")?;

    let audio = streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("audio"))
        .max_by_key(|s| {
            let codec = audio_codec_label(s);
            (s.channels.unwrap_or(0), audio_codec_rank(&codec))
        });

    let subtitle_count = streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("subtitle"))
        .count() as u32;

    let bitrate_bps = output
        .format
        .as_ref()
        .and_then(|f| f.bit_rate.as_deref())
        .and_then(|b| b.parse::<u64>().ok())
        .or_else(|| video.bit_rate.as_deref().and_then(|b| b.parse().ok()))
        .unwrap_or(0);

    Ok(QualityProfile {
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        bitrate_bps,
        video_codec: video.codec_name.clone().unwrap_or_default().to_lowercase(),
        audio_codec: audio.map(audio_codec_label).unwrap_or_default(),
        audio_channels: audio.and_then(|a| a.channels).unwrap_or(0),
        subtitle_count,
    })
}

/// ffprobe reports DTS-HD MA as codec "dts" with a profile
fn audio_codec_label(stream: &ffprobe::Stream) -> String {
    let codec = stream.codec_name.clone().unwrap_or_default().to_lowercase();
    match (codec.as_str(), stream.profile.as_deref()) {
        ("dts", Some(p)) if p.to_uppercase().contains("HD") => "dts-hd".to_string(),
        _ => codec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "HEVC", "width": 3840, "height": 2160},
            {"index": 1, "codec_type": "audio", "codec_name": "aac", "channels": 6},
            {"index": 2, "codec_type": "audio", "codec_name": "dts", "profile": "DTS-HD MA", "channels": 6},
            {"index": 3, "codec_type": "audio", "codec_name": "ac3", "channels": 2},
            {"index": 4, "codec_type": "subtitle", "codec_name": "subrip"},
            {"index": 5, "codec_type": "subtitle", "codec_name": "hdmv_pgs_subtitle"}
        ],
        "format": {"bit_rate": "18500000"}
    }"#;

    #[test]
    fn test_parse_profile() {
        let profile = parse_profile(SAMPLE.as_bytes()).unwrap();
        assert_eq!(
            profile,
            QualityProfile {
                width: 3840,
                height: 2160,
                bitrate_bps: 18_500_000,
                video_codec: "hevc".into(),
                audio_codec: "dts-hd".into(),
                audio_channels: 6,
                subtitle_count: 2,
            }
        );
    }

    #[test]
    fn test_bitrate_falls_back_to_video_stream() {
        let json = r#"{"streams": [{"codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720, "bit_rate": "4000000"}]}"#;
        let profile = parse_profile(json.as_bytes()).unwrap();
        assert_eq!(profile.bitrate_bps, 4_000_000);
        assert_eq!(profile.audio_channels, 0);
        assert_eq!(profile.audio_codec, "");
    }

    #[test]
    fn test_no_video_stream_is_an_error() {
        let json = r#"{"streams": [{"codec_type": "audio", "codec_name": "flac", "channels": 2}]}"#;
        assert!(parse_profile(json.as_bytes()).is_err());
        assert!(parse_profile(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let analyzer = FfprobeAnalyzer::new("/nonexistent/ffprobe", Duration::from_secs(1));
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.mkv");
        std::fs::write(&file, b"x").unwrap();

        assert!(!analyzer.is_available().await);
        assert!(analyzer.analyze(&file).await.is_none());
    }
}
