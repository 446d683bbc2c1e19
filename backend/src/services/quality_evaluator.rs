//! Quality comparison for duplicate resolution
//!
//! Two files for the same catalog slot are ranked by a user-ordered list of
//! factors. Factors are checked from the highest weight down and the first
//! one that differs decides. A complete tie keeps the existing file.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Technical description of a media file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityProfile {
    pub width: u32,
    pub height: u32,
    pub bitrate_bps: u64,
    /// Lowercase ffprobe codec name, e.g. "hevc"
    pub video_codec: String,
    /// Lowercase codec of the best audio stream, e.g. "eac3" or "dts-hd"
    pub audio_codec: String,
    pub audio_channels: u32,
    pub subtitle_count: u32,
}

impl QualityProfile {
    pub fn resolution_area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Short label for logs, e.g. "1920x1080 hevc"
    pub fn summary(&self) -> String {
        format!("{}x{} {}", self.width, self.height, self.video_codec)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFactor {
    Resolution,
    Bitrate,
    VideoCodec,
    AudioCodec,
    AudioChannels,
    Subtitles,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityPriority {
    pub factor: QualityFactor,
    pub weight: u32,
}

/// Outcome of comparing an incoming file against the one already in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    NewBetter,
    ExistingBetter,
    Equal,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::NewBetter => "new_better",
            Comparison::ExistingBetter => "existing_better",
            Comparison::Equal => "equal",
        }
    }
}

pub fn default_priorities() -> Vec<QualityPriority> {
    use QualityFactor::*;
    [
        (Resolution, 100),
        (VideoCodec, 80),
        (Bitrate, 60),
        (AudioChannels, 40),
        (AudioCodec, 30),
        (Subtitles, 10),
    ]
    .into_iter()
    .map(|(factor, weight)| QualityPriority { factor, weight })
    .collect()
}

/// Video codec efficiency rank; unknown codecs rank lowest
pub fn video_codec_rank(codec: &str) -> u8 {
    match codec.to_lowercase().as_str() {
        "av1" => 6,
        "hevc" | "h265" | "x265" => 5,
        "vp9" => 4,
        "h264" | "avc" | "x264" => 3,
        "mpeg4" | "xvid" | "divx" => 2,
        "mpeg2video" | "vc1" => 1,
        _ => 0,
    }
}

/// Audio codec quality rank; unknown codecs rank lowest
pub fn audio_codec_rank(codec: &str) -> u8 {
    match codec.to_lowercase().as_str() {
        "truehd" => 10,
        "dts-hd" | "dts_hd_ma" | "dts-hd ma" => 9,
        "dts" => 8,
        "eac3" => 7,
        "ac3" => 6,
        "flac" => 5,
        "aac" => 4,
        "opus" => 3,
        "vorbis" => 2,
        "mp3" => 1,
        _ => 0,
    }
}

fn compare_factor(factor: QualityFactor, existing: &QualityProfile, new: &QualityProfile) -> Ordering {
    match factor {
        QualityFactor::Resolution => new.resolution_area().cmp(&existing.resolution_area()),
        QualityFactor::Bitrate => new.bitrate_bps.cmp(&existing.bitrate_bps),
        QualityFactor::VideoCodec => {
            video_codec_rank(&new.video_codec).cmp(&video_codec_rank(&existing.video_codec))
        }
        QualityFactor::AudioCodec => {
            audio_codec_rank(&new.audio_codec).cmp(&audio_codec_rank(&existing.audio_codec))
        }
        QualityFactor::AudioChannels => new.audio_channels.cmp(&existing.audio_channels),
        QualityFactor::Subtitles => new.subtitle_count.cmp(&existing.subtitle_count),
    }
}

/// Rank `new` against `existing` using `priorities`
pub fn compare(existing: &QualityProfile, new: &QualityProfile, priorities: &[QualityPriority]) -> Comparison {
    let mut ordered = priorities.to_vec();
    // Stable, so equal weights keep their configured order
    ordered.sort_by(|a, b| b.weight.cmp(&a.weight));

    for p in &ordered {
        match compare_factor(p.factor, existing, new) {
            Ordering::Greater => {
                debug!(factor = ?p.factor, "New file wins on quality");
                return Comparison::NewBetter;
            }
            Ordering::Less => {
                debug!(factor = ?p.factor, "Existing file wins on quality");
                return Comparison::ExistingBetter;
            }
            Ordering::Equal => {}
        }
    }

    Comparison::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn profile(width: u32, height: u32, codec: &str, bitrate: u64) -> QualityProfile {
        QualityProfile {
            width,
            height,
            bitrate_bps: bitrate,
            video_codec: codec.to_string(),
            audio_codec: "aac".to_string(),
            audio_channels: 2,
            subtitle_count: 0,
        }
    }

    fn inverse(c: Comparison) -> Comparison {
        match c {
            Comparison::NewBetter => Comparison::ExistingBetter,
            Comparison::ExistingBetter => Comparison::NewBetter,
            Comparison::Equal => Comparison::Equal,
        }
    }

    #[test]
    fn test_resolution_first_by_default() {
        let hd = profile(1280, 720, "hevc", 9_000_000);
        let fhd = profile(1920, 1080, "h264", 4_000_000);
        assert_eq!(compare(&hd, &fhd, &default_priorities()), Comparison::NewBetter);
        assert_eq!(compare(&fhd, &hd, &default_priorities()), Comparison::ExistingBetter);
    }

    #[test]
    fn test_weights_reorder_factors() {
        let hd = profile(1280, 720, "hevc", 9_000_000);
        let fhd = profile(1920, 1080, "h264", 4_000_000);
        let bitrate_first = vec![
            QualityPriority { factor: QualityFactor::Resolution, weight: 10 },
            QualityPriority { factor: QualityFactor::Bitrate, weight: 90 },
        ];
        assert_eq!(compare(&hd, &fhd, &bitrate_first), Comparison::ExistingBetter);
    }

    #[test]
    fn test_identical_profiles_are_equal_for_any_priorities() {
        let a = profile(1920, 1080, "h264", 5_000_000);
        assert_eq!(compare(&a, &a.clone(), &default_priorities()), Comparison::Equal);
        assert_eq!(compare(&a, &a.clone(), &[]), Comparison::Equal);
    }

    #[test]
    fn test_compare_is_antisymmetric() {
        let profiles = [
            profile(1920, 1080, "h264", 5_000_000),
            profile(1920, 1080, "hevc", 5_000_000),
            profile(1280, 720, "av1", 2_000_000),
            QualityProfile { audio_channels: 6, ..profile(1920, 1080, "h264", 5_000_000) },
            QualityProfile { subtitle_count: 3, ..profile(1920, 1080, "h264", 5_000_000) },
            QualityProfile { audio_codec: "truehd".into(), ..profile(1920, 1080, "h264", 5_000_000) },
        ];
        let priority_sets = [
            default_priorities(),
            vec![QualityPriority { factor: QualityFactor::Subtitles, weight: 1 }],
            vec![
                QualityPriority { factor: QualityFactor::AudioCodec, weight: 50 },
                QualityPriority { factor: QualityFactor::VideoCodec, weight: 50 },
            ],
        ];

        for p in &priority_sets {
            for a in &profiles {
                for b in &profiles {
                    assert_eq!(compare(a, b, p), inverse(compare(b, a, p)));
                }
            }
        }
    }

    #[test]
    fn test_ties_keep_existing() {
        // Differ only on a factor that is not prioritised
        let a = profile(1920, 1080, "h264", 5_000_000);
        let b = QualityProfile { subtitle_count: 4, ..a.clone() };
        let only_resolution = vec![QualityPriority { factor: QualityFactor::Resolution, weight: 1 }];
        assert_eq!(compare(&a, &b, &only_resolution), Comparison::Equal);
    }

    #[test]
    fn test_codec_ranks() {
        assert!(video_codec_rank("av1") > video_codec_rank("hevc"));
        assert!(video_codec_rank("HEVC") > video_codec_rank("h264"));
        assert!(audio_codec_rank("truehd") > audio_codec_rank("dts-hd"));
        assert!(audio_codec_rank("eac3") > audio_codec_rank("aac"));
        assert_eq!(audio_codec_rank("pcm_s16le"), 0);
    }

    #[test]
    fn test_priorities_deserialize_from_settings_json() {
        let json = r#"[{"factor":"bitrate","weight":5},{"factor":"audio_channels","weight":9}]"#;
        let parsed: Vec<QualityPriority> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed[1].factor, QualityFactor::AudioChannels);
    }
}
