//! Track formats and colour descriptions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// MIME types understood by the pipeline.
pub mod mime {
    pub const VIDEO_H264: &str = "video/avc";
    pub const VIDEO_H265: &str = "video/hevc";
    pub const VIDEO_AV1: &str = "video/av01";
    pub const VIDEO_VP9: &str = "video/x-vnd.on2.vp9";
    pub const AUDIO_AAC: &str = "audio/mp4a-latm";
    pub const AUDIO_OPUS: &str = "audio/opus";
    pub const AUDIO_RAW: &str = "audio/raw";
    pub const VIDEO_RAW: &str = "video/raw";

    /// Returns whether the MIME type names a video format.
    pub fn is_video(mime: &str) -> bool {
        mime.starts_with("video/")
    }

    /// Returns whether the MIME type names an audio format.
    pub fn is_audio(mime: &str) -> bool {
        mime.starts_with("audio/")
    }
}

/// Kind of elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    Audio,
    Video,
}

impl TrackType {
    pub const ALL: [TrackType; 2] = [TrackType::Audio, TrackType::Video];

    /// Track type implied by a MIME type.
    pub fn of_mime(mime: &str) -> Option<TrackType> {
        if mime::is_video(mime) {
            Some(TrackType::Video)
        } else if mime::is_audio(mime) {
            Some(TrackType::Audio)
        } else {
            None
        }
    }
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackType::Audio => write!(f, "audio"),
            TrackType::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    Bt601,
    Bt709,
    Bt2020,
}

/// Transfer function of a video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorTransfer {
    /// SMPTE 170M / BT.709 SDR curve
    Sdr,
    /// Gamma 2.2, produced by GPU tone-mapping
    Gamma22,
    /// SMPTE ST 2084
    Pq,
    /// ARIB STD-B67
    Hlg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorRange {
    Limited,
    Full,
}

/// Colour description of a video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorInfo {
    pub space: ColorSpace,
    pub transfer: ColorTransfer,
    pub range: ColorRange,
}

impl ColorInfo {
    /// Default colour assumed for SDR inputs.
    pub const SDR_BT709_LIMITED: ColorInfo = ColorInfo {
        space: ColorSpace::Bt709,
        transfer: ColorTransfer::Sdr,
        range: ColorRange::Limited,
    };

    /// Colour of frames produced by HDR tone-mapping.
    pub const SDR_BT709_GAMMA22: ColorInfo = ColorInfo {
        space: ColorSpace::Bt709,
        transfer: ColorTransfer::Gamma22,
        range: ColorRange::Limited,
    };

    pub const HDR10_PQ: ColorInfo = ColorInfo {
        space: ColorSpace::Bt2020,
        transfer: ColorTransfer::Pq,
        range: ColorRange::Limited,
    };

    pub const HLG: ColorInfo = ColorInfo {
        space: ColorSpace::Bt2020,
        transfer: ColorTransfer::Hlg,
        range: ColorRange::Limited,
    };

    pub fn is_transfer_hdr(&self) -> bool {
        matches!(self.transfer, ColorTransfer::Pq | ColorTransfer::Hlg)
    }
}

impl Default for ColorInfo {
    fn default() -> Self {
        ColorInfo::SDR_BT709_LIMITED
    }
}

/// Slow-motion section recorded at a higher capture rate.
///
/// Flattening stretches the section by `speed_divisor` so it plays back
/// slowed down at the nominal frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowMotionSegment {
    pub start_us: i64,
    pub end_us: i64,
    pub speed_divisor: u32,
}

/// Description of one elementary stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackFormat {
    pub mime: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub frame_rate: f32,
    #[serde(default)]
    pub rotation_degrees: u32,
    #[serde(default)]
    pub color: Option<ColorInfo>,
    #[serde(default)]
    pub sample_rate: u32,
    #[serde(default)]
    pub channel_count: u16,
    #[serde(default)]
    pub average_bitrate: Option<u32>,
    #[serde(default)]
    pub duration_us: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slow_motion_segments: Vec<SlowMotionSegment>,
}

impl TrackFormat {
    pub fn video(mime: &str, width: u32, height: u32, frame_rate: f32) -> Self {
        Self {
            mime: mime.to_string(),
            width,
            height,
            frame_rate,
            rotation_degrees: 0,
            color: Some(ColorInfo::SDR_BT709_LIMITED),
            sample_rate: 0,
            channel_count: 0,
            average_bitrate: None,
            duration_us: None,
            slow_motion_segments: Vec::new(),
        }
    }

    pub fn audio(mime: &str, sample_rate: u32, channel_count: u16) -> Self {
        Self {
            mime: mime.to_string(),
            width: 0,
            height: 0,
            frame_rate: 0.0,
            rotation_degrees: 0,
            color: None,
            sample_rate,
            channel_count,
            average_bitrate: None,
            duration_us: None,
            slow_motion_segments: Vec::new(),
        }
    }

    pub fn with_color(mut self, color: ColorInfo) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.average_bitrate = Some(bitrate);
        self
    }

    pub fn track_type(&self) -> Option<TrackType> {
        TrackType::of_mime(&self.mime)
    }

    /// Colour of the stream, defaulting to SDR BT.709 when unspecified.
    pub fn color_or_default(&self) -> ColorInfo {
        self.color.unwrap_or_default()
    }

    pub fn is_hdr(&self) -> bool {
        self.color.is_some_and(|c| c.is_transfer_hdr())
    }

    /// Whether samples of `other` can be appended to a track of this format.
    pub fn is_append_compatible(&self, other: &TrackFormat) -> bool {
        if self.mime != other.mime {
            return false;
        }
        match self.track_type() {
            Some(TrackType::Video) => {
                self.width == other.width
                    && self.height == other.height
                    && self.color_or_default() == other.color_or_default()
            }
            Some(TrackType::Audio) => {
                self.sample_rate == other.sample_rate && self.channel_count == other.channel_count
            }
            None => false,
        }
    }
}

impl fmt::Display for TrackFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.track_type() {
            Some(TrackType::Video) => write!(
                f,
                "{} {}x{}@{:.2}",
                self.mime, self.width, self.height, self.frame_rate
            ),
            Some(TrackType::Audio) => write!(
                f,
                "{} {}Hz/{}ch",
                self.mime, self.sample_rate, self.channel_count
            ),
            None => write!(f, "{}", self.mime),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_type_from_mime() {
        assert_eq!(TrackType::of_mime(mime::VIDEO_H265), Some(TrackType::Video));
        assert_eq!(TrackType::of_mime(mime::AUDIO_AAC), Some(TrackType::Audio));
        assert_eq!(TrackType::of_mime("text/vtt"), None);
    }

    #[test]
    fn test_append_compatibility() {
        let base = TrackFormat::video(mime::VIDEO_H264, 1280, 720, 30.0);
        assert!(base.is_append_compatible(&base.clone()));

        let resized = TrackFormat::video(mime::VIDEO_H264, 640, 360, 30.0);
        assert!(!base.is_append_compatible(&resized));

        let hdr = base.clone().with_color(ColorInfo::HDR10_PQ);
        assert!(!base.is_append_compatible(&hdr));
        assert!(hdr.is_hdr());
    }
}
