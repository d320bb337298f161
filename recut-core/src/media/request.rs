//! Requested output settings and the fallback comparison unit.

use serde::{Deserialize, Serialize};

use super::composition::HdrMode;

/// Output settings that fallback may alter.
///
/// `None` fields mean "whatever the input implies". A fallback is reported
/// whenever the finalized request differs from the one derived from the
/// caller's settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransformationRequest {
    pub audio_mime: Option<String>,
    pub video_mime: Option<String>,
    pub output_height: Option<u32>,
    pub hdr_mode: HdrMode,
}

impl TransformationRequest {
    pub fn with_audio_mime(mut self, mime: impl Into<String>) -> Self {
        self.audio_mime = Some(mime.into());
        self
    }

    pub fn with_video_mime(mut self, mime: impl Into<String>) -> Self {
        self.video_mime = Some(mime.into());
        self
    }

    pub fn with_output_height(mut self, height: u32) -> Self {
        self.output_height = Some(height);
        self
    }

    pub fn with_hdr_mode(mut self, hdr_mode: HdrMode) -> Self {
        self.hdr_mode = hdr_mode;
        self
    }
}

impl std::fmt::Display for TransformationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "audio={} video={} height={} hdr={}",
            self.audio_mime.as_deref().unwrap_or("auto"),
            self.video_mime.as_deref().unwrap_or("auto"),
            self.output_height
                .map(|h| h.to_string())
                .unwrap_or_else(|| "auto".to_string()),
            self.hdr_mode
        )
    }
}

/// Rate control requested from video encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitrateMode {
    #[default]
    Vbr,
    Cbr,
}

/// Optional video encoder tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoEncoderSettings {
    pub bitrate: Option<u32>,
    #[serde(default)]
    pub bitrate_mode: BitrateMode,
    /// (profile, level) pair
    pub profile_level: Option<(u32, u32)>,
}

impl VideoEncoderSettings {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}
