//! Composition model: what the caller asks to export.
//!
//! All types are plain immutable values built with fluent constructors and
//! validated as a whole by [`Composition::validate`] before export starts.

use serde::{Deserialize, Serialize};

use super::format::TrackType;
use crate::effects::{AudioEffect, VideoEffect};
use crate::error::ExportError;

/// Source window of a media item, in input-timeline microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClippingConfiguration {
    #[serde(default)]
    pub start_us: i64,
    /// Exclusive end; `None` clips to the end of the input
    #[serde(default)]
    pub end_us: Option<i64>,
    /// Promise that `start_us` lands on a video key frame
    #[serde(default)]
    pub starts_at_key_frame: bool,
}

impl ClippingConfiguration {
    pub fn between(start_us: i64, end_us: Option<i64>) -> Self {
        Self {
            start_us,
            end_us,
            starts_at_key_frame: false,
        }
    }
}

/// Input reference plus trim window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub uri: String,
    #[serde(default)]
    pub clipping: ClippingConfiguration,
}

impl MediaItem {
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            clipping: ClippingConfiguration::default(),
        }
    }

    pub fn with_clipping(mut self, clipping: ClippingConfiguration) -> Self {
        self.clipping = clipping;
        self
    }
}

/// Ordered audio and video effect chains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Effects {
    #[serde(default)]
    pub audio: Vec<AudioEffect>,
    #[serde(default)]
    pub video: Vec<VideoEffect>,
}

impl Effects {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_empty() && self.video.is_empty()
    }

    pub fn has_effects_for(&self, track_type: TrackType) -> bool {
        match track_type {
            TrackType::Audio => !self.audio.is_empty(),
            TrackType::Video => !self.video.is_empty(),
        }
    }

    /// Combined playback speed of the chain for one track type.
    pub fn speed(&self, track_type: TrackType) -> f64 {
        match track_type {
            TrackType::Audio => self
                .audio
                .iter()
                .filter_map(AudioEffect::speed)
                .product(),
            TrackType::Video => self
                .video
                .iter()
                .filter_map(VideoEffect::speed)
                .product(),
        }
    }
}

/// A media item with its edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditedMediaItem {
    pub media_item: MediaItem,
    #[serde(default)]
    pub effects: Effects,
    #[serde(default)]
    pub remove_audio: bool,
    #[serde(default)]
    pub remove_video: bool,
    /// Replace the item's audio with silence while keeping its duration
    #[serde(default)]
    pub mute_audio: bool,
    #[serde(default)]
    pub flatten_for_slow_motion: bool,
}

impl EditedMediaItem {
    pub fn new(media_item: MediaItem) -> Self {
        Self {
            media_item,
            effects: Effects::default(),
            remove_audio: false,
            remove_video: false,
            mute_audio: false,
            flatten_for_slow_motion: false,
        }
    }

    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self::new(MediaItem::from_uri(uri))
    }

    pub fn with_effects(mut self, effects: Effects) -> Self {
        self.effects = effects;
        self
    }

    pub fn with_remove_audio(mut self, remove: bool) -> Self {
        self.remove_audio = remove;
        self
    }

    pub fn with_remove_video(mut self, remove: bool) -> Self {
        self.remove_video = remove;
        self
    }

    pub fn with_mute_audio(mut self, mute: bool) -> Self {
        self.mute_audio = mute;
        self
    }

    pub fn with_flatten_for_slow_motion(mut self, flatten: bool) -> Self {
        self.flatten_for_slow_motion = flatten;
        self
    }

    pub fn uri(&self) -> &str {
        &self.media_item.uri
    }

    pub fn clipping(&self) -> &ClippingConfiguration {
        &self.media_item.clipping
    }

    pub fn is_removed(&self, track_type: TrackType) -> bool {
        match track_type {
            TrackType::Audio => self.remove_audio,
            TrackType::Video => self.remove_video,
        }
    }

    /// Playback speed applied to the item's timeline.
    pub fn speed(&self) -> f64 {
        if self.remove_video {
            self.effects.speed(TrackType::Audio)
        } else {
            self.effects.speed(TrackType::Video)
        }
    }

    /// Output-timeline duration of `input_duration_us` of this item.
    pub fn timeline_duration_us(&self, input_duration_us: i64) -> i64 {
        (input_duration_us as f64 / self.speed()).round() as i64
    }

    /// Input-timeline offset reached after `timeline_us` of output.
    pub fn input_offset_us(&self, timeline_us: i64) -> i64 {
        (timeline_us as f64 * self.speed()).round() as i64
    }

    fn validate(&self, sequence: usize, index: usize) -> Result<(), ExportError> {
        let at = format!("sequence {sequence} item {index}");
        if self.media_item.uri.is_empty() {
            return Err(ExportError::invalid_composition(format!("{at}: empty URI")));
        }
        let clipping = &self.media_item.clipping;
        if clipping.start_us < 0 {
            return Err(ExportError::invalid_composition(format!(
                "{at}: negative clip start"
            )));
        }
        if let Some(end) = clipping.end_us
            && end <= clipping.start_us
        {
            return Err(ExportError::invalid_composition(format!(
                "{at}: clip end {end} is not after clip start {}",
                clipping.start_us
            )));
        }
        if self.remove_audio && self.remove_video {
            return Err(ExportError::invalid_composition(format!(
                "{at}: both audio and video are removed"
            )));
        }
        for effect in &self.effects.video {
            effect.validate()?;
        }
        for effect in &self.effects.audio {
            effect.validate()?;
        }
        if !self.remove_audio && !self.remove_video {
            let audio = self.effects.speed(TrackType::Audio);
            let video = self.effects.speed(TrackType::Video);
            if (audio - video).abs() > f64::EPSILON {
                return Err(ExportError::invalid_composition(format!(
                    "{at}: audio speed {audio} differs from video speed {video}"
                )));
            }
        }
        Ok(())
    }
}

/// Items concatenated on one timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditedMediaItemSequence {
    pub items: Vec<EditedMediaItem>,
}

impl EditedMediaItemSequence {
    pub fn new(items: Vec<EditedMediaItem>) -> Self {
        Self { items }
    }

    pub fn single(item: EditedMediaItem) -> Self {
        Self { items: vec![item] }
    }
}

/// How HDR inputs are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HdrMode {
    /// Keep the HDR transfer function end to end
    #[default]
    KeepHdr,
    /// Tone-map to SDR in the frame processor
    ToneMapUsingOpenGl,
    /// Ask the decoder to output tone-mapped SDR frames
    ToneMapUsingMediaCodec,
    /// Treat HDR samples as SDR without conversion
    ForceInterpretHdrAsSdr,
}

impl std::fmt::Display for HdrMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HdrMode::KeepHdr => "KEEP_HDR",
            HdrMode::ToneMapUsingOpenGl => "TONE_MAP_USING_OPEN_GL",
            HdrMode::ToneMapUsingMediaCodec => "TONE_MAP_USING_MEDIACODEC",
            HdrMode::ForceInterpretHdrAsSdr => "FORCE_INTERPRET_HDR_AS_SDR",
        };
        f.write_str(name)
    }
}

/// Top-level export request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    pub sequences: Vec<EditedMediaItemSequence>,
    #[serde(default)]
    pub hdr_mode: HdrMode,
    /// Effects applied to every item after its own chain
    #[serde(default)]
    pub effects: Effects,
    /// Sequence whose duration defines the output duration
    #[serde(default)]
    pub primary_sequence: usize,
    /// Explicit output duration, overriding the primary sequence
    #[serde(default)]
    pub duration_us: Option<i64>,
}

impl Composition {
    pub fn new(sequences: Vec<EditedMediaItemSequence>) -> Self {
        Self {
            sequences,
            hdr_mode: HdrMode::default(),
            effects: Effects::default(),
            primary_sequence: 0,
            duration_us: None,
        }
    }

    /// Composition of a single item.
    pub fn single(item: EditedMediaItem) -> Self {
        Self::new(vec![EditedMediaItemSequence::single(item)])
    }

    pub fn with_hdr_mode(mut self, hdr_mode: HdrMode) -> Self {
        self.hdr_mode = hdr_mode;
        self
    }

    pub fn with_effects(mut self, effects: Effects) -> Self {
        self.effects = effects;
        self
    }

    pub fn with_primary_sequence(mut self, index: usize) -> Self {
        self.primary_sequence = index;
        self
    }

    pub fn with_duration_us(mut self, duration_us: i64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }

    /// Structural validation that needs no access to the inputs.
    ///
    /// # Errors
    /// - `ErrorCode::InvalidComposition` - Empty sequences, bad clipping,
    ///   invalid effect parameters or an out-of-range primary sequence
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.sequences.is_empty() {
            return Err(ExportError::invalid_composition("composition has no sequences"));
        }
        if self.primary_sequence >= self.sequences.len() {
            return Err(ExportError::invalid_composition(format!(
                "primary sequence {} out of range ({} sequences)",
                self.primary_sequence,
                self.sequences.len()
            )));
        }
        if let Some(duration) = self.duration_us
            && duration <= 0
        {
            return Err(ExportError::invalid_composition(
                "explicit duration must be positive",
            ));
        }
        for effect in &self.effects.video {
            effect.validate()?;
            if effect.speed().is_some() {
                return Err(ExportError::invalid_composition(
                    "speed changes are only supported per item",
                ));
            }
        }
        for effect in &self.effects.audio {
            effect.validate()?;
            if effect.speed().is_some() {
                return Err(ExportError::invalid_composition(
                    "speed changes are only supported per item",
                ));
            }
        }
        for (s, sequence) in self.sequences.iter().enumerate() {
            if sequence.items.is_empty() {
                return Err(ExportError::invalid_composition(format!(
                    "sequence {s} has no items"
                )));
            }
            for (i, item) in sequence.items.iter().enumerate() {
                item.validate(s, i)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_validate_rejects_inverted_clip() {
        let item = EditedMediaItem::new(
            MediaItem::from_uri("synthetic://clip")
                .with_clipping(ClippingConfiguration::between(2_000_000, Some(1_000_000))),
        );
        let error = Composition::single(item).validate().unwrap_err();
        assert_eq!(error.code, ErrorCode::InvalidComposition);
    }

    #[test]
    fn test_validate_rejects_missing_primary() {
        let composition = Composition::single(EditedMediaItem::from_uri("synthetic://clip"))
            .with_primary_sequence(3);
        assert!(composition.validate().is_err());
    }

    #[test]
    fn test_mismatched_speeds_are_rejected() {
        let item = EditedMediaItem::from_uri("synthetic://clip").with_effects(Effects {
            audio: vec![],
            video: vec![VideoEffect::SpeedChange { speed: 2.0 }],
        });
        assert!(Composition::single(item.clone()).validate().is_err());

        let video_only = item.with_remove_audio(true);
        assert!(Composition::single(video_only.clone()).validate().is_ok());
        assert_eq!(video_only.timeline_duration_us(4_000_000), 2_000_000);
        assert_eq!(video_only.input_offset_us(1_000_000), 2_000_000);
    }

    #[test]
    fn test_composition_deserializes_with_defaults() {
        let json = r#"{
            "sequences": [
                {"items": [{"media_item": {"uri": "synthetic://clip?duration_ms=1000"}}]}
            ],
            "hdr_mode": "tone_map_using_open_gl"
        }"#;
        let composition: Composition = serde_json::from_str(json).unwrap();
        assert_eq!(composition.hdr_mode, HdrMode::ToneMapUsingOpenGl);
        assert_eq!(composition.primary_sequence, 0);
        assert!(composition.sequences[0].items[0].effects.is_empty());
    }
}
