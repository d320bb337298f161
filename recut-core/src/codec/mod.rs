//! Platform codec seam.
//!
//! Decoders and encoders are external collaborators. The pipeline drives them
//! through [`Codec`]: inputs are offered with [`Codec::try_queue_input`], which
//! hands the input back when every input slot is busy, and outputs are polled
//! with [`Codec::dequeue_output`]. Whenever a slot frees up or an output
//! becomes available the codec signals its readiness [`Notify`], so stages
//! wait for codec callbacks instead of spinning.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::CodecError;
use crate::media::{BitrateMode, ColorTransfer, EncodedSample, RawFrame, TrackFormat, TrackType};

/// Outcome of offering an input to a codec.
#[derive(Debug)]
pub enum QueueResult<T> {
    Queued,
    /// No input slot available; the input is handed back
    Full(T),
}

/// Asynchronous, callback-driven codec.
pub trait Codec: Send {
    type Input: Send;
    type Output: Send;

    /// Platform name of the codec, reported in export results.
    fn name(&self) -> &str;

    /// Format the codec was configured to produce.
    fn output_format(&self) -> &TrackFormat;

    /// Notified whenever an input slot frees up or an output is ready.
    fn readiness(&self) -> Arc<Notify>;

    fn try_queue_input(
        &mut self,
        input: Self::Input,
    ) -> Result<QueueResult<Self::Input>, CodecError>;

    fn signal_end_of_input(&mut self) -> Result<(), CodecError>;

    fn dequeue_output(&mut self) -> Result<Option<Self::Output>, CodecError>;

    /// True once the end-of-stream output has been dequeued.
    fn is_ended(&self) -> bool;

    fn release(&mut self);
}

pub type Decoder = dyn Codec<Input = EncodedSample, Output = RawFrame>;
pub type Encoder = dyn Codec<Input = RawFrame, Output = EncodedSample>;

/// Capabilities of one platform encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderInfo {
    pub name: String,
    pub mime: String,
    pub hardware_accelerated: bool,
    /// Inclusive supported width range
    pub width_range: (u32, u32),
    pub height_range: (u32, u32),
    pub width_alignment: u32,
    pub height_alignment: u32,
    /// Inclusive supported bitrate range in bits per second
    pub bitrate_range: (u32, u32),
    pub bitrate_modes: Vec<BitrateMode>,
    /// Supported (profile, level) pairs; empty accepts the default only
    pub profile_levels: Vec<(u32, u32)>,
    /// HDR transfer functions the encoder can keep while editing
    pub hdr_editing_transfers: Vec<ColorTransfer>,
    pub max_sample_rate: u32,
    pub max_channels: u16,
}

impl EncoderInfo {
    pub fn track_type(&self) -> Option<TrackType> {
        TrackType::of_mime(&self.mime)
    }

    pub fn supports_size(&self, width: u32, height: u32) -> bool {
        (self.width_range.0..=self.width_range.1).contains(&width)
            && (self.height_range.0..=self.height_range.1).contains(&height)
            && width % self.width_alignment.max(1) == 0
            && height % self.height_alignment.max(1) == 0
    }

    pub fn supports_hdr_editing(&self, transfer: ColorTransfer) -> bool {
        self.hdr_editing_transfers.contains(&transfer)
    }

    pub fn clamp_bitrate(&self, bitrate: u32) -> u32 {
        bitrate.clamp(self.bitrate_range.0, self.bitrate_range.1)
    }
}

/// Capabilities of one platform decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderInfo {
    pub name: String,
    pub mime: String,
    pub hardware_accelerated: bool,
    /// HDR transfer functions the decoder can output
    pub hdr_transfers: Vec<ColorTransfer>,
    /// Whether the decoder can tone-map HDR content to SDR itself
    pub supports_tone_mapping: bool,
}

/// Options for opening a decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Ask the decoder to output SDR frames from HDR input
    pub tone_map_to_sdr: bool,
}

/// Fully resolved encoder configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSpec {
    /// Output format: MIME, geometry/colour or sample rate/channels, bitrate
    pub format: TrackFormat,
    pub bitrate_mode: BitrateMode,
    pub profile_level: Option<(u32, u32)>,
    pub i_frame_interval_us: i64,
}

/// Device codec catalogue and factory.
pub trait CodecPlatform: Send + Sync {
    fn encoder_infos(&self) -> Vec<EncoderInfo>;

    fn decoder_infos(&self) -> Vec<DecoderInfo>;

    /// Opens a decoder for `format`.
    ///
    /// # Errors
    /// - `CodecError::ConfigurationFailed` - The decoder rejected the format
    fn open_decoder(
        &self,
        info: &DecoderInfo,
        format: &TrackFormat,
        options: DecoderOptions,
    ) -> Result<Box<Decoder>, CodecError>;

    /// Opens an encoder producing `spec.format`.
    ///
    /// # Errors
    /// - `CodecError::ConfigurationFailed` - The encoder rejected the settings
    fn open_encoder(&self, info: &EncoderInfo, spec: &EncoderSpec)
    -> Result<Box<Encoder>, CodecError>;
}
