//! Encoded samples and decoded frames flowing between stages.

use bytes::Bytes;

use super::format::{ColorInfo, TrackType};

/// Buffer flags carried with encoded samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SampleFlags(u8);

impl SampleFlags {
    pub const NONE: SampleFlags = SampleFlags(0);
    pub const KEY_FRAME: SampleFlags = SampleFlags(1);
    pub const END_OF_STREAM: SampleFlags = SampleFlags(1 << 1);
    /// Decode the sample but do not render it (precedes the clip start)
    pub const DECODE_ONLY: SampleFlags = SampleFlags(1 << 2);

    pub fn from_bits(bits: u8) -> Self {
        SampleFlags(bits & 0b111)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: SampleFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_key_frame(self) -> bool {
        self.contains(Self::KEY_FRAME)
    }

    pub fn is_decode_only(self) -> bool {
        self.contains(Self::DECODE_ONLY)
    }

    pub fn with(self, other: SampleFlags) -> Self {
        SampleFlags(self.0 | other.0)
    }

    pub fn without(self, other: SampleFlags) -> Self {
        SampleFlags(self.0 & !other.0)
    }
}

/// One access unit of an elementary stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSample {
    pub track_type: TrackType,
    pub timestamp_us: i64,
    pub flags: SampleFlags,
    pub data: Bytes,
}

impl EncodedSample {
    pub fn new(track_type: TrackType, timestamp_us: i64, flags: SampleFlags, data: Bytes) -> Self {
        Self {
            track_type,
            timestamp_us,
            flags,
            data,
        }
    }

    pub fn is_key_frame(&self) -> bool {
        self.flags.is_key_frame()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Decoded picture.
///
/// `pixels` holds a packed RGB thumbnail of the picture; geometry changes are
/// tracked through `width`/`height` only.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub timestamp_us: i64,
    pub width: u32,
    pub height: u32,
    pub color: ColorInfo,
    pub pixels: Bytes,
}

/// PCM layout of an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channel_count: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channel_count: u16) -> Self {
        Self {
            sample_rate,
            channel_count,
        }
    }

    /// Duration of `frames` PCM frames in microseconds.
    pub fn frames_to_us(&self, frames: u64) -> i64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (frames as i128 * 1_000_000 / self.sample_rate as i128) as i64
    }

    /// Number of PCM frames covering `duration_us`.
    pub fn us_to_frames(&self, duration_us: i64) -> u64 {
        if duration_us <= 0 {
            return 0;
        }
        (duration_us as i128 * self.sample_rate as i128 / 1_000_000) as u64
    }
}

/// Interleaved 16-bit PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub timestamp_us: i64,
    pub format: AudioFormat,
    pub samples: Vec<i16>,
}

impl AudioBuffer {
    pub fn silence(timestamp_us: i64, format: AudioFormat, frames: usize) -> Self {
        Self {
            timestamp_us,
            format,
            samples: vec![0; frames * format.channel_count as usize],
        }
    }

    pub fn frame_count(&self) -> usize {
        match self.format.channel_count {
            0 => 0,
            channels => self.samples.len() / channels as usize,
        }
    }

    pub fn duration_us(&self) -> i64 {
        self.format.frames_to_us(self.frame_count() as u64)
    }
}

/// Decoder output and encoder input.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFrame {
    Video(VideoFrame),
    Audio(AudioBuffer),
}

impl RawFrame {
    pub fn timestamp_us(&self) -> i64 {
        match self {
            RawFrame::Video(frame) => frame.timestamp_us,
            RawFrame::Audio(buffer) => buffer.timestamp_us,
        }
    }

    pub fn track_type(&self) -> TrackType {
        match self {
            RawFrame::Video(_) => TrackType::Video,
            RawFrame::Audio(_) => TrackType::Audio,
        }
    }
}
