//! Media data model: formats, samples, compositions and requests.

pub mod composition;
pub mod format;
pub mod request;
pub mod sample;

pub use composition::{
    ClippingConfiguration, Composition, EditedMediaItem, EditedMediaItemSequence, Effects,
    HdrMode, MediaItem,
};
pub use format::{
    ColorInfo, ColorRange, ColorSpace, ColorTransfer, SlowMotionSegment, TrackFormat, TrackType,
    mime,
};
pub use request::{BitrateMode, TransformationRequest, VideoEncoderSettings};
pub use sample::{AudioBuffer, AudioFormat, EncodedSample, RawFrame, SampleFlags, VideoFrame};
