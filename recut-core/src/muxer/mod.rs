//! Muxer seam and the shared, interleaving wrapper around it.

pub mod wrapper;

pub use wrapper::{MuxerSummary, MuxerWrapper, TrackSummary};

use std::path::Path;

use crate::error::MuxerError;
use crate::media::{EncodedSample, TrackFormat, TrackType};

/// Container writer.
///
/// Accepts samples out of order between tracks but in order within a track.
/// Never shared directly: all access goes through [`MuxerWrapper`].
pub trait Muxer: Send {
    /// Adds a track and returns its index.
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, MuxerError>;

    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<(), MuxerError>;

    fn add_metadata(&mut self, key: &str, value: &str) -> Result<(), MuxerError>;

    /// Flushes and closes the output. A cancelled output is left unfinalized.
    fn release(&mut self, for_cancellation: bool) -> Result<(), MuxerError>;
}

/// Creates muxers and reports which sample formats they accept.
pub trait MuxerFactory: Send + Sync {
    fn create(&self, path: &Path) -> Result<Box<dyn Muxer>, MuxerError>;

    /// Supported MIME types for `track_type`, most preferred first.
    fn supported_mime_types(&self, track_type: TrackType) -> Vec<String>;
}
