//! Extractor seam: demuxers producing encoded samples per track.

use std::path::Path;

use crate::container::ContainerExtractor;
use crate::error::ExtractorError;
use crate::media::{EncodedSample, TrackFormat, TrackType};

/// Demuxer over one input.
///
/// Samples of each track come out in timestamp order. Seeking positions every
/// track so that decoding from the returned sync point reaches the target.
pub trait Extractor: Send {
    /// At most one format per track type.
    fn track_formats(&self) -> &[TrackFormat];

    fn duration_us(&self) -> i64;

    /// Seeks to the sync sample at or before `timestamp_us` and returns its
    /// timestamp.
    fn seek_to(&mut self, timestamp_us: i64) -> Result<i64, ExtractorError>;

    /// Next sample of `track_type`, or `None` at end of stream.
    fn read_sample(&mut self, track_type: TrackType) -> Result<Option<EncodedSample>, ExtractorError>;

    fn track_format(&self, track_type: TrackType) -> Option<&TrackFormat> {
        self.track_formats()
            .iter()
            .find(|f| f.track_type() == Some(track_type))
    }
}

/// Opens extractors for media URIs.
pub trait ExtractorFactory: Send + Sync {
    /// # Errors
    /// - `ExtractorError::UnsupportedUri` - No extractor handles the URI
    /// - `ExtractorError::Io` / `Container` - The source cannot be read
    fn open(&self, uri: &str) -> Result<Box<dyn Extractor>, ExtractorError>;
}

/// Handles container files (plain paths or `file://` URIs) and, with the
/// `simulation` feature, `synthetic://` sources.
#[derive(Debug, Clone, Default)]
pub struct DefaultExtractorFactory;

impl ExtractorFactory for DefaultExtractorFactory {
    fn open(&self, uri: &str) -> Result<Box<dyn Extractor>, ExtractorError> {
        #[cfg(feature = "simulation")]
        if uri.starts_with(crate::simulation::SYNTHETIC_SCHEME) {
            return Ok(Box::new(crate::simulation::SyntheticExtractor::open(uri)?));
        }

        let path = match uri.strip_prefix("file://") {
            Some(path) => path,
            None if uri.contains("://") => {
                return Err(ExtractorError::UnsupportedUri {
                    uri: uri.to_string(),
                });
            }
            None => uri,
        };
        Ok(Box::new(ContainerExtractor::open(Path::new(path))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_scheme_is_rejected() {
        let result = DefaultExtractorFactory.open("rtsp://camera/stream");
        assert!(matches!(result, Err(ExtractorError::UnsupportedUri { .. })));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = DefaultExtractorFactory.open("/definitely/not/here.rcx");
        assert!(matches!(result, Err(ExtractorError::Container(_))));
    }
}
