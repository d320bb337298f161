//! Copies encoded samples straight from an extractor into the muxer.

use std::sync::Arc;

use super::{CancelSignal, ClipWindow, PipelineError};
use crate::error::ExportError;
use crate::extractor::Extractor;
use crate::media::{TrackFormat, TrackType};
use crate::muxer::{MuxerWrapper, TrackSummary};

/// Writes one output track from a run of transmuxed segments.
pub struct TransmuxStage {
    track_type: TrackType,
    muxer: Arc<MuxerWrapper>,
}

impl TransmuxStage {
    /// Registers the output track with the format of the first segment.
    pub fn begin(
        track_type: TrackType,
        format: &TrackFormat,
        muxer: Arc<MuxerWrapper>,
    ) -> Result<Self, ExportError> {
        muxer.add_track(format)?;
        tracing::debug!("Transmuxing {} track ({})", track_type, format);
        Ok(Self { track_type, muxer })
    }

    /// Copies the samples of `window` and places the window start at
    /// `offset_us`. Returns the number of samples written.
    ///
    /// # Errors
    /// - `PipelineError::Cancelled` - Cancellation observed
    /// - `ErrorCode::IoFileUnavailable` - The extractor failed
    /// - `ErrorCode::MuxingFailed` - The muxer rejected a sample
    pub async fn write_segment(
        &self,
        extractor: &mut dyn Extractor,
        window: ClipWindow,
        offset_us: i64,
        cancel: &CancelSignal,
    ) -> Result<u64, PipelineError> {
        let mut written = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let sample = extractor
                .read_sample(self.track_type)
                .map_err(|e| ExportError::io_unavailable("extractor", e))?;
            let Some(mut sample) = sample else {
                break;
            };
            if sample.timestamp_us >= window.end_us {
                break;
            }
            if sample.timestamp_us < window.start_us {
                continue;
            }
            sample.timestamp_us = sample.timestamp_us - window.start_us + offset_us;
            tokio::select! {
                result = self.muxer.write_sample(sample) => result?,
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            }
            written += 1;
        }
        Ok(written)
    }

    pub fn finish(self) -> Option<TrackSummary> {
        self.muxer.end_track(self.track_type)
    }
}
