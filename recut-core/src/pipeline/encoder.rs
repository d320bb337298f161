//! Encoder stage: processed frames in, muxer track out.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::{CancelSignal, CodecGuard, PipelineError, StageMessage, TextureFence, encoding_failed};
use crate::codec::{Encoder, QueueResult};
use crate::media::{RawFrame, TrackType};
use crate::muxer::{MuxerWrapper, TrackSummary};

/// Frame handed to the encoder together with the texture it occupies.
#[derive(Debug)]
pub struct EncoderInput {
    pub frame: RawFrame,
    pub fence: Option<TextureFence>,
}

impl EncoderInput {
    pub fn untextured(frame: RawFrame) -> Self {
        Self { frame, fence: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderReport {
    pub encoder_name: String,
    pub frames_encoded: u64,
    pub track: Option<TrackSummary>,
}

/// Encodes one output track and writes it through the shared muxer.
pub struct EncoderStage {
    encoder: CodecGuard<Encoder>,
    track_type: TrackType,
    muxer: Arc<MuxerWrapper>,
}

impl EncoderStage {
    pub fn new(encoder: Box<Encoder>, track_type: TrackType, muxer: Arc<MuxerWrapper>) -> Self {
        Self {
            encoder: CodecGuard::new(encoder),
            track_type,
            muxer,
        }
    }

    /// Registers the muxer track, then encodes until end of stream.
    ///
    /// Input is pulled only while the encoder has a free slot; a texture is
    /// released as soon as the encoder has consumed its frame.
    ///
    /// # Errors
    /// - `PipelineError::Cancelled` - Cancellation observed while waiting
    /// - `PipelineError::Disconnected` - Input closed without end of stream
    /// - `ErrorCode::EncodingFailed` - The encoder failed
    /// - `ErrorCode::MuxingFailed` - The muxer rejected the track or a sample
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<StageMessage<EncoderInput>>,
        cancel: CancelSignal,
    ) -> Result<EncoderReport, PipelineError> {
        let name = self.encoder.name().to_string();
        let readiness = self.encoder.readiness();
        self.muxer.add_track(self.encoder.output_format())?;
        tracing::debug!("Encoding {} with {}", self.track_type, name);

        let mut pending: Option<EncoderInput> = None;
        let mut input_ended = false;
        let mut frames_encoded = 0u64;

        loop {
            let notified = readiness.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let mut progressed = false;

            while let Some(sample) = self.encoder.dequeue_output().map_err(encoding_failed)? {
                progressed = true;
                tokio::select! {
                    result = self.muxer.write_sample(sample) => result?,
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                }
            }
            if self.encoder.is_ended() {
                break;
            }

            if let Some(EncoderInput { frame, fence }) = pending.take() {
                match self.encoder.try_queue_input(frame).map_err(encoding_failed)? {
                    QueueResult::Queued => {
                        drop(fence);
                        frames_encoded += 1;
                        progressed = true;
                    }
                    QueueResult::Full(frame) => pending = Some(EncoderInput { frame, fence }),
                }
            }
            if progressed {
                continue;
            }

            if pending.is_none() && !input_ended {
                tokio::select! {
                    _ = &mut notified => {}
                    message = input.recv() => match message {
                        Some(StageMessage::Data(next)) => pending = Some(next),
                        Some(StageMessage::EndOfStream) => {
                            self.encoder.signal_end_of_input().map_err(encoding_failed)?;
                            input_ended = true;
                        }
                        None => return Err(PipelineError::disconnected("encoder")),
                    },
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                }
            } else {
                tokio::select! {
                    _ = &mut notified => {}
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                }
            }
        }

        let track = self.muxer.end_track(self.track_type);
        tracing::debug!("Encoder {} finished after {} frames", name, frames_encoded);
        Ok(EncoderReport {
            encoder_name: name,
            frames_encoded,
            track,
        })
    }
}
