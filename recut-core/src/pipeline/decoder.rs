//! Extractor-fed decoder stage.
//!
//! Reads one track of one item from its extractor, feeds the decoder as input
//! slots free up and forwards decoded frames inside the clip window, rebased
//! so that the clip start is timestamp zero.

use tokio::sync::mpsc;

use super::{CancelSignal, CodecGuard, PipelineError, StageMessage, decoding_failed, send_or_cancel};
use crate::codec::{Decoder, QueueResult};
use crate::error::ExportError;
use crate::extractor::Extractor;
use crate::media::{AudioBuffer, EncodedSample, RawFrame, TrackType};

/// Input-timeline range of an item that reaches the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipWindow {
    pub start_us: i64,
    /// Exclusive end
    pub end_us: i64,
}

impl ClipWindow {
    pub fn new(start_us: i64, end_us: i64) -> Self {
        Self { start_us, end_us }
    }

    pub fn duration_us(&self) -> i64 {
        self.end_us - self.start_us
    }

    /// Whether extraction can stop before `sample`.
    fn is_past_end(&self, sample: &EncodedSample) -> bool {
        sample.timestamp_us >= self.end_us
    }

    /// Cuts `frame` to the window and rebases it; `None` if nothing remains.
    ///
    /// Video frames are kept or dropped whole. Audio buffers straddling a
    /// window edge are trimmed to the PCM frame.
    pub fn trim(&self, frame: RawFrame) -> Option<RawFrame> {
        match frame {
            RawFrame::Video(mut frame) => {
                if frame.timestamp_us < self.start_us || frame.timestamp_us >= self.end_us {
                    return None;
                }
                frame.timestamp_us -= self.start_us;
                Some(RawFrame::Video(frame))
            }
            RawFrame::Audio(buffer) => self.trim_audio(buffer).map(RawFrame::Audio),
        }
    }

    fn trim_audio(&self, mut buffer: AudioBuffer) -> Option<AudioBuffer> {
        let format = buffer.format;
        let channels = format.channel_count as usize;
        let end_us = buffer.timestamp_us + buffer.duration_us();
        if end_us <= self.start_us || buffer.timestamp_us >= self.end_us || channels == 0 {
            return None;
        }

        if buffer.timestamp_us < self.start_us {
            let skip = format.us_to_frames(self.start_us - buffer.timestamp_us) as usize;
            let skip = skip.min(buffer.frame_count());
            buffer.samples.drain(..skip * channels);
            buffer.timestamp_us = self.start_us;
        }
        if end_us > self.end_us {
            let keep = format.us_to_frames(self.end_us - buffer.timestamp_us) as usize;
            buffer.samples.truncate(keep * channels);
        }
        if buffer.samples.is_empty() {
            return None;
        }
        buffer.timestamp_us -= self.start_us;
        Some(buffer)
    }
}

/// What a decoder stage did for one item track.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderReport {
    pub decoder_name: String,
    pub samples_queued: u64,
    pub frames_forwarded: u64,
}

/// Decodes one track of one item.
pub struct DecoderStage {
    extractor: Box<dyn Extractor>,
    decoder: CodecGuard<Decoder>,
    track_type: TrackType,
    window: ClipWindow,
}

impl DecoderStage {
    /// `extractor` must already be positioned at or before `window.start_us`.
    pub fn new(
        extractor: Box<dyn Extractor>,
        decoder: Box<Decoder>,
        track_type: TrackType,
        window: ClipWindow,
    ) -> Self {
        Self {
            extractor,
            decoder: CodecGuard::new(decoder),
            track_type,
            window,
        }
    }

    /// Runs until the decoder emits end of stream, then sends
    /// [`StageMessage::EndOfStream`].
    ///
    /// # Errors
    /// - `PipelineError::Cancelled` - Cancellation observed while waiting
    /// - `ErrorCode::DecodingFailed` - The decoder failed
    /// - `ErrorCode::IoFileUnavailable` - The extractor failed mid-stream
    pub async fn run(
        mut self,
        output: mpsc::Sender<StageMessage<RawFrame>>,
        cancel: CancelSignal,
    ) -> Result<DecoderReport, PipelineError> {
        let name = self.decoder.name().to_string();
        let readiness = self.decoder.readiness();
        let mut pending: Option<EncodedSample> = None;
        let mut input_ended = false;
        let mut samples_queued = 0u64;
        let mut frames_forwarded = 0u64;

        tracing::debug!(
            "Decoding {} with {} from {}us to {}us",
            self.track_type,
            name,
            self.window.start_us,
            self.window.end_us
        );

        loop {
            let notified = readiness.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let mut progressed = false;

            while let Some(frame) = self.decoder.dequeue_output().map_err(decoding_failed)? {
                progressed = true;
                let Some(frame) = self.window.trim(frame) else {
                    continue;
                };
                send_or_cancel(&output, StageMessage::Data(frame), &cancel, "decoder").await?;
                frames_forwarded += 1;
            }
            if self.decoder.is_ended() {
                break;
            }

            if !input_ended {
                let next = match pending.take() {
                    Some(sample) => Some(sample),
                    None => self.read_sample()?,
                };
                match next {
                    Some(sample) if !self.window.is_past_end(&sample) => {
                        match self.decoder.try_queue_input(sample).map_err(decoding_failed)? {
                            QueueResult::Queued => {
                                samples_queued += 1;
                                progressed = true;
                            }
                            QueueResult::Full(sample) => pending = Some(sample),
                        }
                    }
                    _ => {
                        self.decoder.signal_end_of_input().map_err(decoding_failed)?;
                        input_ended = true;
                        progressed = true;
                    }
                }
            }

            if !progressed {
                tokio::select! {
                    _ = &mut notified => {}
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                }
            }
        }

        send_or_cancel(&output, StageMessage::EndOfStream, &cancel, "decoder").await?;
        tracing::debug!(
            "Decoder {} finished: {} samples in, {} frames out",
            name,
            samples_queued,
            frames_forwarded
        );
        Ok(DecoderReport {
            decoder_name: name,
            samples_queued,
            frames_forwarded,
        })
    }

    fn read_sample(&mut self) -> Result<Option<EncodedSample>, ExportError> {
        self.extractor
            .read_sample(self.track_type)
            .map_err(|e| ExportError::io_unavailable("extractor", e))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::media::{AudioFormat, ColorInfo, VideoFrame};

    fn video(timestamp_us: i64) -> RawFrame {
        RawFrame::Video(VideoFrame {
            timestamp_us,
            width: 16,
            height: 16,
            color: ColorInfo::SDR_BT709_LIMITED,
            pixels: Bytes::new(),
        })
    }

    #[test]
    fn test_video_outside_window_is_dropped() {
        let window = ClipWindow::new(1_000_000, 2_000_000);
        assert!(window.trim(video(999_999)).is_none());
        assert!(window.trim(video(2_000_000)).is_none());
        assert_eq!(window.trim(video(1_500_000)).unwrap().timestamp_us(), 500_000);
    }

    #[test]
    fn test_audio_straddling_start_is_trimmed() {
        let format = AudioFormat::new(1_000, 1);
        let window = ClipWindow::new(100_000, 1_000_000);
        // 200 frames at 1 kHz starting at 0: the first 100 fall before the clip
        let buffer = AudioBuffer {
            timestamp_us: 0,
            format,
            samples: (0..200).collect(),
        };
        let Some(RawFrame::Audio(trimmed)) = window.trim(RawFrame::Audio(buffer)) else {
            panic!("expected audio");
        };
        assert_eq!(trimmed.timestamp_us, 0);
        assert_eq!(trimmed.frame_count(), 100);
        assert_eq!(trimmed.samples[0], 100);
    }

    #[test]
    fn test_audio_straddling_end_is_truncated() {
        let format = AudioFormat::new(1_000, 2);
        let window = ClipWindow::new(0, 150_000);
        let buffer = AudioBuffer {
            timestamp_us: 100_000,
            format,
            samples: vec![1; 200],
        };
        let Some(RawFrame::Audio(trimmed)) = window.trim(RawFrame::Audio(buffer)) else {
            panic!("expected audio");
        };
        assert_eq!(trimmed.frame_count(), 50);
        assert_eq!(trimmed.timestamp_us, 100_000);
    }
}
