//! Combines the processed frames of every video sequence into output frames.
//!
//! The primary sequence drives output timing. For each primary frame the
//! most recent frame of every secondary sequence at or before its timestamp
//! is blended over it. Composition-level effects run last, and every frame
//! is rendered at the encoder's input size.

use tokio::sync::mpsc;

use super::{
    CancelSignal, EncoderInput, PipelineError, ProcessedFrame, StageMessage, recv_or_cancel,
    send_or_cancel,
};
use crate::effects::VideoEffectChain;
use crate::media::{RawFrame, VideoFrame};

struct SecondaryStream {
    input: mpsc::Receiver<StageMessage<ProcessedFrame>>,
    current: Option<ProcessedFrame>,
    next: Option<ProcessedFrame>,
    ended: bool,
}

impl SecondaryStream {
    /// Advances until `current` is the latest frame at or before `timestamp_us`.
    async fn advance_to(&mut self, timestamp_us: i64, cancel: &CancelSignal) -> Result<(), PipelineError> {
        loop {
            if let Some(next) = &self.next {
                if next.frame.timestamp_us > timestamp_us {
                    return Ok(());
                }
                self.current = self.next.take();
            }
            if self.ended {
                return Ok(());
            }
            match recv_or_cancel(&mut self.input, cancel).await? {
                Some(StageMessage::Data(frame)) => self.next = Some(frame),
                Some(StageMessage::EndOfStream) => self.ended = true,
                None => return Err(PipelineError::disconnected("compositor")),
            }
        }
    }
}

pub struct VideoCompositor {
    primary: mpsc::Receiver<StageMessage<ProcessedFrame>>,
    secondaries: Vec<SecondaryStream>,
    effects: VideoEffectChain,
    output_size: (u32, u32),
}

impl VideoCompositor {
    /// `effects` holds the composition-level effects; `output_size` is the
    /// encoder's input size.
    pub fn new(
        primary: mpsc::Receiver<StageMessage<ProcessedFrame>>,
        secondaries: Vec<mpsc::Receiver<StageMessage<ProcessedFrame>>>,
        effects: VideoEffectChain,
        output_size: (u32, u32),
    ) -> Self {
        Self {
            primary,
            secondaries: secondaries
                .into_iter()
                .map(|input| SecondaryStream {
                    input,
                    current: None,
                    next: None,
                    ended: false,
                })
                .collect(),
            effects,
            output_size,
        }
    }

    /// Runs until the primary sequence ends; returns the number of frames sent.
    pub async fn run(
        mut self,
        output: mpsc::Sender<StageMessage<EncoderInput>>,
        cancel: CancelSignal,
    ) -> Result<u64, PipelineError> {
        let mut frames = 0u64;
        loop {
            let processed = match recv_or_cancel(&mut self.primary, &cancel).await? {
                Some(StageMessage::Data(processed)) => processed,
                Some(StageMessage::EndOfStream) => break,
                None => return Err(PipelineError::disconnected("compositor")),
            };
            let ProcessedFrame { mut frame, fence } = processed;

            for secondary in &mut self.secondaries {
                secondary.advance_to(frame.timestamp_us, &cancel).await?;
                if let Some(overlay) = &secondary.current {
                    frame = blend(frame, &overlay.frame);
                }
            }

            let Some(mut frame) = self.effects.apply(frame) else {
                continue;
            };
            (frame.width, frame.height) = self.output_size;
            let input = EncoderInput {
                frame: RawFrame::Video(frame),
                fence: Some(fence),
            };
            send_or_cancel(&output, StageMessage::Data(input), &cancel, "compositor").await?;
            frames += 1;
        }

        send_or_cancel(&output, StageMessage::EndOfStream, &cancel, "compositor").await?;
        tracing::debug!(
            "Compositor finished: {} frames from {} sequences",
            frames,
            self.secondaries.len() + 1
        );
        Ok(frames)
    }
}

/// Blends `overlay` over `base` at half opacity.
fn blend(mut base: VideoFrame, overlay: &VideoFrame) -> VideoFrame {
    let pixels: Vec<u8> = base
        .pixels
        .iter()
        .zip(overlay.pixels.iter().chain(std::iter::repeat(&0)))
        .map(|(b, o)| ((*b as u16 + *o as u16) / 2) as u8)
        .collect();
    base.pixels = pixels.into();
    base
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::effects::{ColorConversion, VideoStreamFormat};
    use crate::media::ColorInfo;
    use crate::pipeline::{TextureFence, cancel_pair};

    fn identity_chain() -> VideoEffectChain {
        let format = VideoStreamFormat {
            width: 32,
            height: 32,
            frame_rate: 30.0,
            color: ColorInfo::SDR_BT709_LIMITED,
        };
        VideoEffectChain::configure(&[], format, ColorConversion::None).unwrap()
    }

    async fn processed(pool: &Arc<Semaphore>, timestamp_us: i64, value: u8) -> ProcessedFrame {
        let permit = pool.clone().acquire_owned().await.unwrap();
        ProcessedFrame {
            frame: VideoFrame {
                timestamp_us,
                width: 64,
                height: 64,
                color: ColorInfo::SDR_BT709_LIMITED,
                pixels: Bytes::from(vec![value; 3]),
            },
            fence: TextureFence::new(permit),
        }
    }

    #[tokio::test]
    async fn test_secondary_frames_blend_at_or_before_primary() {
        let pool = Arc::new(Semaphore::new(16));
        let (primary_tx, primary_rx) = mpsc::channel(8);
        let (secondary_tx, secondary_rx) = mpsc::channel(8);
        let (output_tx, mut output_rx) = mpsc::channel(8);

        for (ts, value) in [(0, 100), (33_333, 100)] {
            primary_tx
                .send(StageMessage::Data(processed(&pool, ts, value).await))
                .await
                .unwrap();
        }
        primary_tx.send(StageMessage::EndOfStream).await.unwrap();
        for (ts, value) in [(0, 200), (40_000, 0)] {
            secondary_tx
                .send(StageMessage::Data(processed(&pool, ts, value).await))
                .await
                .unwrap();
        }
        secondary_tx.send(StageMessage::EndOfStream).await.unwrap();

        let (_trigger, cancel) = cancel_pair();
        let compositor =
            VideoCompositor::new(primary_rx, vec![secondary_rx], identity_chain(), (32, 32));
        let frames = compositor.run(output_tx, cancel).await.unwrap();
        assert_eq!(frames, 2);

        let mut values = Vec::new();
        while let Some(StageMessage::Data(input)) = output_rx.recv().await {
            let RawFrame::Video(frame) = input.frame else {
                panic!("expected video");
            };
            assert_eq!((frame.width, frame.height), (32, 32));
            values.push(frame.pixels[0]);
        }
        // Both primary frames see the secondary frame at 0; the one at 40ms is later
        assert_eq!(values, vec![150, 150]);
    }
}
