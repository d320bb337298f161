//! Mixes the PCM of every audio sequence into the encoder input.

use std::collections::VecDeque;

use tokio::sync::mpsc;

use super::{CancelSignal, EncoderInput, PipelineError, StageMessage, recv_or_cancel, send_or_cancel};
use crate::effects::AudioEffectChain;
use crate::media::{AudioBuffer, AudioFormat, RawFrame};

struct MixerInput {
    receiver: mpsc::Receiver<StageMessage<AudioBuffer>>,
    pending: VecDeque<i16>,
    ended: bool,
}

/// Sums sequence streams sample by sample.
///
/// Every input delivers continuous PCM in the mix format starting at the
/// output timeline start; inputs that end early contribute silence.
/// Output timestamps are derived from the number of frames emitted.
pub struct AudioMixer {
    inputs: Vec<MixerInput>,
    effects: AudioEffectChain,
    format: AudioFormat,
    start_us: i64,
    chunk_frames: usize,
}

impl AudioMixer {
    pub fn new(
        inputs: Vec<mpsc::Receiver<StageMessage<AudioBuffer>>>,
        effects: AudioEffectChain,
        format: AudioFormat,
        start_us: i64,
        chunk_frames: usize,
    ) -> Self {
        Self {
            inputs: inputs
                .into_iter()
                .map(|receiver| MixerInput {
                    receiver,
                    pending: VecDeque::new(),
                    ended: false,
                })
                .collect(),
            effects,
            format,
            start_us,
            chunk_frames: chunk_frames.max(1),
        }
    }

    /// Mixes until every input has ended; returns the number of frames sent.
    pub async fn run(
        mut self,
        output: mpsc::Sender<StageMessage<EncoderInput>>,
        cancel: CancelSignal,
    ) -> Result<u64, PipelineError> {
        let channels = self.format.channel_count.max(1) as usize;
        let output_format = self.effects.output_format();
        let output_channels = output_format.channel_count.max(1) as usize;
        let mut frames_sent = 0u64;

        loop {
            let want = self.chunk_frames * channels;
            for input in &mut self.inputs {
                while !input.ended && input.pending.len() < want {
                    match recv_or_cancel(&mut input.receiver, &cancel).await? {
                        Some(StageMessage::Data(buffer)) => input.pending.extend(buffer.samples),
                        Some(StageMessage::EndOfStream) => input.ended = true,
                        None => return Err(PipelineError::disconnected("audio mixer")),
                    }
                }
            }

            let any_live = self.inputs.iter().any(|i| !i.ended);
            let available = self.inputs.iter().map(|i| i.pending.len() / channels);
            let frames = if any_live {
                self.chunk_frames
            } else {
                available.max().unwrap_or(0).min(self.chunk_frames)
            };
            if frames == 0 {
                break;
            }

            let mut mixed = vec![0i32; frames * channels];
            for input in &mut self.inputs {
                let take = input.pending.len().min(mixed.len());
                for (slot, sample) in mixed.iter_mut().zip(input.pending.drain(..take)) {
                    *slot += sample as i32;
                }
            }
            let mixed: Vec<i16> = mixed
                .into_iter()
                .map(|s| s.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
                .collect();

            let samples = self.effects.apply(&mixed);
            if samples.is_empty() {
                continue;
            }
            let buffer = AudioBuffer {
                timestamp_us: self.start_us + output_format.frames_to_us(frames_sent),
                format: output_format,
                samples,
            };
            frames_sent += (buffer.samples.len() / output_channels) as u64;
            let input = EncoderInput::untextured(RawFrame::Audio(buffer));
            send_or_cancel(&output, StageMessage::Data(input), &cancel, "audio mixer").await?;
        }

        send_or_cancel(&output, StageMessage::EndOfStream, &cancel, "audio mixer").await?;
        tracing::debug!(
            "Audio mixer finished: {} frames from {} sequences",
            frames_sent,
            self.inputs.len()
        );
        Ok(frames_sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cancel_pair;

    fn buffer(format: AudioFormat, samples: Vec<i16>) -> StageMessage<AudioBuffer> {
        StageMessage::Data(AudioBuffer {
            timestamp_us: 0,
            format,
            samples,
        })
    }

    #[tokio::test]
    async fn test_streams_are_summed_and_padded() {
        let format = AudioFormat::new(8_000, 1);
        let (a_tx, a_rx) = mpsc::channel(4);
        let (b_tx, b_rx) = mpsc::channel(4);
        a_tx.send(buffer(format, vec![100; 6])).await.unwrap();
        a_tx.send(StageMessage::EndOfStream).await.unwrap();
        b_tx.send(buffer(format, vec![i16::MAX; 3])).await.unwrap();
        b_tx.send(StageMessage::EndOfStream).await.unwrap();

        let chain = AudioEffectChain::configure(&[], format, Some(format)).unwrap();
        let mixer = AudioMixer::new(vec![a_rx, b_rx], chain, format, 2_000_000, 4);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (_trigger, cancel) = cancel_pair();
        let frames = mixer.run(out_tx, cancel).await.unwrap();
        assert_eq!(frames, 6);

        let mut samples = Vec::new();
        let mut timestamps = Vec::new();
        while let Some(StageMessage::Data(input)) = out_rx.recv().await {
            let RawFrame::Audio(buffer) = input.frame else {
                panic!("expected audio");
            };
            timestamps.push(buffer.timestamp_us);
            samples.extend(buffer.samples);
        }
        assert_eq!(samples, vec![i16::MAX, i16::MAX, i16::MAX, 100, 100, 100]);
        assert_eq!(timestamps, vec![2_000_000, 2_000_500]);
    }
}
