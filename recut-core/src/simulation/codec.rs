//! Software codecs for the simulated platform.
//!
//! Inputs are transformed synchronously when queued; the number of
//! undequeued outputs is bounded by the codec's slot count, so a stage that
//! stops draining a codec sees `QueueResult::Full` just like on a device.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::sync::Notify;

use super::AUDIO_FRAMES_PER_PACKET;
use crate::codec::{Codec, QueueResult};
use crate::error::CodecError;
use crate::media::{
    AudioBuffer, AudioFormat, ColorInfo, EncodedSample, RawFrame, SampleFlags, TrackFormat,
    TrackType, VideoFrame,
};

struct CodecCore<O> {
    name: String,
    format: TrackFormat,
    readiness: Arc<Notify>,
    slots: usize,
    outputs: VecDeque<O>,
    input_ended: bool,
    ended: bool,
    released: bool,
}

impl<O> CodecCore<O> {
    fn new(name: &str, format: TrackFormat, slots: usize) -> Self {
        Self {
            name: name.to_string(),
            format,
            readiness: Arc::new(Notify::new()),
            slots: slots.max(1),
            outputs: VecDeque::new(),
            input_ended: false,
            ended: false,
            released: false,
        }
    }

    fn check_open(&self) -> Result<(), CodecError> {
        if self.released {
            return Err(CodecError::Released {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    fn check_input(&self) -> Result<(), CodecError> {
        self.check_open()?;
        if self.input_ended {
            return Err(CodecError::InputAfterEndOfStream {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    fn has_room(&self) -> bool {
        self.outputs.len() < self.slots
    }

    fn push(&mut self, output: O) {
        self.outputs.push_back(output);
        self.readiness.notify_one();
    }

    fn pop(&mut self) -> Result<Option<O>, CodecError> {
        self.check_open()?;
        match self.outputs.pop_front() {
            Some(output) => {
                self.readiness.notify_one();
                Ok(Some(output))
            }
            None => {
                self.ended = self.input_ended;
                Ok(None)
            }
        }
    }

    fn end_input(&mut self) -> Result<(), CodecError> {
        self.check_open()?;
        self.input_ended = true;
        self.readiness.notify_one();
        Ok(())
    }

    fn processing_failed(&self, reason: impl Into<String>) -> CodecError {
        CodecError::ProcessingFailed {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }
}

/// Decoder turning synthetic samples back into frames.
pub struct SimulatedDecoder {
    core: CodecCore<RawFrame>,
    input: TrackFormat,
    tone_map_to_sdr: bool,
    fail_after: Option<u64>,
    samples_decoded: u64,
}

impl SimulatedDecoder {
    pub fn new(
        name: &str,
        input: &TrackFormat,
        tone_map_to_sdr: bool,
        slots: usize,
        fail_after: Option<u64>,
    ) -> Self {
        let mut output = input.clone();
        if tone_map_to_sdr && input.is_hdr() {
            output.color = Some(ColorInfo::SDR_BT709_GAMMA22);
        }
        Self {
            core: CodecCore::new(name, output, slots),
            input: input.clone(),
            tone_map_to_sdr,
            fail_after,
            samples_decoded: 0,
        }
    }

    fn decode(&self, sample: EncodedSample) -> Result<RawFrame, CodecError> {
        match self.input.track_type() {
            Some(TrackType::Video) => Ok(RawFrame::Video(VideoFrame {
                timestamp_us: sample.timestamp_us,
                width: self.input.width,
                height: self.input.height,
                color: self.core.format.color_or_default(),
                pixels: sample.data,
            })),
            Some(TrackType::Audio) => {
                let [low, high, tone @ ..] = sample.data.as_ref() else {
                    return Err(self.core.processing_failed("audio packet without header"));
                };
                let frames = u16::from_le_bytes([*low, *high]) as u64;
                let format = AudioFormat::new(self.input.sample_rate, self.input.channel_count);
                let amplitude = 40 + tone.first().copied().unwrap_or(0) as i32 % 40;
                let start = format.us_to_frames(sample.timestamp_us);
                let mut samples = Vec::with_capacity(frames as usize * format.channel_count as usize);
                for frame in start..start + frames {
                    let value = ((frame % 100) as i32 - 50) * amplitude;
                    for _ in 0..format.channel_count {
                        samples.push(value as i16);
                    }
                }
                Ok(RawFrame::Audio(AudioBuffer {
                    timestamp_us: sample.timestamp_us,
                    format,
                    samples,
                }))
            }
            None => Err(self
                .core
                .processing_failed(format!("cannot decode {}", self.input.mime))),
        }
    }
}

impl Codec for SimulatedDecoder {
    type Input = EncodedSample;
    type Output = RawFrame;

    fn name(&self) -> &str {
        &self.core.name
    }

    fn output_format(&self) -> &TrackFormat {
        &self.core.format
    }

    fn readiness(&self) -> Arc<Notify> {
        Arc::clone(&self.core.readiness)
    }

    fn try_queue_input(
        &mut self,
        input: EncodedSample,
    ) -> Result<QueueResult<EncodedSample>, CodecError> {
        self.core.check_input()?;
        if !self.core.has_room() {
            return Ok(QueueResult::Full(input));
        }
        if self.fail_after.is_some_and(|limit| self.samples_decoded >= limit) {
            return Err(self.core.processing_failed("injected decoder failure"));
        }
        let frame = self.decode(input)?;
        self.samples_decoded += 1;
        self.core.push(frame);
        Ok(QueueResult::Queued)
    }

    fn signal_end_of_input(&mut self) -> Result<(), CodecError> {
        self.core.end_input()
    }

    fn dequeue_output(&mut self) -> Result<Option<RawFrame>, CodecError> {
        self.core.pop()
    }

    fn is_ended(&self) -> bool {
        self.core.ended
    }

    fn release(&mut self) {
        if !self.core.released {
            tracing::trace!(
                "Decoder {} released after {} samples (tone-mapping: {})",
                self.core.name,
                self.samples_decoded,
                self.tone_map_to_sdr
            );
        }
        self.core.released = true;
        self.core.outputs.clear();
    }
}

struct AudioPacketizer {
    format: AudioFormat,
    pending: Vec<i16>,
    base_us: Option<i64>,
    frames_emitted: u64,
}

impl AudioPacketizer {
    fn packet(&mut self, frames: usize) -> EncodedSample {
        let values = frames * self.format.channel_count as usize;
        let chunk: Vec<i16> = self.pending.drain(..values).collect();
        let level = chunk.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);

        let mut data = BytesMut::with_capacity(4);
        data.put_u16_le(frames as u16);
        data.put_u16_le(level);
        let timestamp_us =
            self.base_us.unwrap_or(0) + self.format.frames_to_us(self.frames_emitted);
        self.frames_emitted += frames as u64;
        EncodedSample::new(
            TrackType::Audio,
            timestamp_us,
            SampleFlags::KEY_FRAME,
            data.freeze(),
        )
    }

    fn push(&mut self, buffer: AudioBuffer) -> Vec<EncodedSample> {
        self.base_us.get_or_insert(buffer.timestamp_us);
        self.pending.extend_from_slice(&buffer.samples);
        let packet_values = AUDIO_FRAMES_PER_PACKET * self.format.channel_count as usize;
        let mut packets = Vec::new();
        while self.pending.len() >= packet_values {
            packets.push(self.packet(AUDIO_FRAMES_PER_PACKET));
        }
        packets
    }

    fn flush(&mut self) -> Option<EncodedSample> {
        let frames = self.pending.len() / self.format.channel_count.max(1) as usize;
        (frames > 0).then(|| self.packet(frames))
    }
}

/// Encoder producing synthetic samples from frames.
pub struct SimulatedEncoder {
    core: CodecCore<EncodedSample>,
    i_frame_interval_us: i64,
    last_key_us: Option<i64>,
    audio: Option<AudioPacketizer>,
    stall_after: Option<u64>,
    frames_accepted: u64,
}

impl SimulatedEncoder {
    pub fn new(
        name: &str,
        format: &TrackFormat,
        i_frame_interval_us: i64,
        slots: usize,
        stall_after: Option<u64>,
    ) -> Self {
        let audio = (format.track_type() == Some(TrackType::Audio)).then(|| AudioPacketizer {
            format: AudioFormat::new(format.sample_rate, format.channel_count.max(1)),
            pending: Vec::new(),
            base_us: None,
            frames_emitted: 0,
        });
        Self {
            core: CodecCore::new(name, format.clone(), slots),
            i_frame_interval_us,
            last_key_us: None,
            audio,
            stall_after,
            frames_accepted: 0,
        }
    }

    fn encode_video(&mut self, frame: VideoFrame) -> EncodedSample {
        let key = self
            .last_key_us
            .is_none_or(|last| frame.timestamp_us - last >= self.i_frame_interval_us);
        if key {
            self.last_key_us = Some(frame.timestamp_us);
        }
        let flags = if key {
            SampleFlags::KEY_FRAME
        } else {
            SampleFlags::NONE
        };
        EncodedSample::new(TrackType::Video, frame.timestamp_us, flags, frame.pixels)
    }
}

impl Codec for SimulatedEncoder {
    type Input = RawFrame;
    type Output = EncodedSample;

    fn name(&self) -> &str {
        &self.core.name
    }

    fn output_format(&self) -> &TrackFormat {
        &self.core.format
    }

    fn readiness(&self) -> Arc<Notify> {
        Arc::clone(&self.core.readiness)
    }

    fn try_queue_input(&mut self, input: RawFrame) -> Result<QueueResult<RawFrame>, CodecError> {
        self.core.check_input()?;
        let stalled = self
            .stall_after
            .is_some_and(|limit| self.frames_accepted >= limit);
        if stalled || !self.core.has_room() {
            return Ok(QueueResult::Full(input));
        }

        match input {
            RawFrame::Video(frame) if self.audio.is_none() => {
                let sample = self.encode_video(frame);
                self.core.push(sample);
            }
            RawFrame::Audio(buffer) if self.audio.is_some() => {
                let packets = self
                    .audio
                    .as_mut()
                    .map(|packetizer| packetizer.push(buffer))
                    .unwrap_or_default();
                for packet in packets {
                    self.core.push(packet);
                }
            }
            _ => {
                return Err(self
                    .core
                    .processing_failed(format!("input does not match {}", self.core.format.mime)));
            }
        }
        self.frames_accepted += 1;
        Ok(QueueResult::Queued)
    }

    fn signal_end_of_input(&mut self) -> Result<(), CodecError> {
        self.core.check_input()?;
        if let Some(packet) = self.audio.as_mut().and_then(AudioPacketizer::flush) {
            self.core.push(packet);
        }
        self.core.end_input()
    }

    fn dequeue_output(&mut self) -> Result<Option<EncodedSample>, CodecError> {
        self.core.pop()
    }

    fn is_ended(&self) -> bool {
        self.core.ended
    }

    fn release(&mut self) {
        self.core.released = true;
        self.core.outputs.clear();
    }
}
