//! Sequence & item processing.
//!
//! Each contributing sequence walks its items strictly in order, one task per
//! output track. For every item it opens an extractor, seeks to the clip
//! start and drives the item's track to completion before moving on; item
//! offsets on the output timeline come from the plan, so concatenated items
//! continue where the previous one ended.

pub mod plan;
pub mod slowmo;

pub use plan::{
    ExportPlan, PlanContext, PlanOptions, PlannedItem, PlannedSequence, PlannedTrack, TrackMode,
    plan_export,
};
pub use slowmo::SlowMotionFlattener;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::capability::select_decoder;
use crate::codec::{CodecPlatform, Decoder, DecoderOptions};
use crate::effects::{AudioEffectChain, VideoStreamFormat};
use crate::error::{ErrorCode, ExportError};
use crate::extractor::{Extractor, ExtractorFactory};
use crate::media::{AudioBuffer, AudioFormat, ColorInfo, RawFrame, TrackFormat, TrackType};
use crate::muxer::MuxerWrapper;
use crate::pipeline::{
    CancelSignal, DecoderStage, FrameProcessor, InputStreamInfo, PipelineError, StageMessage,
    TransmuxStage, recv_or_cancel, send_or_cancel,
};

/// How one track of one item was processed.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemReport {
    pub sequence: usize,
    pub index: usize,
    pub uri: String,
    pub track_type: TrackType,
    /// `None` when the track was transmuxed or generated
    pub decoder_name: Option<String>,
    pub duration_us: i64,
}

impl ItemReport {
    fn new(item: &PlannedItem, track_type: TrackType, decoder_name: Option<String>) -> Self {
        Self {
            sequence: item.sequence,
            index: item.index,
            uri: item.uri().to_string(),
            track_type,
            decoder_name,
            duration_us: item.duration_us,
        }
    }
}

/// Collaborators shared by the sequence tasks of one export.
#[derive(Clone)]
pub struct SequenceContext {
    pub extractors: Arc<dyn ExtractorFactory>,
    pub platform: Arc<dyn CodecPlatform>,
    pub stage_capacity: usize,
    pub cancel: CancelSignal,
}

impl SequenceContext {
    fn open_extractor(&self, item: &PlannedItem) -> Result<Box<dyn Extractor>, ExportError> {
        let mut extractor = self
            .extractors
            .open(item.uri())
            .map_err(|e| ExportError::io_unavailable(item.uri(), e))?;
        extractor
            .seek_to(item.window.start_us)
            .map_err(|e| ExportError::io_unavailable(item.uri(), e))?;
        Ok(extractor)
    }

    fn open_decoder(
        &self,
        format: &TrackFormat,
        options: DecoderOptions,
    ) -> Result<Box<Decoder>, ExportError> {
        let info = select_decoder(&self.platform.decoder_infos(), format, options)?;
        tracing::debug!("Opening decoder {} for {}", info.name, format);
        self.platform
            .open_decoder(&info, format, options)
            .map_err(|e| {
                ExportError::with_cause(
                    ErrorCode::DecodingFailed,
                    format!("cannot open decoder {}", info.name),
                    e,
                )
            })
    }
}

fn missing_track(item: &PlannedItem, track_type: TrackType) -> ExportError {
    ExportError::invalid_composition(format!(
        "sequence {} item {} has no {} track",
        item.sequence, item.index, track_type
    ))
}

/// Decodes every item of a video sequence into `processor`.
///
/// # Errors
/// - `PipelineError::Cancelled` - Cancellation observed
/// - `ErrorCode::DecodingFailed` - A decoder failed to open or decode
/// - `ErrorCode::IoFileUnavailable` - An input became unreadable
pub async fn run_video_sequence(
    context: SequenceContext,
    sequence: PlannedSequence,
    mut processor: Box<dyn FrameProcessor>,
    decoder_options: DecoderOptions,
) -> Result<Vec<ItemReport>, PipelineError> {
    let cancel = context.cancel.clone();
    let mut reports = Vec::with_capacity(sequence.items.len());

    for item in &sequence.items {
        let format = item
            .format(TrackType::Video)
            .ok_or_else(|| missing_track(item, TrackType::Video))?;
        let extractor = context.open_extractor(item)?;
        let decoder = context.open_decoder(format, decoder_options)?;

        let color = if decoder_options.tone_map_to_sdr && format.is_hdr() {
            ColorInfo::SDR_BT709_GAMMA22
        } else {
            format.color_or_default()
        };
        processor
            .register_input_stream(InputStreamInfo {
                effects: item.item.effects.video.clone(),
                format: VideoStreamFormat {
                    width: format.width,
                    height: format.height,
                    frame_rate: format.frame_rate,
                    color,
                },
                offset_us: item.offset_us,
            })
            .await?;

        let flattener = item.flattener();
        let window = item.window;
        let base_us = flattener.map(window.start_us);
        let (sender, mut receiver) = mpsc::channel(context.stage_capacity);
        let stage = DecoderStage::new(extractor, decoder, TrackType::Video, window);

        let feed = async {
            loop {
                match recv_or_cancel(&mut receiver, &cancel).await? {
                    Some(StageMessage::Data(RawFrame::Video(mut frame))) => {
                        if !flattener.is_identity() {
                            frame.timestamp_us =
                                flattener.map(window.start_us + frame.timestamp_us) - base_us;
                        }
                        tokio::select! {
                            result = processor.queue_input_frame(frame) => result?,
                            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                        }
                    }
                    Some(StageMessage::Data(RawFrame::Audio(_))) => {}
                    Some(StageMessage::EndOfStream) => return Ok(()),
                    None => return Err(PipelineError::disconnected("video sequence")),
                }
            }
        };
        let (report, ()) = tokio::try_join!(stage.run(sender, cancel.clone()), feed)?;
        reports.push(ItemReport::new(item, TrackType::Video, Some(report.decoder_name)));
    }

    processor.signal_end_of_input().await?;
    tracing::debug!(
        "Video sequence {} finished after {} items",
        sequence.index,
        reports.len()
    );
    Ok(reports)
}

/// Writes continuous PCM on the output timeline.
struct PcmWriter {
    output: mpsc::Sender<StageMessage<AudioBuffer>>,
    format: AudioFormat,
    start_us: i64,
    frames_written: u64,
    cancel: CancelSignal,
}

impl PcmWriter {
    /// Writes `samples`, dropping whatever lies beyond `limit_frames`.
    async fn write(&mut self, mut samples: Vec<i16>, limit_frames: u64) -> Result<(), PipelineError> {
        let channels = self.format.channel_count.max(1) as usize;
        let room = limit_frames.saturating_sub(self.frames_written) as usize;
        samples.truncate(room * channels);
        if samples.is_empty() {
            return Ok(());
        }
        let buffer = AudioBuffer {
            timestamp_us: self.start_us + self.format.frames_to_us(self.frames_written),
            format: self.format,
            samples,
        };
        self.frames_written += buffer.frame_count() as u64;
        send_or_cancel(&self.output, StageMessage::Data(buffer), &self.cancel, "audio sequence").await
    }

    async fn pad_to(&mut self, frames: u64, chunk_frames: usize) -> Result<(), PipelineError> {
        let channels = self.format.channel_count.max(1) as usize;
        while self.frames_written < frames {
            let count = (frames - self.frames_written).min(chunk_frames.max(1) as u64) as usize;
            self.write(vec![0; count * channels], frames).await?;
        }
        Ok(())
    }
}

/// Produces the PCM of an audio sequence in `mix_format`.
///
/// Items without audio, muted items and audio shorter than its item are
/// filled with silence, so the stream always covers the whole sequence.
///
/// # Errors
/// - `PipelineError::Cancelled` - Cancellation observed
/// - `ErrorCode::DecodingFailed` - A decoder failed to open or decode
/// - `ErrorCode::InvalidComposition` - An item's audio effects cannot reach
///   the mix format
pub async fn run_audio_sequence(
    context: SequenceContext,
    sequence: PlannedSequence,
    mix_format: AudioFormat,
    timeline_start_us: i64,
    silence_chunk_frames: usize,
    output: mpsc::Sender<StageMessage<AudioBuffer>>,
) -> Result<Vec<ItemReport>, PipelineError> {
    let cancel = context.cancel.clone();
    let mut writer = PcmWriter {
        output,
        format: mix_format,
        start_us: timeline_start_us,
        frames_written: 0,
        cancel: cancel.clone(),
    };
    let mut reports = Vec::with_capacity(sequence.items.len());

    for item in &sequence.items {
        let item_end_frames = mix_format.us_to_frames(item.end_us() - timeline_start_us);
        let decoder_name = match item.format(TrackType::Audio) {
            Some(format) if !item.item.mute_audio => {
                let extractor = context.open_extractor(item)?;
                let decoder = context.open_decoder(format, DecoderOptions::default())?;
                let input = AudioFormat::new(format.sample_rate, format.channel_count);
                let mut chain =
                    AudioEffectChain::configure(&item.item.effects.audio, input, Some(mix_format))
                        .map_err(ExportError::from)?;

                let (sender, mut receiver) = mpsc::channel(context.stage_capacity);
                let stage = DecoderStage::new(extractor, decoder, TrackType::Audio, item.window);
                let feed = async {
                    loop {
                        match recv_or_cancel(&mut receiver, &cancel).await? {
                            Some(StageMessage::Data(RawFrame::Audio(buffer))) => {
                                let samples = chain.apply(&buffer.samples);
                                writer.write(samples, item_end_frames).await?;
                            }
                            Some(StageMessage::Data(RawFrame::Video(_))) => {}
                            Some(StageMessage::EndOfStream) => return Ok(()),
                            None => return Err(PipelineError::disconnected("audio sequence")),
                        }
                    }
                };
                let (report, ()) = tokio::try_join!(stage.run(sender, cancel.clone()), feed)?;
                Some(report.decoder_name)
            }
            _ => None,
        };
        writer.pad_to(item_end_frames, silence_chunk_frames).await?;
        reports.push(ItemReport::new(item, TrackType::Audio, decoder_name));
    }

    send_or_cancel(&writer.output, StageMessage::EndOfStream, &cancel, "audio sequence").await?;
    tracing::debug!(
        "Audio sequence {} finished: {} frames",
        sequence.index,
        writer.frames_written
    );
    Ok(reports)
}

/// Copies one track of every item of `sequence` into the muxer.
///
/// # Errors
/// - `PipelineError::Cancelled` - Cancellation observed
/// - `ErrorCode::IoFileUnavailable` - An input became unreadable
/// - `ErrorCode::MuxingFailed` - The muxer rejected the track or a sample
pub async fn run_transmux_sequence(
    context: SequenceContext,
    sequence: PlannedSequence,
    track_type: TrackType,
    muxer: Arc<MuxerWrapper>,
) -> Result<Vec<ItemReport>, PipelineError> {
    let Some(format) = sequence.items.iter().find_map(|i| i.format(track_type)) else {
        return Err(PipelineError::Export(ExportError::invalid_composition(format!(
            "sequence {} has no {} track",
            sequence.index, track_type
        ))));
    };
    let stage = TransmuxStage::begin(track_type, format, muxer)?;
    let mut reports = Vec::with_capacity(sequence.items.len());

    for item in &sequence.items {
        if item.format(track_type).is_none() {
            return Err(missing_track(item, track_type).into());
        }
        let mut extractor = context.open_extractor(item)?;
        let written = stage
            .write_segment(extractor.as_mut(), item.window, item.offset_us, &context.cancel)
            .await?;
        tracing::debug!(
            "Transmuxed {} {} samples from {}",
            written,
            track_type,
            item.uri()
        );
        reports.push(ItemReport::new(item, track_type, None));
    }

    stage.finish();
    Ok(reports)
}
