//! Runs one export from validation to a terminal outcome.
//!
//! Planning, capability resolution and resume inspection touch the file
//! system and run on the blocking pool. The pipeline itself is a set of
//! stage tasks in a [`JoinSet`] supervised by [`run_export`]: the first
//! stage error cancels the others and aborts the muxer, and a watchdog fails
//! the export when the muxer goes quiet for too long.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::commands::TransformerCommand;
use super::progress::ProgressTracker;
use super::{ExportOutcome, ExportState, TransformerComponents};
use crate::capability::{
    AudioEncoderRequest, EncoderSelection, FallbackEvent, FallbackListener, HdrCapabilities,
    HdrResolution, VideoEncoderRequest, resolve_hdr_mode, select_audio_encoder, select_decoder,
    select_video_encoder,
};
use crate::codec::{CodecPlatform, DecoderOptions, Encoder};
use crate::config::RecutConfig;
use crate::effects::{
    AudioEffectChain, ColorConversion, VideoEffect, VideoEffectChain, VideoStreamFormat,
};
use crate::error::{ErrorCode, ExportError};
use crate::media::{AudioFormat, ColorInfo, Composition, TrackType, TransformationRequest};
use crate::muxer::MuxerWrapper;
use crate::pipeline::{
    AudioMixer, CancelSignal, CancelTrigger, EncoderReport, EncoderStage, FrameProcessorConfig,
    PipelineError, VideoCompositor, cancel_pair,
};
use crate::result::ExportResultBuilder;
use crate::resume::{ResumeDecision, ResumePoint, compute_resume_state, remux_prefix};
use crate::sequence::{
    ExportPlan, ItemReport, PlanContext, PlanOptions, PlannedTrack, SequenceContext, TrackMode,
    plan_export, run_audio_sequence, run_transmux_sequence, run_video_sequence,
};

/// Reports runner progress back to the transformer actor.
pub(super) struct RunnerEvents {
    export_id: Uuid,
    sender: mpsc::UnboundedSender<TransformerCommand>,
}

impl RunnerEvents {
    pub(super) fn new(export_id: Uuid, sender: mpsc::UnboundedSender<TransformerCommand>) -> Self {
        Self { export_id, sender }
    }

    fn state(&self, state: ExportState) {
        let _ = self.sender.send(TransformerCommand::StateChanged {
            export_id: self.export_id,
            state,
        });
    }

    fn fallback(&self, event: FallbackEvent) {
        let _ = self.sender.send(TransformerCommand::FallbackApplied {
            export_id: self.export_id,
            event,
        });
    }
}

/// Everything one export needs, moved into its runner task.
pub(super) struct ExportJob {
    pub composition: Composition,
    pub output: PathBuf,
    pub resume_from: Option<PathBuf>,
    pub config: Arc<RecutConfig>,
    pub components: TransformerComponents,
    pub progress: ProgressTracker,
    pub cancel: CancelSignal,
    pub events: RunnerEvents,
}

struct VideoSetup {
    request: VideoEncoderRequest,
    selection: EncoderSelection,
    hdr: HdrResolution,
    decoder_options: DecoderOptions,
    /// Format leaving the item effects of the leading sequence
    item_output: VideoStreamFormat,
    composition_effects: Vec<VideoEffect>,
}

struct AudioSetup {
    request: AudioEncoderRequest,
    selection: EncoderSelection,
    mix_format: AudioFormat,
}

struct Prepared {
    plan: ExportPlan,
    resume: Option<Box<ResumePoint>>,
    request: TransformationRequest,
    video: Option<VideoSetup>,
    audio: Option<AudioSetup>,
}

enum TaskOutput {
    Items(Vec<ItemReport>),
    Encoder(EncoderReport),
    Frames(u64),
}

type StageTasks = JoinSet<Result<TaskOutput, PipelineError>>;

/// Runs `job` to completion, failure or cancellation.
pub(super) async fn run_export(job: ExportJob) -> ExportOutcome {
    let mut builder = ExportResultBuilder::new();
    let error = match execute(&job, &mut builder).await {
        Ok(()) => return ExportOutcome::Completed(builder.build()),
        Err(PipelineError::Cancelled) => return ExportOutcome::Cancelled,
        Err(PipelineError::Export(error)) => error,
        Err(PipelineError::Disconnected { stage }) => ExportError::new(
            ErrorCode::Unspecified,
            format!("{stage} stopped without reporting an error"),
        ),
    };
    warn!("Export failed: {}", error);
    builder.set_error(error.clone());
    ExportOutcome::Failed {
        result: builder.build(),
        error,
    }
}

async fn execute(job: &ExportJob, builder: &mut ExportResultBuilder) -> Result<(), PipelineError> {
    let composition = job.composition.clone();
    let resume_from = job.resume_from.clone();
    let config = Arc::clone(&job.config);
    let components = job.components.clone();
    let preparing = tokio::task::spawn_blocking(move || {
        prepare(&composition, resume_from.as_deref(), &config, &components)
    });
    let prepared = tokio::select! {
        joined = preparing => joined.map_err(|e| {
            ExportError::with_cause(ErrorCode::Unspecified, "export planning panicked", e)
        })??,
        _ = job.cancel.cancelled() => return Err(PipelineError::Cancelled),
    };

    let mut moved_aside = None;
    if let Some(point) = &prepared.resume {
        job.events.state(ExportState::PausedForResume);
        if same_file(&point.source, &job.output) {
            let aside = partial_path(&job.output, job.config.resume.partial_suffix);
            std::fs::rename(&job.output, &aside).map_err(|e| {
                ExportError::with_cause(
                    ErrorCode::IoFileUnavailable,
                    format!("cannot move {} aside", job.output.display()),
                    e,
                )
            })?;
            debug!("Moved partial output to {}", aside.display());
            moved_aside = Some(aside);
        }
    }

    let muxer = job
        .components
        .muxer_factory
        .create(&job.output)
        .map_err(ExportError::muxing)?;
    let muxer = Arc::new(MuxerWrapper::new(
        muxer,
        &job.output,
        prepared.plan.tracks.len(),
        &job.config.muxer,
        Some(job.progress.clone()),
    ));

    let result = drive(job, prepared, &muxer, moved_aside.as_deref(), builder).await;
    if result.is_err()
        && let Err(e) = muxer.release(true)
    {
        warn!("Releasing the muxer after a failed export: {}", e);
    }
    result?;

    if let Some(aside) = moved_aside
        && !job.config.resume.keep_partial_source
        && let Err(e) = std::fs::remove_file(&aside)
    {
        warn!("Could not delete {}: {}", aside.display(), e);
    }
    Ok(())
}

async fn drive(
    job: &ExportJob,
    prepared: Prepared,
    muxer: &Arc<MuxerWrapper>,
    moved_aside: Option<&Path>,
    builder: &mut ExportResultBuilder,
) -> Result<(), PipelineError> {
    let Prepared {
        plan,
        resume,
        request,
        video,
        audio,
    } = prepared;
    let config = &job.config;
    job.progress.begin(plan.end_us, &plan.track_types());
    muxer.add_metadata("writer", concat!("recut ", env!("CARGO_PKG_VERSION")))?;

    if let Some(point) = &resume {
        let written = tokio::select! {
            written = remux_prefix(&point.prefix, point.boundary_us, muxer) => written?,
            _ = job.cancel.cancelled() => return Err(PipelineError::Cancelled),
        };
        let source = moved_aside.unwrap_or(&point.source);
        info!(
            "Retained {} samples up to {} us from {}",
            written,
            point.boundary_us,
            source.display()
        );
        builder.add_retained_prefix(&source.display().to_string(), point.boundary_us);
    }

    let platform = job.components.codec_platform.as_ref();
    let enable_fallback = config.encoder.enable_fallback;
    let mut fallback = FallbackListener::new(request.clone(), plan.tracks.len());
    let mut video_encoder = None;
    let mut audio_encoder = None;
    for track in &plan.tracks {
        let finalized = match track.track_type {
            TrackType::Video => match &video {
                Some(setup) => {
                    let encoders = platform.encoder_infos();
                    let (encoder, selection) =
                        open_encoder(platform, &setup.selection, enable_fallback, |excluded| {
                            select_video_encoder(&encoders, &setup.request, true, excluded)
                        })?;
                    builder.set_encoder_name(TrackType::Video, &selection.info.name);
                    let finalized = finalized_video(&request, setup, &selection);
                    video_encoder = Some((encoder, selection));
                    finalized
                }
                None => request.clone(),
            },
            TrackType::Audio => match &audio {
                Some(setup) => {
                    let encoders = platform.encoder_infos();
                    let (encoder, selection) =
                        open_encoder(platform, &setup.selection, enable_fallback, |excluded| {
                            select_audio_encoder(&encoders, &setup.request, true, excluded)
                        })?;
                    builder.set_encoder_name(TrackType::Audio, &selection.info.name);
                    let finalized = finalized_audio(&request, &selection);
                    audio_encoder = Some((encoder, selection));
                    finalized
                }
                None => request.clone(),
            },
        };
        if let Some(event) = fallback.on_request_finalized(track.track_type, &finalized) {
            builder.set_fallback_event(event.clone());
            job.events.fallback(event);
        }
    }

    let (stage_cancel, stage_signal) = cancel_pair();
    let context = SequenceContext {
        extractors: Arc::clone(&job.components.extractor_factory),
        platform: Arc::clone(&job.components.codec_platform),
        stage_capacity: config.pipeline.stage_queue_capacity.max(1),
        cancel: stage_signal,
    };
    let mut tasks = StageTasks::new();
    for track in &plan.tracks {
        match (track.track_type, track.mode) {
            (track_type, TrackMode::Transmux) => {
                let sequence = plan.sequences[track.lead_sequence()].clone();
                let context = context.clone();
                let muxer = Arc::clone(muxer);
                tasks.spawn(async move {
                    run_transmux_sequence(context, sequence, track_type, muxer)
                        .await
                        .map(TaskOutput::Items)
                });
            }
            (TrackType::Video, TrackMode::Transcode) => {
                if let (Some(setup), Some((encoder, selection))) = (&video, video_encoder.take()) {
                    spawn_video(&mut tasks, &plan, track, setup, encoder, &selection, job, &context, muxer)?;
                }
            }
            (TrackType::Audio, TrackMode::Transcode) => {
                if let (Some(setup), Some((encoder, selection))) = (&audio, audio_encoder.take()) {
                    spawn_audio(&mut tasks, &plan, track, setup, encoder, &selection, job, &context, muxer)?;
                }
            }
        }
    }

    job.events.state(ExportState::Exporting);
    let skipped = resume
        .as_ref()
        .map(|p| p.skipped_items.clone())
        .unwrap_or_default();
    supervise(job, &mut tasks, &stage_cancel, muxer, &skipped, builder).await?;

    job.events.state(ExportState::Completing);
    let summary = muxer.release(false)?;
    builder.apply_muxer_summary(&summary);
    info!(
        "Output {} written: {} bytes, {} us",
        job.output.display(),
        summary.file_size_bytes.unwrap_or(0),
        summary.duration_us
    );
    Ok(())
}

async fn supervise(
    job: &ExportJob,
    tasks: &mut StageTasks,
    stage_cancel: &CancelTrigger,
    muxer: &MuxerWrapper,
    skipped: &[usize],
    builder: &mut ExportResultBuilder,
) -> Result<(), PipelineError> {
    let max_delay = job.config.muxer.max_delay_between_samples;
    let mut watchdog = tokio::time::interval(job.config.muxer.watchdog_interval);
    watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut failure: Option<ExportError> = None;
    let mut disconnected = None;
    let mut cancelled = false;
    let stop = || {
        stage_cancel.cancel();
        muxer.abort();
    };

    loop {
        tokio::select! {
            joined = tasks.join_next() => {
                let Some(joined) = joined else { break };
                let error = match joined {
                    Ok(Ok(TaskOutput::Items(mut reports))) => {
                        for report in &mut reports {
                            report.index += skipped.get(report.sequence).copied().unwrap_or(0);
                        }
                        builder.add_item_reports(&reports);
                        continue;
                    }
                    Ok(Ok(TaskOutput::Encoder(report))) => {
                        debug!(
                            "Encoder {} finished after {} frames",
                            report.encoder_name, report.frames_encoded
                        );
                        continue;
                    }
                    Ok(Ok(TaskOutput::Frames(frames))) => {
                        debug!("Stage forwarded {} frames", frames);
                        continue;
                    }
                    Ok(Err(PipelineError::Cancelled)) => continue,
                    Ok(Err(PipelineError::Disconnected { stage })) => {
                        disconnected.get_or_insert(stage);
                        continue;
                    }
                    Ok(Err(PipelineError::Export(error))) => error,
                    Err(e) => ExportError::with_cause(
                        ErrorCode::Unspecified,
                        "pipeline stage panicked",
                        e,
                    ),
                };
                if !cancelled && failure.is_none() {
                    warn!("Pipeline stage failed: {}", error);
                    failure = Some(error);
                    stop();
                }
            }
            _ = watchdog.tick(), if failure.is_none() && !cancelled => {
                let idle = muxer.inactive_for();
                if idle > max_delay && !muxer.all_tracks_ended() {
                    failure = Some(ExportError::new(
                        ErrorCode::MuxingTimeout,
                        format!("no sample written for {} ms", idle.as_millis()),
                    ));
                    stop();
                }
            }
            _ = job.cancel.cancelled(), if !cancelled && failure.is_none() => {
                cancelled = true;
                stop();
            }
        }
    }

    if cancelled {
        return Err(PipelineError::Cancelled);
    }
    if let Some(error) = failure {
        return Err(error.into());
    }
    if let Some(stage) = disconnected {
        return Err(PipelineError::Disconnected { stage });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn spawn_video(
    tasks: &mut StageTasks,
    plan: &ExportPlan,
    track: &PlannedTrack,
    setup: &VideoSetup,
    encoder: Box<Encoder>,
    selection: &EncoderSelection,
    job: &ExportJob,
    context: &SequenceContext,
    muxer: &Arc<MuxerWrapper>,
) -> Result<(), ExportError> {
    let capacity = context.stage_capacity;
    let processor_config = FrameProcessorConfig {
        conversion: setup.hdr.conversion,
        texture_pool_size: job.config.pipeline.texture_pool_size,
        input_capacity: capacity,
    };

    let mut outputs = Vec::with_capacity(track.sequences.len());
    for index in &track.sequences {
        let (sender, receiver) = mpsc::channel(capacity);
        let processor = job
            .components
            .frame_processor_factory
            .create(processor_config, sender)?;
        let sequence = plan.sequences[*index].clone();
        let context = context.clone();
        let options = setup.decoder_options;
        tasks.spawn(async move {
            run_video_sequence(context, sequence, processor, options)
                .await
                .map(TaskOutput::Items)
        });
        outputs.push(receiver);
    }
    let mut outputs = outputs.into_iter();
    let Some(primary) = outputs.next() else {
        return Err(ExportError::invalid_composition("video track without sequences"));
    };

    let effects = VideoEffectChain::configure(
        &setup.composition_effects,
        setup.item_output,
        ColorConversion::None,
    )?;
    let format = &selection.spec.format;
    let compositor =
        VideoCompositor::new(primary, outputs.collect(), effects, (format.width, format.height));
    let (sender, receiver) = mpsc::channel(capacity);
    let cancel = context.cancel.clone();
    tasks.spawn(async move { compositor.run(sender, cancel).await.map(TaskOutput::Frames) });

    let stage = EncoderStage::new(encoder, TrackType::Video, Arc::clone(muxer));
    let cancel = context.cancel.clone();
    tasks.spawn(async move { stage.run(receiver, cancel).await.map(TaskOutput::Encoder) });
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn spawn_audio(
    tasks: &mut StageTasks,
    plan: &ExportPlan,
    track: &PlannedTrack,
    setup: &AudioSetup,
    encoder: Box<Encoder>,
    selection: &EncoderSelection,
    job: &ExportJob,
    context: &SequenceContext,
    muxer: &Arc<MuxerWrapper>,
) -> Result<(), ExportError> {
    let capacity = context.stage_capacity;
    let chunk_frames = job.config.pipeline.silence_buffer_frames.max(1);

    let mut inputs = Vec::with_capacity(track.sequences.len());
    for index in &track.sequences {
        let (sender, receiver) = mpsc::channel(capacity);
        let sequence = plan.sequences[*index].clone();
        let context = context.clone();
        let mix_format = setup.mix_format;
        let start_us = plan.timeline_start_us;
        tasks.spawn(async move {
            run_audio_sequence(context, sequence, mix_format, start_us, chunk_frames, sender)
                .await
                .map(TaskOutput::Items)
        });
        inputs.push(receiver);
    }

    let format = &selection.spec.format;
    let encoder_format = AudioFormat::new(format.sample_rate, format.channel_count);
    let effects = AudioEffectChain::configure(
        &job.composition.effects.audio,
        setup.mix_format,
        Some(encoder_format),
    )?;
    let mixer = AudioMixer::new(
        inputs,
        effects,
        setup.mix_format,
        plan.timeline_start_us,
        chunk_frames,
    );
    let (sender, receiver) = mpsc::channel(capacity);
    let cancel = context.cancel.clone();
    tasks.spawn(async move { mixer.run(sender, cancel).await.map(TaskOutput::Frames) });

    let stage = EncoderStage::new(encoder, TrackType::Audio, Arc::clone(muxer));
    let cancel = context.cancel.clone();
    tasks.spawn(async move { stage.run(receiver, cancel).await.map(TaskOutput::Encoder) });
    Ok(())
}

/// Plans the export, inspects the resume source and resolves codecs.
fn prepare(
    composition: &Composition,
    resume_from: Option<&Path>,
    config: &RecutConfig,
    components: &TransformerComponents,
) -> Result<Prepared, ExportError> {
    composition.validate()?;
    let context = PlanContext {
        extractors: components.extractor_factory.as_ref(),
        muxer: components.muxer_factory.as_ref(),
        settings: &components.settings,
    };
    let full = plan_export(composition, &context, PlanOptions::default())?;

    let (plan, resume) = match resume_from {
        None => (full, None),
        Some(existing) => {
            match compute_resume_state(existing, composition, &full, config.resume.boundary_policy)
            {
                ResumeDecision::Restart { .. } => (full, None),
                ResumeDecision::Resume(point) => {
                    let options = PlanOptions {
                        timeline_start_us: point.boundary_us,
                        force_transcode: true,
                    };
                    let continuation = plan_export(&point.continuation, &context, options)?;
                    if continuation.track_types() == full.track_types() {
                        (continuation, Some(point))
                    } else {
                        info!("Continuation changes the output tracks; restarting");
                        (full, None)
                    }
                }
            }
        }
    };

    let prefix_mime = |track_type: TrackType| {
        resume.as_ref().and_then(|point| {
            point
                .prefix
                .tracks()
                .iter()
                .find(|t| t.track_type() == Some(track_type))
                .map(|t| t.mime.clone())
        })
    };
    let video = plan
        .track(TrackType::Video)
        .filter(|t| t.is_transcoded())
        .map(|t| {
            prepare_video(&plan, t, composition, config, components, prefix_mime(TrackType::Video))
        })
        .transpose()?;
    let audio = plan
        .track(TrackType::Audio)
        .filter(|t| t.is_transcoded())
        .map(|t| {
            prepare_audio(&plan, t, composition, config, components, prefix_mime(TrackType::Audio))
        })
        .transpose()?;

    Ok(Prepared {
        request: components.settings.request(composition.hdr_mode),
        plan,
        resume,
        video,
        audio,
    })
}

fn prepare_video(
    plan: &ExportPlan,
    track: &PlannedTrack,
    composition: &Composition,
    config: &RecutConfig,
    components: &TransformerComponents,
    prefix_mime: Option<String>,
) -> Result<VideoSetup, ExportError> {
    let platform = components.codec_platform.as_ref();
    let settings = &components.settings;
    let input = &track.input_format;
    let input_color = input.color_or_default();
    let encoders = platform.encoder_infos();
    let decoders = platform.decoder_infos();

    let mime_candidates = mime_candidates(
        prefix_mime.as_deref().or(settings.video_mime.as_deref()),
        &input.mime,
        config.encoder.default_video_mime,
        components.muxer_factory.supported_mime_types(TrackType::Video),
    );
    let capabilities = HdrCapabilities {
        encoder_can_keep_hdr: encoders.iter().any(|e| {
            mime_candidates.contains(&e.mime) && e.supports_hdr_editing(input_color.transfer)
        }),
        processor_can_tone_map: components.frame_processor_factory.supports_tone_mapping(),
        decoder_can_tone_map: decoders
            .iter()
            .any(|d| d.mime == input.mime && d.supports_tone_mapping),
    };
    let hdr = resolve_hdr_mode(composition.hdr_mode, input_color, &capabilities)?;
    if hdr.mode != composition.hdr_mode {
        info!("HDR mode {} degraded to {}", composition.hdr_mode, hdr.mode);
    }
    let decoder_options = DecoderOptions {
        tone_map_to_sdr: hdr.decoder_tone_map,
    };

    for index in &track.sequences {
        for item in &plan.sequences[*index].items {
            if let Some(format) = item.format(TrackType::Video) {
                select_decoder(&decoders, format, decoder_options)?;
            }
        }
    }

    let lead = plan.sequences[track.lead_sequence()]
        .items
        .iter()
        .find(|i| i.format(TrackType::Video).is_some())
        .ok_or_else(|| ExportError::invalid_composition("video track without video items"))?;
    let decoded_color = if hdr.decoder_tone_map && input_color.is_transfer_hdr() {
        ColorInfo::SDR_BT709_GAMMA22
    } else {
        input_color
    };
    let stream = VideoStreamFormat {
        width: input.width,
        height: input.height,
        frame_rate: if input.frame_rate > 0.0 {
            input.frame_rate
        } else {
            config.encoder.default_frame_rate
        },
        color: decoded_color,
    };
    let conversion = if decoded_color.is_transfer_hdr() {
        hdr.conversion
    } else {
        ColorConversion::None
    };
    let item_output =
        *VideoEffectChain::configure(&lead.item.effects.video, stream, conversion)?.output_format();

    let mut composition_effects = composition.effects.video.clone();
    if let Some(height) = settings.output_height {
        composition_effects.push(VideoEffect::Presentation { height });
    }
    let output = *VideoEffectChain::configure(&composition_effects, item_output, ColorConversion::None)?
        .output_format();

    let encoder_settings = &settings.video_encoder_settings;
    let request = VideoEncoderRequest {
        mime_candidates,
        width: output.width,
        height: output.height,
        frame_rate: output.frame_rate,
        rotation_degrees: input.rotation_degrees,
        color: output.color,
        bitrate: encoder_settings.bitrate.or(input.average_bitrate),
        bitrate_mode: encoder_settings.bitrate_mode,
        profile_level: encoder_settings.profile_level,
        i_frame_interval_us: i64::try_from(config.encoder.i_frame_interval.as_micros())
            .unwrap_or(i64::MAX),
    };
    let selection =
        select_video_encoder(&encoders, &request, config.encoder.enable_fallback, &[])?;
    debug!(
        "Video encoder {} selected for {}x{} {}",
        selection.info.name, request.width, request.height, selection.spec.format.mime
    );

    Ok(VideoSetup {
        request,
        selection,
        hdr,
        decoder_options,
        item_output,
        composition_effects,
    })
}

fn prepare_audio(
    plan: &ExportPlan,
    track: &PlannedTrack,
    composition: &Composition,
    config: &RecutConfig,
    components: &TransformerComponents,
    prefix_mime: Option<String>,
) -> Result<AudioSetup, ExportError> {
    let platform = components.codec_platform.as_ref();
    let input = &track.input_format;
    let decoders = platform.decoder_infos();
    for index in &track.sequences {
        for item in &plan.sequences[*index].items {
            if let Some(format) = item.format(TrackType::Audio)
                && !item.item.mute_audio
            {
                select_decoder(&decoders, format, DecoderOptions::default())?;
            }
        }
    }

    let mix_format = AudioFormat::new(input.sample_rate, input.channel_count);
    let output =
        AudioEffectChain::configure(&composition.effects.audio, mix_format, None)?.output_format();
    let request = AudioEncoderRequest {
        mime_candidates: mime_candidates(
            prefix_mime
                .as_deref()
                .or(components.settings.audio_mime.as_deref()),
            &input.mime,
            config.encoder.default_audio_mime,
            components.muxer_factory.supported_mime_types(TrackType::Audio),
        ),
        sample_rate: output.sample_rate,
        channel_count: output.channel_count,
        bitrate: input.average_bitrate,
    };
    let selection = select_audio_encoder(
        &platform.encoder_infos(),
        &request,
        config.encoder.enable_fallback,
        &[],
    )?;
    Ok(AudioSetup {
        request,
        selection,
        mix_format,
    })
}

/// Preferred MIME type first, then the rest the muxer accepts.
fn mime_candidates(
    requested: Option<&str>,
    input: &str,
    default: &str,
    supported: Vec<String>,
) -> Vec<String> {
    let accepted = |mime: &str| supported.iter().any(|s| s == mime);
    let preferred = requested
        .filter(|m| accepted(m))
        .or_else(|| accepted(input).then_some(input))
        .unwrap_or(default)
        .to_string();
    let mut candidates = vec![preferred];
    for mime in supported {
        if !candidates.contains(&mime) {
            candidates.push(mime);
        }
    }
    candidates
}

/// Opens the selected encoder, reselecting without it when opening fails.
fn open_encoder(
    platform: &dyn CodecPlatform,
    initial: &EncoderSelection,
    enable_fallback: bool,
    reselect: impl Fn(&[String]) -> Result<EncoderSelection, ExportError>,
) -> Result<(Box<Encoder>, EncoderSelection), ExportError> {
    let mut selection = initial.clone();
    let mut excluded = Vec::new();
    loop {
        let error = match platform.open_encoder(&selection.info, &selection.spec) {
            Ok(encoder) => return Ok((encoder, selection)),
            Err(error) => error,
        };
        warn!("Encoder {} failed to open: {}", selection.info.name, error);
        excluded.push(selection.info.name.clone());
        match enable_fallback.then(|| reselect(&excluded).ok()).flatten() {
            Some(next) => selection = next,
            None => {
                return Err(ExportError::with_cause(
                    ErrorCode::EncodingFailed,
                    format!("cannot open encoder {}", selection.info.name),
                    error,
                ));
            }
        }
    }
}

fn finalized_video(
    request: &TransformationRequest,
    setup: &VideoSetup,
    selection: &EncoderSelection,
) -> TransformationRequest {
    let format = &selection.spec.format;
    let mut finalized = request.clone();
    if request.video_mime.as_deref().is_some_and(|m| m != format.mime) {
        finalized.video_mime = Some(format.mime.clone());
    }
    if format.height != setup.request.height {
        finalized.output_height = Some(format.height);
    }
    finalized.hdr_mode = setup.hdr.mode;
    finalized
}

fn finalized_audio(
    request: &TransformationRequest,
    selection: &EncoderSelection,
) -> TransformationRequest {
    let mut finalized = request.clone();
    if request
        .audio_mime
        .as_deref()
        .is_some_and(|m| m != selection.spec.format.mime)
    {
        finalized.audio_mime = Some(selection.spec.format.mime.clone());
    }
    finalized
}

fn same_file(a: &Path, b: &Path) -> bool {
    a == b || matches!((a.canonicalize(), b.canonicalize()), (Ok(a), Ok(b)) if a == b)
}

fn partial_path(output: &Path, suffix: &str) -> PathBuf {
    let mut path = output.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::mime;

    #[test]
    fn test_mime_candidates_prefer_supported_request() {
        let supported = vec![mime::VIDEO_H264.to_string(), mime::VIDEO_H265.to_string()];
        let candidates =
            mime_candidates(Some(mime::VIDEO_H265), mime::VIDEO_H264, mime::VIDEO_H264, supported);
        assert_eq!(candidates, vec![mime::VIDEO_H265, mime::VIDEO_H264]);
    }

    #[test]
    fn test_mime_candidates_skip_unsupported_request() {
        let supported = vec![mime::VIDEO_H264.to_string()];
        let candidates =
            mime_candidates(Some(mime::VIDEO_VP9), mime::VIDEO_AV1, mime::VIDEO_H264, supported);
        assert_eq!(candidates, vec![mime::VIDEO_H264]);
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        let path = partial_path(Path::new("/tmp/out.mp4"), ".resume");
        assert_eq!(path, PathBuf::from("/tmp/out.mp4.resume"));
    }
}
