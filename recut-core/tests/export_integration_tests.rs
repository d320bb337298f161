//! Integration tests for the export pipeline.
//!
//! These tests drive complete exports of synthetic media through the public
//! TransformerHandle API on the simulated platform and inspect the written
//! container files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use recut_core::config::RecutConfig;
use recut_core::container::ContainerReader;
use recut_core::effects::VideoEffect;
use recut_core::media::{ColorInfo, Effects, TrackType, TransformationRequest, mime};
use recut_core::result::InputSource;
use recut_core::simulation::{SimulatedPlatform, SyntheticSource};
use recut_core::{
    Composition, EditedMediaItem, EditedMediaItemSequence, ErrorCode, ExportError,
    ExportListener, ExportOutcome, ExportResult, ExportState, HdrMode, ProgressState,
    TransformerComponents, TransformerError, TransformerHandle, TransformerSettings,
    spawn_transformer,
};
use tempfile::TempDir;
use tokio::time::timeout;

/// Records every listener callback.
#[derive(Default)]
struct RecordingListener {
    completed: Mutex<Vec<ExportResult>>,
    errors: Mutex<Vec<ErrorCode>>,
    fallbacks: Mutex<Vec<(TransformationRequest, TransformationRequest)>>,
    progress: Mutex<Vec<u8>>,
}

impl ExportListener for RecordingListener {
    fn on_completed(&self, _composition: &Composition, result: &ExportResult) {
        self.completed.lock().push(result.clone());
    }

    fn on_error(&self, _composition: &Composition, _result: &ExportResult, error: &ExportError) {
        self.errors.lock().push(error.code);
    }

    fn on_fallback_applied(
        &self,
        _composition: &Composition,
        original: &TransformationRequest,
        fallback: &TransformationRequest,
    ) {
        self.fallbacks.lock().push((original.clone(), fallback.clone()));
    }

    fn on_progress(&self, percent: u8) {
        self.progress.lock().push(percent);
    }
}

/// Test fixture wrapping a transformer on a simulated platform.
struct ExportFixture {
    handle: TransformerHandle,
    listener: Arc<RecordingListener>,
}

impl ExportFixture {
    async fn new(platform: SimulatedPlatform) -> Self {
        Self::with_config(RecutConfig::for_testing(), TransformerComponents::simulated(platform)).await
    }

    async fn with_config(config: RecutConfig, components: TransformerComponents) -> Self {
        let handle = spawn_transformer(config, components);
        let listener = Arc::new(RecordingListener::default());
        handle.add_listener(listener.clone()).await.unwrap();
        Self { handle, listener }
    }

    async fn export(&self, composition: Composition, output: &Path) -> ExportOutcome {
        let completion = self.handle.start(composition, output).await.unwrap();
        timeout(Duration::from_secs(30), completion.wait())
            .await
            .expect("export did not terminate")
            .unwrap()
    }

    /// Polls progress until it reaches `at_least` percent.
    async fn wait_for_progress(&self, at_least: u8) -> u8 {
        timeout(Duration::from_secs(10), async {
            loop {
                if let ProgressState::Available(percent) = self.handle.progress().await.unwrap()
                    && percent >= at_least
                {
                    return percent;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("progress never reached the expected value")
    }
}

fn clip(name: &str, duration_ms: i64) -> SyntheticSource {
    SyntheticSource::new(name).duration_ms(duration_ms)
}

fn tinted(item: EditedMediaItem) -> EditedMediaItem {
    item.with_effects(Effects {
        audio: Vec::new(),
        video: vec![VideoEffect::RgbAdjustment {
            red: 1.0,
            green: 0.8,
            blue: 1.0,
        }],
    })
}

fn video_timestamps(path: &Path) -> Vec<i64> {
    let reader = ContainerReader::open(path).unwrap();
    let track = reader.track_index(TrackType::Video).unwrap();
    reader.samples(track).iter().map(|s| s.timestamp_us).collect()
}

fn assert_strictly_increasing(timestamps: &[i64]) {
    for pair in timestamps.windows(2) {
        assert!(pair[0] < pair[1], "timestamps out of order: {pair:?}");
    }
}

fn output_in(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

#[tokio::test]
async fn test_transmux_keeps_every_frame() {
    let fixture = ExportFixture::new(SimulatedPlatform::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "transmux.rcx");
    let composition = Composition::single(EditedMediaItem::from_uri(clip("beach", 5_000).uri()));

    let outcome = fixture.export(composition, &output).await;

    let ExportOutcome::Completed(result) = outcome else {
        panic!("export failed: {outcome:?}");
    };
    assert_eq!(result.video_frame_count, 150);
    assert!((4_900..=5_100).contains(&result.duration_ms));
    assert_eq!(result.processed_inputs.len(), 1);
    assert_eq!(result.processed_inputs[0].video_decoder_name, None);
    assert_eq!(result.video_encoder_name, None);
    assert!(result.fallback_event.is_none());

    let timestamps = video_timestamps(&output);
    assert_eq!(timestamps.len(), 150);
    assert_eq!(timestamps[0], 0);
    assert_strictly_increasing(&timestamps);
    let reader = ContainerReader::open(&output).unwrap();
    assert!(reader.is_finalized());
    assert!(reader.metadata().iter().any(|(key, _)| key == "writer"));

    assert_eq!(fixture.listener.completed.lock().len(), 1);
    assert_eq!(fixture.handle.state().await.unwrap(), ExportState::Completed);
}

#[tokio::test]
async fn test_transcode_with_effect_reports_codecs() {
    let fixture = ExportFixture::new(SimulatedPlatform::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "tinted.rcx");
    let item = tinted(EditedMediaItem::from_uri(clip("park", 2_000).uri()));

    let outcome = fixture.export(Composition::single(item), &output).await;

    let ExportOutcome::Completed(result) = outcome else {
        panic!("export failed: {outcome:?}");
    };
    assert_eq!(result.video_frame_count, 60);
    assert_eq!(result.video_encoder_name.as_deref(), Some("sim.avc.encoder"));
    assert_eq!(
        result.processed_inputs[0].video_decoder_name.as_deref(),
        Some("sim.avc.decoder")
    );
    assert_eq!(result.width, Some(640));
    assert_eq!(result.height, Some(480));

    let progress = fixture.listener.progress.lock().clone();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|p| p[0] <= p[1]));
    assert_eq!(progress.last(), Some(&100));
}

#[tokio::test]
async fn test_output_height_scales_video() {
    let components = TransformerComponents::simulated(SimulatedPlatform::default()).with_settings(
        TransformerSettings {
            output_height: Some(360),
            ..TransformerSettings::default()
        },
    );
    let fixture = ExportFixture::with_config(RecutConfig::for_testing(), components).await;
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "scaled.rcx");
    let composition = Composition::single(EditedMediaItem::from_uri(clip("city", 1_000).uri()));

    let outcome = fixture.export(composition, &output).await;

    let result = outcome.result().unwrap();
    assert_eq!(result.height, Some(360));
    assert_eq!(result.width, Some(480));
    assert!(result.fallback_event.is_none());
}

#[tokio::test]
async fn test_keep_hdr_without_hdr_encoder_falls_back_to_tone_mapping() {
    let fixture = ExportFixture::new(SimulatedPlatform::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "hdr.rcx");
    let source = clip("sunset", 1_000)
        .video_mime(mime::VIDEO_H265)
        .color(ColorInfo::HDR10_PQ);
    let composition = Composition::single(tinted(EditedMediaItem::from_uri(source.uri())))
        .with_hdr_mode(HdrMode::KeepHdr);

    let outcome = fixture.export(composition, &output).await;

    let ExportOutcome::Completed(result) = outcome else {
        panic!("export failed: {outcome:?}");
    };
    assert_eq!(result.color_info, Some(ColorInfo::SDR_BT709_GAMMA22));
    let event = result.fallback_event.as_ref().unwrap();
    assert_eq!(event.original.hdr_mode, HdrMode::KeepHdr);
    assert_eq!(event.fallback.hdr_mode, HdrMode::ToneMapUsingOpenGl);

    let fallbacks = fixture.listener.fallbacks.lock();
    assert_eq!(fallbacks.len(), 1);
    assert_eq!(fallbacks[0].1.hdr_mode, HdrMode::ToneMapUsingOpenGl);
}

#[tokio::test]
async fn test_keep_hdr_with_hdr_encoder_keeps_transfer() {
    let fixture = ExportFixture::new(SimulatedPlatform::default().with_hdr_editing()).await;
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "hdr-kept.rcx");
    let source = clip("aurora", 1_000)
        .video_mime(mime::VIDEO_H265)
        .color(ColorInfo::HLG);
    let composition = Composition::single(tinted(EditedMediaItem::from_uri(source.uri())))
        .with_hdr_mode(HdrMode::KeepHdr);

    let outcome = fixture.export(composition, &output).await;

    let result = outcome.result().unwrap();
    assert_eq!(result.color_info, Some(ColorInfo::HLG));
    assert!(result.fallback_event.is_none());
    assert!(fixture.listener.fallbacks.lock().is_empty());
}

#[tokio::test]
async fn test_two_items_are_concatenated() {
    let fixture = ExportFixture::new(SimulatedPlatform::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "sequence.rcx");
    let sequence = EditedMediaItemSequence::new(vec![
        EditedMediaItem::from_uri(clip("first", 5_000).uri()),
        EditedMediaItem::from_uri(clip("second", 5_000).uri()),
    ]);

    let outcome = fixture.export(Composition::new(vec![sequence]), &output).await;

    let ExportOutcome::Completed(result) = outcome else {
        panic!("export failed: {outcome:?}");
    };
    assert_eq!(result.video_frame_count, 300);
    assert_eq!(result.processed_inputs.len(), 2);
    assert!((9_900..=10_100).contains(&result.duration_ms));

    let timestamps = video_timestamps(&output);
    assert_eq!(timestamps.len(), 300);
    assert_strictly_increasing(&timestamps);
    assert_eq!(timestamps[150], 5_000_000);
}

#[tokio::test]
async fn test_video_only_source_has_no_audio_track() {
    let fixture = ExportFixture::new(SimulatedPlatform::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "silent-film.rcx");
    let source = clip("silent", 1_000).without_audio();

    let outcome = fixture
        .export(Composition::single(EditedMediaItem::from_uri(source.uri())), &output)
        .await;

    let result = outcome.result().unwrap();
    assert!(outcome.error().is_none());
    assert_eq!(result.audio_encoder_name, None);
    assert_eq!(result.sample_rate, None);
    assert_eq!(result.video_frame_count, 30);
    let reader = ContainerReader::open(&output).unwrap();
    assert_eq!(reader.tracks().len(), 1);
    assert!(reader.track_index(TrackType::Audio).is_none());
}

#[tokio::test]
async fn test_slow_motion_flattening_stretches_video() {
    let fixture = ExportFixture::new(SimulatedPlatform::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "slowmo.rcx");
    let source = clip("splash", 3_000).slow_motion(1_000, 2_000, 4);
    let item = EditedMediaItem::from_uri(source.uri()).with_flatten_for_slow_motion(true);

    let outcome = fixture.export(Composition::single(item), &output).await;

    let result = outcome.result().unwrap();
    assert!(outcome.error().is_none(), "export failed: {:?}", outcome.error());
    assert_eq!(result.video_frame_count, 90);
    assert!(result.processed_inputs[0].video_decoder_name.is_some());

    let timestamps = video_timestamps(&output);
    assert_strictly_increasing(&timestamps);
    // One second slowed down four times adds three seconds
    let last = *timestamps.last().unwrap();
    assert!((5_900_000..6_000_000).contains(&last), "last frame at {last}");
}

#[tokio::test]
async fn test_explicit_duration_truncates_output() {
    let fixture = ExportFixture::new(SimulatedPlatform::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "short.rcx");
    let composition = Composition::single(EditedMediaItem::from_uri(clip("pier", 5_000).uri()))
        .with_duration_us(2_000_000);

    let outcome = fixture.export(composition, &output).await;

    let result = outcome.result().unwrap();
    assert!(outcome.error().is_none());
    assert_eq!(result.video_frame_count, 60);
    assert!((1_900..=2_100).contains(&result.duration_ms));
    assert!(video_timestamps(&output).iter().all(|t| *t < 2_000_000));
}

#[tokio::test]
async fn test_cancel_then_resume_to_same_output() {
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "resumable.rcx");
    let composition = || Composition::single(tinted(EditedMediaItem::from_uri(clip("hike", 5_000).uri())));

    let stalled = ExportFixture::new(SimulatedPlatform::default().with_encoder_stall_after(60)).await;
    let completion = stalled.handle.start(composition(), &output).await.unwrap();
    stalled.wait_for_progress(20).await;
    stalled.handle.cancel().await.unwrap();
    assert!(matches!(completion.wait().await.unwrap(), ExportOutcome::Cancelled));
    assert_eq!(stalled.handle.state().await.unwrap(), ExportState::Cancelled);

    let partial = ContainerReader::open(&output).unwrap();
    assert!(!partial.is_finalized());

    let fixture = ExportFixture::new(SimulatedPlatform::default()).await;
    let completion = fixture.handle.resume(composition(), &output, &output).await.unwrap();
    let outcome = timeout(Duration::from_secs(30), completion.wait())
        .await
        .unwrap()
        .unwrap();

    let ExportOutcome::Completed(result) = outcome else {
        panic!("resume failed: {outcome:?}");
    };
    assert!(result.is_resumed());
    let prefix = &result.processed_inputs[0];
    assert!(matches!(prefix.source, InputSource::RetainedPrefix { .. }));
    assert_eq!(prefix.video_decoder_name, None);
    assert_eq!(prefix.audio_decoder_name, None);
    assert_eq!(prefix.duration_us, 1_000_000);

    let continuation = &result.processed_inputs[1];
    assert!(matches!(
        continuation.source,
        InputSource::Item { sequence: 0, item: 0, .. }
    ));
    assert_eq!(continuation.video_decoder_name.as_deref(), Some("sim.avc.decoder"));
    assert_eq!(continuation.audio_decoder_name.as_deref(), Some("sim.aac.decoder"));

    assert_eq!(result.video_frame_count, 150);
    let timestamps = video_timestamps(&output);
    assert_eq!(timestamps[0], 0);
    assert_strictly_increasing(&timestamps);
    assert!(ContainerReader::open(&output).unwrap().is_finalized());
    assert!(!output_in(&dir, "resumable.rcx.resume").exists());
}

#[tokio::test]
async fn test_resume_from_unusable_file_restarts() {
    let fixture = ExportFixture::new(SimulatedPlatform::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let garbage = output_in(&dir, "garbage.rcx");
    std::fs::write(&garbage, b"not a container").unwrap();
    let output = output_in(&dir, "fresh.rcx");
    let composition = Composition::single(EditedMediaItem::from_uri(clip("lake", 1_000).uri()));

    let completion = fixture.handle.resume(composition, &output, &garbage).await.unwrap();
    let outcome = completion.wait().await.unwrap();

    let result = outcome.result().unwrap();
    assert!(!result.is_resumed());
    assert_eq!(result.video_frame_count, 30);
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let fixture = ExportFixture::new(SimulatedPlatform::default().with_encoder_stall_after(5)).await;
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "cancelled.rcx");

    // Nothing to cancel yet
    fixture.handle.cancel().await.unwrap();

    let item = tinted(EditedMediaItem::from_uri(clip("road", 5_000).uri()));
    let completion = fixture.handle.start(Composition::single(item), &output).await.unwrap();
    fixture.wait_for_progress(1).await;

    let (first, second) = tokio::join!(fixture.handle.cancel(), fixture.handle.cancel());
    first.unwrap();
    second.unwrap();
    fixture.handle.cancel().await.unwrap();

    assert!(matches!(completion.wait().await.unwrap(), ExportOutcome::Cancelled));
    assert_eq!(fixture.handle.progress().await.unwrap(), ProgressState::NotStarted);
    assert!(fixture.listener.errors.lock().is_empty());
    assert!(fixture.listener.completed.lock().is_empty());
}

#[tokio::test]
async fn test_start_while_busy_is_rejected() {
    let fixture = ExportFixture::new(SimulatedPlatform::default().with_encoder_stall_after(5)).await;
    let dir = tempfile::tempdir().unwrap();
    let item = || tinted(EditedMediaItem::from_uri(clip("trail", 3_000).uri()));

    let completion = fixture
        .handle
        .start(Composition::single(item()), &output_in(&dir, "first.rcx"))
        .await
        .unwrap();
    let second = fixture
        .handle
        .start(Composition::single(item()), &output_in(&dir, "second.rcx"))
        .await;
    assert!(matches!(second, Err(TransformerError::IllegalState { .. })));
    assert!(fixture.handle.state().await.unwrap().is_active());

    fixture.handle.cancel().await.unwrap();
    assert!(matches!(completion.wait().await.unwrap(), ExportOutcome::Cancelled));
}

#[tokio::test]
async fn test_stalled_muxer_times_out() {
    let mut config = RecutConfig::for_testing();
    config.muxer.max_delay_between_samples = Duration::from_millis(300);
    let components =
        TransformerComponents::simulated(SimulatedPlatform::default().with_encoder_stall_after(10));
    let fixture = ExportFixture::with_config(config, components).await;
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "stuck.rcx");
    let item = tinted(EditedMediaItem::from_uri(clip("tunnel", 3_000).uri()));

    let outcome = fixture.export(Composition::single(item), &output).await;

    assert_eq!(outcome.error().map(|e| e.code), Some(ErrorCode::MuxingTimeout));
    assert_eq!(
        outcome.result().and_then(|r| r.export_error.as_ref()).map(|e| e.code),
        Some(ErrorCode::MuxingTimeout)
    );
    assert_eq!(*fixture.listener.errors.lock(), vec![ErrorCode::MuxingTimeout]);
    assert_eq!(fixture.handle.state().await.unwrap(), ExportState::Error);
}

#[tokio::test]
async fn test_encoder_open_failure_falls_back_to_next_encoder() {
    let platform = SimulatedPlatform::default().with_failing_encoder("sim.avc.encoder");
    let fixture = ExportFixture::new(platform).await;
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "hevc.rcx");
    let item = tinted(EditedMediaItem::from_uri(clip("coast", 1_000).uri()));

    let outcome = fixture.export(Composition::single(item), &output).await;

    let result = outcome.result().unwrap();
    assert!(outcome.error().is_none());
    assert_eq!(result.video_encoder_name.as_deref(), Some("sim.hevc.encoder"));
    let reader = ContainerReader::open(&output).unwrap();
    let track = reader.track_index(TrackType::Video).unwrap();
    assert_eq!(reader.tracks()[track].mime, mime::VIDEO_H265);
}

#[tokio::test]
async fn test_encoder_open_failure_without_fallback_fails() {
    let mut config = RecutConfig::for_testing();
    config.encoder.enable_fallback = false;
    let platform = SimulatedPlatform::default().with_failing_encoder("sim.avc.encoder");
    let fixture = ExportFixture::with_config(config, TransformerComponents::simulated(platform)).await;
    let dir = tempfile::tempdir().unwrap();
    let item = tinted(EditedMediaItem::from_uri(clip("dune", 1_000).uri()));

    let outcome = fixture
        .export(Composition::single(item), &output_in(&dir, "failed.rcx"))
        .await;

    assert_eq!(outcome.error().map(|e| e.code), Some(ErrorCode::EncodingFailed));
}

#[tokio::test]
async fn test_decoder_failure_is_reported() {
    let platform = SimulatedPlatform::default().with_decoder_failure_after(10);
    let fixture = ExportFixture::new(platform).await;
    let dir = tempfile::tempdir().unwrap();
    let item = tinted(EditedMediaItem::from_uri(clip("forest", 2_000).uri()));

    let outcome = fixture
        .export(Composition::single(item), &output_in(&dir, "broken.rcx"))
        .await;

    assert_eq!(outcome.error().map(|e| e.code), Some(ErrorCode::DecodingFailed));
}

#[tokio::test]
async fn test_missing_input_is_io_error() {
    let fixture = ExportFixture::new(SimulatedPlatform::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let missing = output_in(&dir, "missing.rcx");
    let composition = Composition::single(EditedMediaItem::from_uri(missing.display().to_string()));

    let outcome = fixture
        .export(composition, &output_in(&dir, "never.rcx"))
        .await;

    assert_eq!(outcome.error().map(|e| e.code), Some(ErrorCode::IoFileUnavailable));
}

#[tokio::test]
async fn test_muted_audio_is_replaced_by_silence() {
    let fixture = ExportFixture::new(SimulatedPlatform::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "muted.rcx");
    let item = EditedMediaItem::from_uri(clip("market", 2_000).uri()).with_mute_audio(true);

    let outcome = fixture.export(Composition::single(item), &output).await;

    let result = outcome.result().unwrap();
    assert!(outcome.error().is_none());
    assert_eq!(result.audio_encoder_name.as_deref(), Some("sim.aac.encoder"));
    assert_eq!(result.processed_inputs[0].audio_decoder_name, None);
    assert_eq!(result.sample_rate, Some(44_100));
    assert!(result.audio_sample_count > 0);
}

#[tokio::test]
async fn test_shutdown_cancels_active_export() {
    let fixture = ExportFixture::new(SimulatedPlatform::default().with_encoder_stall_after(5)).await;
    let dir = tempfile::tempdir().unwrap();
    let item = tinted(EditedMediaItem::from_uri(clip("bay", 3_000).uri()));
    let completion = fixture
        .handle
        .start(Composition::single(item), &output_in(&dir, "shutdown.rcx"))
        .await
        .unwrap();

    fixture.handle.shutdown().await.unwrap();

    assert!(matches!(completion.wait().await.unwrap(), ExportOutcome::Cancelled));
    assert_eq!(fixture.handle.state().await, Err(TransformerError::EngineShutdown));
}

mod ordering {
    use proptest::prelude::*;

    use super::*;

    fn export_blocking(sources: Vec<SyntheticSource>, output: &Path) -> ExportOutcome {
        tokio_test::block_on(async {
            let fixture = ExportFixture::new(SimulatedPlatform::default()).await;
            let items = sources
                .iter()
                .map(|s| tinted(EditedMediaItem::from_uri(s.uri())))
                .collect();
            let composition = Composition::new(vec![EditedMediaItemSequence::new(items)]);
            fixture.export(composition, output).await
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(6))]

        #[test]
        fn prop_output_timestamps_are_ordered(
            durations in proptest::collection::vec(200i64..900, 1..3),
            fps in prop_oneof![Just(24.0f32), Just(25.0), Just(30.0)],
        ) {
            let dir = tempfile::tempdir().unwrap();
            let output = output_in(&dir, "ordered.rcx");
            let sources: Vec<SyntheticSource> = durations
                .iter()
                .enumerate()
                .map(|(i, d)| clip(&format!("item{i}"), *d).fps(fps))
                .collect();
            let expected: u64 = sources.iter().map(|s| s.video_frame_count()).sum();

            let outcome = export_blocking(sources, &output);

            let result = outcome.result().unwrap();
            prop_assert!(outcome.error().is_none(), "export failed: {:?}", outcome.error());
            prop_assert_eq!(result.video_frame_count, expected);

            let reader = ContainerReader::open(&output).unwrap();
            for track_type in TrackType::ALL {
                let track = reader.track_index(track_type).unwrap();
                let timestamps: Vec<i64> =
                    reader.samples(track).iter().map(|s| s.timestamp_us).collect();
                prop_assert!(timestamps.windows(2).all(|p| p[0] < p[1]));
            }
        }
    }
}
