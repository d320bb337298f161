//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Subcommand, ValueEnum};
use recut_core::container::ContainerReader;
use recut_core::media::{TrackType, TransformationRequest};
use recut_core::simulation::SimulatedPlatform;
use recut_core::{
    Composition, EditedMediaItem, EditedMediaItemSequence, ExportListener, ExportOutcome,
    ExportResult, HdrMode, ProgressState, RecutConfig, RecutError, TransformerComponents,
    TransformerSettings, spawn_transformer,
};
use tracing::{info, warn};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Export inputs into a single output file
    Export {
        #[command(flatten)]
        export: ExportArgs,
    },
    /// Continue an export from a partial output
    Resume {
        #[command(flatten)]
        export: ExportArgs,
        /// Partial output to resume from (defaults to the output path)
        #[arg(long)]
        from: Option<PathBuf>,
    },
    /// Show the tracks and samples of a container file
    Inspect {
        /// Container file to read
        file: PathBuf,
        /// Print every sample
        #[arg(long)]
        samples: bool,
    },
}

/// Inputs, output and device options shared by export and resume.
#[derive(Args, Clone)]
pub struct ExportArgs {
    /// Input URIs, concatenated into one sequence (file paths or synthetic:// URIs)
    #[arg(required_unless_present = "composition")]
    pub inputs: Vec<String>,

    /// Composition JSON file, used instead of positional inputs
    #[arg(long, conflicts_with = "inputs")]
    pub composition: Option<PathBuf>,

    /// Output file
    #[arg(short, long)]
    pub output: PathBuf,

    /// Output video MIME type
    #[arg(long)]
    pub video_mime: Option<String>,

    /// Output audio MIME type
    #[arg(long)]
    pub audio_mime: Option<String>,

    /// Output height in pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// HDR handling
    #[arg(long, value_enum, default_value = "keep")]
    pub hdr_mode: HdrArg,

    /// Drop the audio track of every input
    #[arg(long)]
    pub remove_audio: bool,

    /// Drop the video track of every input
    #[arg(long)]
    pub remove_video: bool,

    /// Replace input audio with silence
    #[arg(long)]
    pub mute_audio: bool,

    /// Simulated encoders can keep HDR content
    #[arg(long)]
    pub hdr_editing: bool,

    /// Simulated device has no GPU tone-mapping
    #[arg(long)]
    pub no_gpu_tone_mapping: bool,

    /// Simulated HDR decoders can tone-map to SDR
    #[arg(long)]
    pub decoder_tone_mapping: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HdrArg {
    Keep,
    ToneMapGl,
    ToneMapCodec,
    AsSdr,
}

impl From<HdrArg> for HdrMode {
    fn from(arg: HdrArg) -> Self {
        match arg {
            HdrArg::Keep => HdrMode::KeepHdr,
            HdrArg::ToneMapGl => HdrMode::ToneMapUsingOpenGl,
            HdrArg::ToneMapCodec => HdrMode::ToneMapUsingMediaCodec,
            HdrArg::AsSdr => HdrMode::ForceInterpretHdrAsSdr,
        }
    }
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Export { export } => run_export(export, None).await,
        Commands::Resume { export, from } => {
            let from = from.unwrap_or_else(|| export.output.clone());
            run_export(export, Some(from)).await
        }
        Commands::Inspect { file, samples } => inspect(&file, samples),
    }
}

/// Prints fallback decisions as they happen.
struct ConsoleListener;

impl ExportListener for ConsoleListener {
    fn on_fallback_applied(
        &self,
        _composition: &Composition,
        original: &TransformationRequest,
        fallback: &TransformationRequest,
    ) {
        println!("Fallback applied:");
        println!("  requested: {}", describe_request(original));
        println!("  using:     {}", describe_request(fallback));
    }
}

fn describe_request(request: &TransformationRequest) -> String {
    format!(
        "video={} audio={} height={} hdr={}",
        request.video_mime.as_deref().unwrap_or("-"),
        request.audio_mime.as_deref().unwrap_or("-"),
        request
            .output_height
            .map_or_else(|| "-".to_string(), |h| h.to_string()),
        request.hdr_mode
    )
}

/// Builds the composition from a JSON file or the positional inputs.
///
/// # Errors
/// - The composition file cannot be read or parsed
pub fn build_composition(args: &ExportArgs) -> anyhow::Result<Composition> {
    let composition = match &args.composition {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading composition {}", path.display()))?;
            serde_json::from_str::<Composition>(&json)
                .with_context(|| format!("parsing composition {}", path.display()))?
        }
        None => {
            let items = args
                .inputs
                .iter()
                .map(|uri| {
                    EditedMediaItem::from_uri(uri.as_str())
                        .with_remove_audio(args.remove_audio)
                        .with_remove_video(args.remove_video)
                        .with_mute_audio(args.mute_audio)
                })
                .collect();
            Composition::new(vec![EditedMediaItemSequence::new(items)])
        }
    };
    Ok(composition.with_hdr_mode(args.hdr_mode.into()))
}

fn build_components(args: &ExportArgs) -> TransformerComponents {
    let mut platform = SimulatedPlatform::default().with_gpu_tone_mapping(!args.no_gpu_tone_mapping);
    if args.hdr_editing {
        platform = platform.with_hdr_editing();
    }
    if args.decoder_tone_mapping {
        platform = platform.with_decoder_tone_mapping();
    }
    TransformerComponents::simulated(platform).with_settings(TransformerSettings {
        audio_mime: args.audio_mime.clone(),
        video_mime: args.video_mime.clone(),
        output_height: args.height,
        ..TransformerSettings::default()
    })
}

/// Runs one export, printing progress until it terminates.
///
/// Ctrl+C cancels the export; the partial output can be resumed later.
///
/// # Errors
/// - The composition cannot be built
/// - The export fails or the transformer stops unexpectedly
pub async fn run_export(args: ExportArgs, resume_from: Option<PathBuf>) -> anyhow::Result<()> {
    let composition = build_composition(&args)?;
    let handle = spawn_transformer(RecutConfig::from_env(), build_components(&args));
    handle.add_listener(Arc::new(ConsoleListener)).await?;

    let completion = match &resume_from {
        Some(existing) => {
            println!("Resuming {} from {}", args.output.display(), existing.display());
            handle.resume(composition, &args.output, existing).await?
        }
        None => {
            println!("Exporting to {}", args.output.display());
            handle.start(composition, &args.output).await?
        }
    };

    let wait = completion.wait();
    tokio::pin!(wait);
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut last_percent = None;
    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome?,
            _ = ticker.tick() => {
                if let ProgressState::Available(percent) = handle.progress().await?
                    && last_percent != Some(percent)
                {
                    println!("Progress: {percent}%");
                    last_percent = Some(percent);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, cancelling the export");
                println!("Cancelling...");
                handle.cancel().await?;
            }
        }
    };
    handle.shutdown().await?;

    match outcome {
        ExportOutcome::Completed(result) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
            Ok(())
        }
        ExportOutcome::Failed { error, .. } => {
            warn!("Export to {} failed: {:?}", args.output.display(), error.code);
            let error = RecutError::Export(error);
            if error.is_user_error() {
                println!("Check the inputs and composition before retrying.");
            }
            bail!(error.user_message())
        }
        ExportOutcome::Cancelled => {
            println!("Export cancelled");
            println!(
                "Use 'recut resume -o {}' with the same inputs to continue.",
                args.output.display()
            );
            Ok(())
        }
    }
}

fn print_result(result: &ExportResult) {
    println!("Export completed");
    println!("{:-<60}", "");
    if result.is_resumed() {
        println!("Resumed from a partial output");
    }
    println!("Duration: {} ms", result.duration_ms);
    if let Some(size) = result.file_size_bytes {
        println!("File size: {:.2} MB", size as f64 / 1_048_576.0);
    }
    if let (Some(width), Some(height)) = (result.width, result.height) {
        println!("Video: {width}x{height}, {} frames", result.video_frame_count);
    }
    if let Some(encoder) = &result.video_encoder_name {
        println!("  Encoder: {encoder}");
    }
    if let (Some(rate), Some(channels)) = (result.sample_rate, result.channel_count) {
        println!("Audio: {rate} Hz, {channels} channels, {} samples", result.audio_sample_count);
    }
    if let Some(encoder) = &result.audio_encoder_name {
        println!("  Encoder: {encoder}");
    }
    println!("Inputs:");
    for input in &result.processed_inputs {
        println!(
            "  {:?}: {} us, video decoder {}, audio decoder {}",
            input.source,
            input.duration_us,
            input.video_decoder_name.as_deref().unwrap_or("-"),
            input.audio_decoder_name.as_deref().unwrap_or("-")
        );
    }
}

/// Prints the layout of a container file.
///
/// # Errors
/// - The file is missing or not a container
pub fn inspect(file: &Path, samples: bool) -> anyhow::Result<()> {
    let reader = ContainerReader::open(file)
        .with_context(|| format!("opening {}", file.display()))?;

    println!("Container: {}", file.display());
    println!("{:-<60}", "");
    println!(
        "State: {}",
        if reader.is_finalized() {
            "finalized"
        } else if reader.is_truncated() {
            "partial (truncated record)"
        } else {
            "partial"
        }
    );
    println!("Duration: {} us", reader.duration_us());

    for (index, format) in reader.tracks().iter().enumerate() {
        let entries = reader.samples(index);
        let key_frames = entries.iter().filter(|s| s.flags.is_key_frame()).count();
        match format.track_type() {
            Some(TrackType::Video) => println!(
                "Track {index}: {} {}x{} @ {} fps",
                format.mime, format.width, format.height, format.frame_rate
            ),
            Some(TrackType::Audio) => println!(
                "Track {index}: {} {} Hz x{}",
                format.mime, format.sample_rate, format.channel_count
            ),
            None => println!("Track {index}: {}", format.mime),
        }
        println!(
            "  {} samples, {} key frames, ends at {} us",
            entries.len(),
            key_frames,
            reader.track_end_us(index)
        );
        if samples {
            for entry in entries {
                println!(
                    "    {:>12} us  {:>6} bytes{}",
                    entry.timestamp_us,
                    entry.data.len(),
                    if entry.flags.is_key_frame() { "  key" } else { "" }
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use recut_core::simulation::SyntheticSource;

    use super::*;

    fn args(inputs: Vec<String>, output: PathBuf) -> ExportArgs {
        ExportArgs {
            inputs,
            composition: None,
            output,
            video_mime: None,
            audio_mime: None,
            height: None,
            hdr_mode: HdrArg::Keep,
            remove_audio: false,
            remove_video: false,
            mute_audio: false,
            hdr_editing: false,
            no_gpu_tone_mapping: false,
            decoder_tone_mapping: false,
            json: false,
        }
    }

    #[test]
    fn test_positional_inputs_form_one_sequence() {
        let mut args = args(vec!["a.rcx".into(), "b.rcx".into()], "out.rcx".into());
        args.mute_audio = true;
        args.hdr_mode = HdrArg::ToneMapGl;

        let composition = build_composition(&args).unwrap();
        assert_eq!(composition.sequences.len(), 1);
        assert_eq!(composition.sequences[0].items.len(), 2);
        assert!(composition.sequences[0].items.iter().all(|i| i.mute_audio));
        assert_eq!(composition.hdr_mode, HdrMode::ToneMapUsingOpenGl);
    }

    #[test]
    fn test_composition_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("composition.json");
        let composition = Composition::single(EditedMediaItem::from_uri("clip.rcx"));
        std::fs::write(&path, serde_json::to_string(&composition).unwrap()).unwrap();

        let mut args = args(Vec::new(), "out.rcx".into());
        args.composition = Some(path);
        assert_eq!(build_composition(&args).unwrap(), composition);
    }

    #[test]
    fn test_inspect_missing_file_fails() {
        assert!(inspect(Path::new("/nonexistent/out.rcx"), false).is_err());
    }

    #[tokio::test]
    async fn test_failed_export_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.rcx");
        let missing = dir.path().join("missing.rcx");

        let result = run_export(args(vec![missing.display().to_string()], output.clone()), None).await;

        assert!(result.is_err());
        assert!(ContainerReader::open(&output).map_or(true, |r| !r.is_finalized()));
    }

    #[tokio::test]
    async fn test_export_then_inspect() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.rcx");
        let uri = SyntheticSource::new("cli").duration_ms(500).uri();

        run_export(args(vec![uri], output.clone()), None).await.unwrap();

        let reader = ContainerReader::open(&output).unwrap();
        assert!(reader.is_finalized());
        assert!(inspect(&output, true).is_ok());
    }
}
