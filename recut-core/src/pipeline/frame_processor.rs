//! Video frame processing on a dedicated rendering thread.
//!
//! The rendering thread exclusively owns the configured effect chains, the
//! way a GPU context is owned by one thread. Frames cross into it over a
//! bounded command channel and leave it through the output channel, each
//! carrying a [`TextureFence`]. The fence holds one slot of the texture pool
//! until the consumer has finished with the frame, which bounds how many
//! processed frames can be in flight.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};

use super::StageMessage;
use crate::effects::{ColorConversion, VideoEffect, VideoEffectChain, VideoStreamFormat};
use crate::error::{ErrorCode, ExportError};
use crate::media::VideoFrame;

/// Ownership of one output texture; dropping it returns the texture to the pool.
#[derive(Debug)]
pub struct TextureFence {
    _permit: OwnedSemaphorePermit,
}

impl TextureFence {
    pub(crate) fn new(permit: OwnedSemaphorePermit) -> Self {
        Self { _permit: permit }
    }

    /// Signals that the consumer no longer reads the texture.
    pub fn release(self) {}
}

/// Processed frame on the output timeline.
#[derive(Debug)]
pub struct ProcessedFrame {
    pub frame: VideoFrame,
    pub fence: TextureFence,
}

/// One input item feeding the processor.
#[derive(Debug, Clone)]
pub struct InputStreamInfo {
    pub effects: Vec<VideoEffect>,
    pub format: VideoStreamFormat,
    /// Added to every output timestamp of this stream
    pub offset_us: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameProcessorConfig {
    /// Colour conversion applied to HDR streams before their effects
    pub conversion: ColorConversion,
    pub texture_pool_size: usize,
    pub input_capacity: usize,
}

/// Applies per-item effect chains to a sequence of input streams.
#[async_trait]
pub trait FrameProcessor: Send {
    /// Starts a new input stream; frames queued afterwards use its effects.
    async fn register_input_stream(&mut self, stream: InputStreamInfo) -> Result<(), ExportError>;

    /// Queues a frame with a stream-relative timestamp, waiting while the
    /// processor input is full.
    async fn queue_input_frame(&mut self, frame: VideoFrame) -> Result<(), ExportError>;

    async fn signal_end_of_input(&mut self) -> Result<(), ExportError>;
}

pub trait FrameProcessorFactory: Send + Sync {
    fn supports_tone_mapping(&self) -> bool;

    /// Creates a processor delivering frames to `output`.
    ///
    /// # Errors
    /// - `ErrorCode::Unspecified` - The rendering thread could not start
    fn create(
        &self,
        config: FrameProcessorConfig,
        output: mpsc::Sender<StageMessage<ProcessedFrame>>,
    ) -> Result<Box<dyn FrameProcessor>, ExportError>;
}

enum Command {
    Register(InputStreamInfo),
    Frame(VideoFrame),
    EndOfInput,
}

/// CPU frame processor running effect chains on its own thread.
pub struct DefaultFrameProcessor {
    commands: mpsc::Sender<Command>,
    failure: Arc<Mutex<Option<ExportError>>>,
    pool: Arc<Semaphore>,
    input_ended: bool,
}

impl DefaultFrameProcessor {
    pub fn spawn(
        config: FrameProcessorConfig,
        output: mpsc::Sender<StageMessage<ProcessedFrame>>,
    ) -> Result<Self, ExportError> {
        let (commands, receiver) = mpsc::channel(config.input_capacity.max(1));
        let failure = Arc::new(Mutex::new(None));
        let pool = Arc::new(Semaphore::new(config.texture_pool_size.max(1)));

        let thread_failure = failure.clone();
        let thread_pool = pool.clone();
        std::thread::Builder::new()
            .name("recut-frame-processor".to_string())
            .spawn(move || {
                let mut receiver = receiver;
                if let Err(error) = render_loop(&mut receiver, output, thread_pool, config.conversion)
                {
                    tracing::warn!("Frame processor stopped: {}", error);
                    *thread_failure.lock() = Some(error);
                }
                // Senders observe the failure only once the inbox closes
                drop(receiver);
            })
            .map_err(|e| {
                ExportError::with_cause(ErrorCode::Unspecified, "cannot start frame processor", e)
            })?;

        Ok(Self {
            commands,
            failure,
            pool,
            input_ended: false,
        })
    }

    fn stopped(&self) -> ExportError {
        self.failure.lock().clone().unwrap_or_else(|| {
            ExportError::new(ErrorCode::Unspecified, "frame processor stopped")
        })
    }

    async fn send(&self, command: Command) -> Result<(), ExportError> {
        self.commands.send(command).await.map_err(|_| self.stopped())
    }
}

#[async_trait]
impl FrameProcessor for DefaultFrameProcessor {
    async fn register_input_stream(&mut self, stream: InputStreamInfo) -> Result<(), ExportError> {
        self.send(Command::Register(stream)).await
    }

    async fn queue_input_frame(&mut self, frame: VideoFrame) -> Result<(), ExportError> {
        self.send(Command::Frame(frame)).await
    }

    async fn signal_end_of_input(&mut self) -> Result<(), ExportError> {
        self.send(Command::EndOfInput).await?;
        self.input_ended = true;
        Ok(())
    }
}

impl Drop for DefaultFrameProcessor {
    fn drop(&mut self) {
        // After end of input the rendering thread drains its queue and exits
        // on its own; an abandoned processor unblocks it instead.
        if !self.input_ended {
            self.pool.close();
        }
    }
}

fn render_loop(
    commands: &mut mpsc::Receiver<Command>,
    output: mpsc::Sender<StageMessage<ProcessedFrame>>,
    pool: Arc<Semaphore>,
    conversion: ColorConversion,
) -> Result<(), ExportError> {
    let mut stream: Option<(VideoEffectChain, i64)> = None;

    while let Some(command) = commands.blocking_recv() {
        match command {
            Command::Register(info) => {
                let conversion = if info.format.color.is_transfer_hdr() {
                    conversion
                } else {
                    ColorConversion::None
                };
                let chain = VideoEffectChain::configure(&info.effects, info.format, conversion)?;
                tracing::debug!(
                    "Frame processor stream at {}us: {} effects, output {}x{}",
                    info.offset_us,
                    info.effects.len(),
                    chain.output_format().width,
                    chain.output_format().height
                );
                stream = Some((chain, info.offset_us));
            }
            Command::Frame(frame) => {
                let Some((chain, offset_us)) = stream.as_mut() else {
                    return Err(ExportError::new(
                        ErrorCode::Unspecified,
                        "frame queued before an input stream was registered",
                    ));
                };
                let Some(mut frame) = chain.apply(frame) else {
                    continue;
                };
                frame.timestamp_us += *offset_us;

                let Ok(permit) = futures::executor::block_on(pool.clone().acquire_owned()) else {
                    return Err(ExportError::new(
                        ErrorCode::Unspecified,
                        "frame processor released before end of input",
                    ));
                };
                let processed = ProcessedFrame {
                    frame,
                    fence: TextureFence::new(permit),
                };
                if output.blocking_send(StageMessage::Data(processed)).is_err() {
                    return Ok(());
                }
            }
            Command::EndOfInput => {
                let _ = output.blocking_send(StageMessage::EndOfStream);
                return Ok(());
            }
        }
    }
    Err(ExportError::new(
        ErrorCode::Unspecified,
        "frame processor released before end of input",
    ))
}

/// Creates [`DefaultFrameProcessor`]s.
#[derive(Debug, Clone)]
pub struct DefaultFrameProcessorFactory {
    tone_mapping: bool,
}

impl DefaultFrameProcessorFactory {
    pub fn new(tone_mapping: bool) -> Self {
        Self { tone_mapping }
    }
}

impl Default for DefaultFrameProcessorFactory {
    fn default() -> Self {
        Self::new(true)
    }
}

impl FrameProcessorFactory for DefaultFrameProcessorFactory {
    fn supports_tone_mapping(&self) -> bool {
        self.tone_mapping
    }

    fn create(
        &self,
        config: FrameProcessorConfig,
        output: mpsc::Sender<StageMessage<ProcessedFrame>>,
    ) -> Result<Box<dyn FrameProcessor>, ExportError> {
        Ok(Box::new(DefaultFrameProcessor::spawn(config, output)?))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::media::ColorInfo;

    fn config(pool: usize) -> FrameProcessorConfig {
        FrameProcessorConfig {
            conversion: ColorConversion::ToneMapToSdr,
            texture_pool_size: pool,
            input_capacity: 4,
        }
    }

    fn stream(color: ColorInfo, offset_us: i64) -> InputStreamInfo {
        InputStreamInfo {
            effects: vec![VideoEffect::Presentation { height: 32 }],
            format: VideoStreamFormat {
                width: 64,
                height: 64,
                frame_rate: 30.0,
                color,
            },
            offset_us,
        }
    }

    fn frame(timestamp_us: i64, color: ColorInfo) -> VideoFrame {
        VideoFrame {
            timestamp_us,
            width: 64,
            height: 64,
            color,
            pixels: Bytes::from_static(&[200; 48]),
        }
    }

    #[tokio::test]
    async fn test_frames_are_offset_and_processed() {
        let (output, mut frames) = mpsc::channel(4);
        let mut processor = DefaultFrameProcessor::spawn(config(4), output).unwrap();
        processor
            .register_input_stream(stream(ColorInfo::HDR10_PQ, 1_000_000))
            .await
            .unwrap();
        processor
            .queue_input_frame(frame(33_333, ColorInfo::HDR10_PQ))
            .await
            .unwrap();
        processor.signal_end_of_input().await.unwrap();

        let Some(StageMessage::Data(processed)) = frames.recv().await else {
            panic!("expected a frame");
        };
        assert_eq!(processed.frame.timestamp_us, 1_033_333);
        assert_eq!(processed.frame.height, 32);
        assert_eq!(processed.frame.color, ColorInfo::SDR_BT709_GAMMA22);
        assert!(matches!(frames.recv().await, Some(StageMessage::EndOfStream)));
    }

    #[tokio::test]
    async fn test_sdr_stream_skips_tone_mapping() {
        let (output, mut frames) = mpsc::channel(4);
        let mut processor = DefaultFrameProcessor::spawn(config(4), output).unwrap();
        processor
            .register_input_stream(stream(ColorInfo::SDR_BT709_LIMITED, 0))
            .await
            .unwrap();
        processor
            .queue_input_frame(frame(0, ColorInfo::SDR_BT709_LIMITED))
            .await
            .unwrap();

        let Some(StageMessage::Data(processed)) = frames.recv().await else {
            panic!("expected a frame");
        };
        assert_eq!(processed.frame.color, ColorInfo::SDR_BT709_LIMITED);
    }

    #[tokio::test]
    async fn test_texture_pool_bounds_frames_in_flight() {
        let (output, mut frames) = mpsc::channel(8);
        let mut processor = DefaultFrameProcessor::spawn(config(1), output).unwrap();
        processor
            .register_input_stream(stream(ColorInfo::SDR_BT709_LIMITED, 0))
            .await
            .unwrap();
        for i in 0..2 {
            processor
                .queue_input_frame(frame(i * 33_333, ColorInfo::SDR_BT709_LIMITED))
                .await
                .unwrap();
        }

        let Some(StageMessage::Data(first)) = frames.recv().await else {
            panic!("expected a frame");
        };
        let blocked = tokio::time::timeout(Duration::from_millis(50), frames.recv()).await;
        assert!(blocked.is_err(), "second frame must wait for the first texture");

        first.fence.release();
        let second = tokio::time::timeout(Duration::from_secs(1), frames.recv())
            .await
            .unwrap();
        assert!(matches!(second, Some(StageMessage::Data(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropping_after_end_of_input_delivers_every_frame() {
        let (output, mut frames) = mpsc::channel(4);
        let mut processor = DefaultFrameProcessor::spawn(config(2), output).unwrap();
        let producer = tokio::spawn(async move {
            processor
                .register_input_stream(stream(ColorInfo::SDR_BT709_LIMITED, 0))
                .await?;
            for i in 0..10 {
                processor
                    .queue_input_frame(frame(i * 33_333, ColorInfo::SDR_BT709_LIMITED))
                    .await?;
            }
            processor.signal_end_of_input().await?;
            drop(processor);
            Ok::<(), ExportError>(())
        });

        let mut timestamps = Vec::new();
        let mut ended = false;
        while let Some(message) =
            tokio::time::timeout(Duration::from_secs(5), frames.recv()).await.unwrap()
        {
            match message {
                StageMessage::Data(processed) => {
                    timestamps.push(processed.frame.timestamp_us);
                    processed.fence.release();
                }
                StageMessage::EndOfStream => {
                    ended = true;
                    break;
                }
            }
        }
        producer.await.unwrap().unwrap();

        assert_eq!(timestamps, (0..10).map(|i| i * 33_333).collect::<Vec<_>>());
        assert!(ended, "end of stream must follow the last frame");
    }

    #[tokio::test]
    async fn test_incompatible_effect_fails_processor() {
        let (output, _frames) = mpsc::channel(4);
        let mut processor = DefaultFrameProcessor::spawn(config(1), output).unwrap();
        let mut bad = stream(ColorInfo::SDR_BT709_LIMITED, 0);
        bad.effects = vec![VideoEffect::Crop {
            left: 0.5,
            right: 0.5,
            bottom: -1.0,
            top: 1.0,
        }];
        processor.register_input_stream(bad).await.unwrap();

        let mut error = None;
        for _ in 0..50 {
            if let Err(e) = processor
                .queue_input_frame(frame(0, ColorInfo::SDR_BT709_LIMITED))
                .await
            {
                error = Some(e);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(error.unwrap().code, ErrorCode::InvalidComposition);
    }
}
