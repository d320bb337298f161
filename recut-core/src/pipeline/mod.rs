//! Track pipeline stages.
//!
//! A transcoded track runs Extractor -> Decoder -> Processor -> Encoder ->
//! Muxer-track, each stage in its own task and connected to the next by a
//! bounded channel carrying [`StageMessage`]s. A full channel or codec
//! suspends the upstream stage until the downstream one signals readiness;
//! nothing is dropped except by explicit frame-dropping effects.

pub mod audio;
pub mod compositor;
pub mod decoder;
pub mod encoder;
pub mod frame_processor;
pub mod transmux;

pub use audio::AudioMixer;
pub use compositor::VideoCompositor;
pub use decoder::{ClipWindow, DecoderReport, DecoderStage};
pub use encoder::{EncoderInput, EncoderReport, EncoderStage};
pub use frame_processor::{
    DefaultFrameProcessor, DefaultFrameProcessorFactory, FrameProcessor, FrameProcessorConfig,
    FrameProcessorFactory, InputStreamInfo, ProcessedFrame, TextureFence,
};
pub use transmux::TransmuxStage;

use std::ops::{Deref, DerefMut};

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::codec::Codec;
use crate::error::{CodecError, ErrorCode, ExportError};

/// Unit of handoff between two stages.
#[derive(Debug)]
pub enum StageMessage<T> {
    Data(T),
    /// Terminal signal; nothing follows it
    EndOfStream,
}

/// Why a stage stopped before reaching end of stream.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("Pipeline cancelled")]
    Cancelled,

    /// A neighbouring stage went away; its own result carries the cause
    #[error("Stage {stage} lost its peer before end of stream")]
    Disconnected { stage: String },

    #[error(transparent)]
    Export(#[from] ExportError),
}

impl PipelineError {
    pub(crate) fn disconnected(stage: &str) -> Self {
        PipelineError::Disconnected {
            stage: stage.to_string(),
        }
    }
}

/// Fires the paired [`CancelSignal`]s.
#[derive(Debug)]
pub struct CancelTrigger {
    sender: watch::Sender<bool>,
}

impl CancelTrigger {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Cooperative cancellation observed by every stage at its wait points.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation is triggered; never resolves if the
    /// trigger is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn cancel_pair() -> (CancelTrigger, CancelSignal) {
    let (sender, receiver) = watch::channel(false);
    (CancelTrigger { sender }, CancelSignal { receiver })
}

/// Owns a codec and releases it when dropped, including on task abort.
pub struct CodecGuard<C: ?Sized + Codec> {
    codec: Box<C>,
}

impl<C: ?Sized + Codec> CodecGuard<C> {
    pub fn new(codec: Box<C>) -> Self {
        Self { codec }
    }
}

impl<C: ?Sized + Codec> Deref for CodecGuard<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.codec
    }
}

impl<C: ?Sized + Codec> DerefMut for CodecGuard<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.codec
    }
}

impl<C: ?Sized + Codec> Drop for CodecGuard<C> {
    fn drop(&mut self) {
        tracing::debug!("Releasing codec {}", self.codec.name());
        self.codec.release();
    }
}

/// Sends `message` downstream, giving up on cancellation.
pub(crate) async fn send_or_cancel<T>(
    sender: &mpsc::Sender<StageMessage<T>>,
    message: StageMessage<T>,
    cancel: &CancelSignal,
    stage: &str,
) -> Result<(), PipelineError> {
    tokio::select! {
        result = sender.send(message) => {
            result.map_err(|_| PipelineError::disconnected(stage))
        }
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
    }
}

/// Receives the next upstream message, giving up on cancellation.
///
/// A closed channel is reported as `None`, like an end of stream without
/// the explicit signal.
pub(crate) async fn recv_or_cancel<T>(
    receiver: &mut mpsc::Receiver<StageMessage<T>>,
    cancel: &CancelSignal,
) -> Result<Option<StageMessage<T>>, PipelineError> {
    tokio::select! {
        message = receiver.recv() => Ok(message),
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
    }
}

pub(crate) fn decoding_failed(error: CodecError) -> ExportError {
    ExportError::with_cause(ErrorCode::DecodingFailed, "decoder failed", error)
}

pub(crate) fn encoding_failed(error: CodecError) -> ExportError {
    ExportError::with_cause(ErrorCode::EncodingFailed, "encoder failed", error)
}
