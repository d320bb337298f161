//! Export orchestrator.
//!
//! A single actor task owns the export state machine. Callers talk to it
//! through a cloneable [`TransformerHandle`]; the running pipeline reports
//! back over an internal event channel, so every state transition and every
//! listener callback happens on the actor task, one at a time.

pub mod actor;
pub mod commands;
pub mod handle;
pub mod listener;
pub mod progress;
mod runner;

pub use actor::spawn_transformer;
pub use handle::TransformerHandle;
pub use listener::ExportListener;
pub use progress::ProgressTracker;

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::codec::CodecPlatform;
use crate::error::{ExportError, TransformerError};
use crate::extractor::ExtractorFactory;
use crate::media::{HdrMode, TransformationRequest, VideoEncoderSettings};
use crate::muxer::MuxerFactory;
use crate::pipeline::FrameProcessorFactory;
use crate::result::ExportResult;

/// Export state machine.
///
/// ```text
/// Idle -> Validating -> Exporting -> Completing -> Completed
///              |            |             |
///              v            v             v
///            Error   Error/Cancelled    Error
/// ```
///
/// `PausedForResume` is entered between validation and exporting while the
/// retained prefix of a previous output is moved aside and remuxed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportState {
    Idle,
    Validating,
    PausedForResume,
    Exporting,
    Completing,
    Completed,
    Error,
    Cancelled,
}

impl ExportState {
    /// An export is in flight; `start` is refused.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ExportState::Validating
                | ExportState::PausedForResume
                | ExportState::Exporting
                | ExportState::Completing
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExportState::Completed | ExportState::Error | ExportState::Cancelled
        )
    }

    /// Whether the state machine allows moving to `next`.
    pub fn can_transition_to(self, next: ExportState) -> bool {
        use ExportState::*;
        match (self, next) {
            (Idle | Completed | Error | Cancelled, Validating) => true,
            (Validating, PausedForResume | Exporting | Error | Cancelled) => true,
            (PausedForResume, Exporting | Error | Cancelled) => true,
            (Exporting, Completing | Error | Cancelled) => true,
            (Completing, Completed | Error) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportState::Idle => "idle",
            ExportState::Validating => "validating",
            ExportState::PausedForResume => "paused for resume",
            ExportState::Exporting => "exporting",
            ExportState::Completing => "completing",
            ExportState::Completed => "completed",
            ExportState::Error => "error",
            ExportState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Progress of the current export as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    /// No export is running
    NotStarted,
    /// Running, but the output duration is not known yet
    WaitingForAvailability,
    /// Estimated completion percentage
    Available(u8),
    /// The output duration cannot be estimated
    Unavailable,
}

/// Terminal outcome of one export, delivered exactly once.
#[derive(Debug, Clone)]
pub enum ExportOutcome {
    Completed(ExportResult),
    Failed {
        result: ExportResult,
        error: ExportError,
    },
    Cancelled,
}

impl ExportOutcome {
    pub fn result(&self) -> Option<&ExportResult> {
        match self {
            ExportOutcome::Completed(result) | ExportOutcome::Failed { result, .. } => Some(result),
            ExportOutcome::Cancelled => None,
        }
    }

    pub fn error(&self) -> Option<&ExportError> {
        match self {
            ExportOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Resolves when the export started by `start`/`resume` terminates.
#[derive(Debug)]
pub struct ExportCompletion {
    receiver: oneshot::Receiver<ExportOutcome>,
}

impl ExportCompletion {
    pub(crate) fn new(receiver: oneshot::Receiver<ExportOutcome>) -> Self {
        Self { receiver }
    }

    /// Waits for the terminal outcome.
    ///
    /// # Errors
    /// - `TransformerError::EngineShutdown` - The actor stopped before the
    ///   export terminated
    pub async fn wait(self) -> Result<ExportOutcome, TransformerError> {
        self.receiver
            .await
            .map_err(|_| TransformerError::EngineShutdown)
    }
}

/// Output settings requested by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformerSettings {
    pub audio_mime: Option<String>,
    pub video_mime: Option<String>,
    pub output_height: Option<u32>,
    pub video_encoder_settings: VideoEncoderSettings,
}

impl TransformerSettings {
    /// The request fallback events compare against.
    pub fn request(&self, hdr_mode: HdrMode) -> TransformationRequest {
        TransformationRequest {
            audio_mime: self.audio_mime.clone(),
            video_mime: self.video_mime.clone(),
            output_height: self.output_height,
            hdr_mode,
        }
    }
}

/// External collaborators of the transformer.
#[derive(Clone)]
pub struct TransformerComponents {
    pub extractor_factory: Arc<dyn ExtractorFactory>,
    pub codec_platform: Arc<dyn CodecPlatform>,
    pub frame_processor_factory: Arc<dyn FrameProcessorFactory>,
    pub muxer_factory: Arc<dyn MuxerFactory>,
    pub settings: TransformerSettings,
}

impl TransformerComponents {
    pub fn with_settings(mut self, settings: TransformerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Simulated device: synthetic and container inputs, container output.
    #[cfg(feature = "simulation")]
    pub fn simulated(platform: crate::simulation::SimulatedPlatform) -> Self {
        Self {
            extractor_factory: Arc::new(crate::extractor::DefaultExtractorFactory),
            frame_processor_factory: Arc::new(crate::pipeline::DefaultFrameProcessorFactory::new(
                platform.supports_gpu_tone_mapping(),
            )),
            codec_platform: Arc::new(platform),
            muxer_factory: Arc::new(crate::container::ContainerMuxerFactory),
            settings: TransformerSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_transitions() {
        use ExportState::*;
        assert!(Idle.can_transition_to(Validating));
        assert!(Validating.can_transition_to(Exporting));
        assert!(Exporting.can_transition_to(Completing));
        assert!(Completing.can_transition_to(Completed));
        assert!(Cancelled.can_transition_to(Validating));

        assert!(!Idle.can_transition_to(Exporting));
        assert!(!Completing.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Exporting));
    }

    #[test]
    fn test_active_states_refuse_start() {
        assert!(ExportState::Exporting.is_active());
        assert!(ExportState::PausedForResume.is_active());
        assert!(!ExportState::Cancelled.is_active());
        assert!(ExportState::Cancelled.is_terminal());
    }

    #[test]
    fn test_request_carries_settings() {
        let settings = TransformerSettings {
            video_mime: Some("video/hevc".to_string()),
            output_height: Some(720),
            ..Default::default()
        };
        let request = settings.request(HdrMode::KeepHdr);
        assert_eq!(request.video_mime.as_deref(), Some("video/hevc"));
        assert_eq!(request.output_height, Some(720));
        assert_eq!(request.audio_mime, None);
    }
}
