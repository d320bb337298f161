//! Recut Core - media export pipeline
//!
//! This crate turns a [`Composition`] of edited media sequences into a single
//! muxed output file: extraction, decoding, effect processing, encoding and
//! interleaved muxing, with capability-driven fallback and resumable exports.

pub mod capability;
pub mod codec;
pub mod config;
pub mod container;
pub mod effects;
pub mod error;
pub mod export;
pub mod extractor;
pub mod media;
pub mod muxer;
pub mod pipeline;
pub mod result;
pub mod resume;
pub mod sequence;
#[cfg(feature = "simulation")]
pub mod simulation;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::RecutConfig;
pub use error::{ErrorCode, ExportError, TransformerError};
pub use export::{
    ExportCompletion, ExportListener, ExportOutcome, ExportState, ProgressState,
    TransformerComponents, TransformerHandle, TransformerSettings, spawn_transformer,
};
pub use media::{Composition, EditedMediaItem, EditedMediaItemSequence, HdrMode, MediaItem};
pub use result::ExportResult;

/// Core errors that can bubble up from any Recut subsystem.
#[derive(Debug, thiserror::Error)]
pub enum RecutError {
    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Transformer error: {0}")]
    Transformer(#[from] TransformerError),

    #[error("Container error: {0}")]
    Container(#[from] container::ContainerError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecutError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            RecutError::Export(e) => match e.code {
                ErrorCode::IoFileUnavailable => format!("Input could not be read: {}", e.message),
                ErrorCode::InvalidComposition => format!("Invalid composition: {}", e.message),
                ErrorCode::EncodingFormatUnsupported | ErrorCode::HdrEncodingUnsupported => {
                    format!("No encoder on this device can produce the requested output: {}", e.message)
                }
                ErrorCode::DecodingFormatUnsupported | ErrorCode::HdrDecodingUnsupported => {
                    format!("An input cannot be decoded on this device: {}", e.message)
                }
                _ => format!("Export failed ({}): {}", e.code, e.message),
            },
            RecutError::Transformer(TransformerError::IllegalState { reason }) => {
                format!("Transformer is busy: {reason}")
            }
            RecutError::Transformer(TransformerError::EngineShutdown) => {
                "Transformer has shut down".to_string()
            }
            RecutError::Container(_) => "Output container is unreadable".to_string(),
            RecutError::Configuration { reason } => format!("Configuration error: {reason}"),
            RecutError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            RecutError::Configuration { .. }
                | RecutError::Export(ExportError {
                    code: ErrorCode::InvalidComposition,
                    ..
                })
        )
    }
}

pub type Result<T> = std::result::Result<T, RecutError>;
