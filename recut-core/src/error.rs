//! Typed export errors and the per-collaborator error enums that feed them.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Actionable classification of a terminal export failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Unspecified,
    IoFileUnavailable,
    DecodingFailed,
    DecodingFormatUnsupported,
    HdrDecodingUnsupported,
    EncodingFailed,
    EncodingFormatUnsupported,
    HdrEncodingUnsupported,
    MuxingFailed,
    MuxingTimeout,
    InvalidComposition,
}

impl ErrorCode {
    /// Stable name used in logs and results.
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Unspecified => "ERROR_CODE_UNSPECIFIED",
            ErrorCode::IoFileUnavailable => "ERROR_CODE_IO_FILE_UNAVAILABLE",
            ErrorCode::DecodingFailed => "ERROR_CODE_DECODING_FAILED",
            ErrorCode::DecodingFormatUnsupported => "ERROR_CODE_DECODING_FORMAT_UNSUPPORTED",
            ErrorCode::HdrDecodingUnsupported => "ERROR_CODE_HDR_DECODING_UNSUPPORTED",
            ErrorCode::EncodingFailed => "ERROR_CODE_ENCODING_FAILED",
            ErrorCode::EncodingFormatUnsupported => "ERROR_CODE_ENCODING_FORMAT_UNSUPPORTED",
            ErrorCode::HdrEncodingUnsupported => "ERROR_CODE_HDR_ENCODING_UNSUPPORTED",
            ErrorCode::MuxingFailed => "ERROR_CODE_MUXING_FAILED",
            ErrorCode::MuxingTimeout => "ERROR_CODE_MUXING_TIMEOUT",
            ErrorCode::InvalidComposition => "ERROR_CODE_INVALID_COMPOSITION",
        }
    }

    /// Errors raised before any codec is opened.
    pub fn is_configuration_error(self) -> bool {
        matches!(
            self,
            ErrorCode::DecodingFormatUnsupported
                | ErrorCode::HdrDecodingUnsupported
                | ErrorCode::EncodingFormatUnsupported
                | ErrorCode::HdrEncodingUnsupported
                | ErrorCode::InvalidComposition
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal export failure: a code, a message and the platform cause.
///
/// Cloneable so that the same failure can be delivered to listeners, stored
/// in the [`ExportResult`](crate::ExportResult) and returned to the caller.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ExportError {
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl ExportError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        code: ErrorCode,
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }

    pub fn invalid_composition(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidComposition, message)
    }

    pub fn muxing(cause: MuxerError) -> Self {
        Self::with_cause(ErrorCode::MuxingFailed, "muxer rejected the operation", cause)
    }

    pub fn io_unavailable(uri: &str, cause: ExtractorError) -> Self {
        Self::with_cause(
            ErrorCode::IoFileUnavailable,
            format!("cannot read {uri}"),
            cause,
        )
    }
}

/// Failures reported by a platform codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Codec {name} failed to configure: {reason}")]
    ConfigurationFailed { name: String, reason: String },

    #[error("Codec {name} failed while processing: {reason}")]
    ProcessingFailed { name: String, reason: String },

    #[error("Codec {name} was used after release")]
    Released { name: String },

    #[error("Input queued after end of stream on codec {name}")]
    InputAfterEndOfStream { name: String },
}

/// Failures reported by the container writer.
#[derive(Debug, Error)]
pub enum MuxerError {
    #[error("Unsupported sample MIME type: {mime}")]
    UnsupportedMimeType { mime: String },

    #[error("Invalid track index: {index}")]
    InvalidTrack { index: usize },

    #[error("Track {track} received timestamp {timestamp_us} after {previous_us}")]
    TimestampOrder {
        track: String,
        timestamp_us: i64,
        previous_us: i64,
    },

    #[error("Track format incompatible with the existing track: {reason}")]
    IncompatibleFormat { reason: String },

    #[error("Muxer already released")]
    Released,

    #[error("Muxer I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Muxer encoding error: {reason}")]
    Encoding { reason: String },
}

/// Failures reported while demuxing an input.
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("Unsupported media URI: {uri}")]
    UnsupportedUri { uri: String },

    #[error("Invalid source parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Malformed container: {0}")]
    Container(#[from] crate::container::ContainerError),

    #[error("Extractor I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raised when an effect cannot accept the format produced by the previous one.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EffectError {
    #[error("Effect {effect} rejected its input: {reason}")]
    IncompatibleInput { effect: &'static str, reason: String },

    #[error("Effect {effect} has an invalid parameter: {reason}")]
    InvalidParameter { effect: &'static str, reason: String },
}

impl From<EffectError> for ExportError {
    fn from(error: EffectError) -> Self {
        ExportError::with_cause(
            ErrorCode::InvalidComposition,
            "effect chain is not format-consistent",
            error,
        )
    }
}

/// Errors returned by the [`TransformerHandle`](crate::TransformerHandle) itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransformerError {
    #[error("Illegal transformer state: {reason}")]
    IllegalState { reason: String },

    #[error("Transformer actor has shut down")]
    EngineShutdown,
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_error_code_names_are_prefixed() {
        for code in [
            ErrorCode::DecodingFormatUnsupported,
            ErrorCode::HdrEncodingUnsupported,
            ErrorCode::MuxingTimeout,
            ErrorCode::InvalidComposition,
        ] {
            assert!(code.name().starts_with("ERROR_CODE_"));
        }
        assert!(ErrorCode::HdrEncodingUnsupported.is_configuration_error());
        assert!(!ErrorCode::EncodingFailed.is_configuration_error());
    }

    #[test]
    fn test_export_error_preserves_cause() {
        let error = ExportError::with_cause(
            ErrorCode::EncodingFailed,
            "encoder crashed",
            CodecError::ProcessingFailed {
                name: "c2.sim.avc.encoder".to_string(),
                reason: "hardware fault".to_string(),
            },
        );

        let cloned = error.clone();
        assert_eq!(cloned.code, ErrorCode::EncodingFailed);
        let source = cloned.source().map(|s| s.to_string()).unwrap_or_default();
        assert!(source.contains("hardware fault"));
        assert_eq!(
            error.to_string(),
            "ERROR_CODE_ENCODING_FAILED: encoder crashed"
        );
    }

    #[test]
    fn test_effect_error_maps_to_invalid_composition() {
        let error: ExportError = EffectError::InvalidParameter {
            effect: "SpeedChange",
            reason: "speed must be positive".to_string(),
        }
        .into();
        assert_eq!(error.code, ErrorCode::InvalidComposition);
    }
}
