//! Listener callbacks delivered from the transformer actor.

use crate::error::ExportError;
use crate::media::{Composition, TransformationRequest};
use crate::result::ExportResult;

/// Receives export events.
///
/// All callbacks run on the transformer actor task, one at a time and in
/// the order the events happened. Implementations should return quickly.
pub trait ExportListener: Send + Sync {
    fn on_completed(&self, _composition: &Composition, _result: &ExportResult) {}

    fn on_error(&self, _composition: &Composition, _result: &ExportResult, _error: &ExportError) {}

    /// Called at most once per export, after every output track finalized
    /// its configuration.
    fn on_fallback_applied(
        &self,
        _composition: &Composition,
        _original: &TransformationRequest,
        _fallback: &TransformationRequest,
    ) {
    }

    fn on_progress(&self, _percent: u8) {}
}
