//! Command definitions for the transformer actor.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::oneshot;
use uuid::Uuid;

use super::listener::ExportListener;
use super::{ExportCompletion, ExportOutcome, ExportState, ProgressState};
use crate::capability::FallbackEvent;
use crate::error::TransformerError;
use crate::media::Composition;

/// Commands processed by the transformer actor.
///
/// Public commands carry a responder; internal notifications from a running
/// export carry the export id so that events of a finished export are
/// ignored.
pub enum TransformerCommand {
    /// Start an export, optionally resuming from a partial output.
    Start {
        composition: Box<Composition>,
        output: PathBuf,
        resume_from: Option<PathBuf>,
        responder: oneshot::Sender<Result<ExportCompletion, TransformerError>>,
    },
    /// Cancel the active export; answered once it has stopped.
    Cancel { responder: oneshot::Sender<()> },
    /// Get the progress of the active export.
    GetProgress {
        responder: oneshot::Sender<ProgressState>,
    },
    /// Get the current state of the state machine.
    GetState {
        responder: oneshot::Sender<ExportState>,
    },
    /// Register a listener for all subsequent events.
    AddListener {
        listener: Arc<dyn ExportListener>,
        responder: oneshot::Sender<()>,
    },
    /// Stop the actor, cancelling any active export first.
    Shutdown { responder: oneshot::Sender<()> },
    /// Internal: the running export moved to a new state.
    StateChanged { export_id: Uuid, state: ExportState },
    /// Internal: the progress estimate grew.
    Progress { export_id: Uuid, percent: u8 },
    /// Internal: every track finalized and the request changed.
    FallbackApplied {
        export_id: Uuid,
        event: FallbackEvent,
    },
    /// Internal: the export reached a terminal state.
    Finished {
        export_id: Uuid,
        outcome: ExportOutcome,
    },
}
