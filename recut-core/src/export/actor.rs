//! Actor implementation for the transformer.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;
use uuid::Uuid;

use super::commands::TransformerCommand;
use super::handle::TransformerHandle;
use super::listener::ExportListener;
use super::progress::ProgressTracker;
use super::runner::{ExportJob, RunnerEvents, run_export};
use super::{ExportCompletion, ExportOutcome, ExportState, ProgressState, TransformerComponents};
use crate::config::RecutConfig;
use crate::error::TransformerError;
use crate::media::Composition;
use crate::pipeline::{CancelTrigger, cancel_pair};
use crate::tracing_setup::export_span;

/// Spawns the transformer actor and returns its handle.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// use recut_core::config::RecutConfig;
/// use recut_core::simulation::SimulatedPlatform;
/// use recut_core::{Composition, EditedMediaItem, TransformerComponents, spawn_transformer};
///
/// let components = TransformerComponents::simulated(SimulatedPlatform::default());
/// let handle = spawn_transformer(RecutConfig::default(), components);
/// let composition = Composition::single(EditedMediaItem::from_uri("synthetic://clip"));
/// let completion = handle
///     .start(composition, std::path::Path::new("out.rcx"))
///     .await
///     .unwrap();
/// println!("{:?}", completion.wait().await.unwrap());
/// # }
/// ```
pub fn spawn_transformer(config: RecutConfig, components: TransformerComponents) -> TransformerHandle {
    let (sender, receiver) = mpsc::channel(100);
    let (event_sender, event_receiver) = mpsc::unbounded_channel();
    let transformer = Transformer::new(config, components, event_sender);

    tokio::spawn(async move {
        run_actor_loop(transformer, receiver, event_receiver).await;
    });

    TransformerHandle::new(sender)
}

struct ActiveExport {
    id: Uuid,
    composition: Composition,
    progress: ProgressTracker,
    cancel: CancelTrigger,
    completion: Option<oneshot::Sender<ExportOutcome>>,
    cancel_waiters: Vec<oneshot::Sender<()>>,
}

struct Transformer {
    config: Arc<RecutConfig>,
    components: TransformerComponents,
    listeners: Vec<Arc<dyn ExportListener>>,
    state: ExportState,
    active: Option<ActiveExport>,
    events: mpsc::UnboundedSender<TransformerCommand>,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl Transformer {
    fn new(
        config: RecutConfig,
        components: TransformerComponents,
        events: mpsc::UnboundedSender<TransformerCommand>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            components,
            listeners: Vec::new(),
            state: ExportState::Idle,
            active: None,
            events,
            shutdown_waiters: Vec::new(),
        }
    }

    fn transition(&mut self, next: ExportState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            tracing::warn!("Unexpected export transition {} -> {}", self.state, next);
        }
        tracing::debug!("Export state {} -> {}", self.state, next);
        self.state = next;
    }

    fn start(
        &mut self,
        composition: Composition,
        output: PathBuf,
        resume_from: Option<PathBuf>,
    ) -> Result<ExportCompletion, TransformerError> {
        if let Some(active) = &self.active {
            return Err(TransformerError::IllegalState {
                reason: format!("export {} is {}", active.id, self.state),
            });
        }

        let id = Uuid::new_v4();
        let (cancel, cancel_signal) = cancel_pair();
        let sender = self.events.clone();
        let progress = ProgressTracker::new(self.config.progress.min_step_percent, move |percent| {
            let _ = sender.send(TransformerCommand::Progress {
                export_id: id,
                percent,
            });
        });
        let (completion, receiver) = oneshot::channel();

        self.transition(ExportState::Validating);
        tracing::info!(
            "Export {} started: {} sequences -> {}{}",
            id,
            composition.sequences.len(),
            output.display(),
            resume_from
                .as_ref()
                .map(|p| format!(" (resuming {})", p.display()))
                .unwrap_or_default()
        );

        let job = ExportJob {
            composition: composition.clone(),
            output,
            resume_from,
            config: Arc::clone(&self.config),
            components: self.components.clone(),
            progress: progress.clone(),
            cancel: cancel_signal,
            events: RunnerEvents::new(id, self.events.clone()),
        };
        let events = self.events.clone();
        let span = export_span(id, &job.output);
        tokio::spawn(
            async move {
                let outcome = run_export(job).await;
                let _ = events.send(TransformerCommand::Finished {
                    export_id: id,
                    outcome,
                });
            }
            .instrument(span),
        );

        self.active = Some(ActiveExport {
            id,
            composition,
            progress,
            cancel,
            completion: Some(completion),
            cancel_waiters: Vec::new(),
        });
        Ok(ExportCompletion::new(receiver))
    }

    fn cancel(&mut self, responder: oneshot::Sender<()>) {
        let Some(active) = &mut self.active else {
            let _ = responder.send(());
            return;
        };
        if active.cancel_waiters.is_empty() {
            tracing::info!("Cancelling export {} while {}", active.id, self.state);
        }
        active.cancel.cancel();
        active.cancel_waiters.push(responder);
    }

    fn active(&self, export_id: Uuid) -> Option<&ActiveExport> {
        self.active.as_ref().filter(|a| a.id == export_id)
    }

    /// Returns false once a pending shutdown can complete.
    fn finish(&mut self, export_id: Uuid, outcome: ExportOutcome) -> bool {
        let Some(mut active) = self.active.take_if(|a| a.id == export_id) else {
            tracing::debug!("Ignoring completion of stale export {}", export_id);
            return true;
        };

        match &outcome {
            ExportOutcome::Completed(result) => {
                self.transition(ExportState::Completed);
                tracing::info!(
                    "Export {} completed: {} video frames, {} ms",
                    export_id,
                    result.video_frame_count,
                    result.duration_ms
                );
                for listener in &self.listeners {
                    listener.on_completed(&active.composition, result);
                }
            }
            ExportOutcome::Failed { result, error } => {
                self.transition(ExportState::Error);
                tracing::error!("Export {} failed: {}", export_id, error);
                for listener in &self.listeners {
                    listener.on_error(&active.composition, result, error);
                }
            }
            ExportOutcome::Cancelled => {
                self.transition(ExportState::Cancelled);
                tracing::info!("Export {} cancelled", export_id);
            }
        }

        if let Some(completion) = active.completion.take() {
            let _ = completion.send(outcome);
        }
        for waiter in active.cancel_waiters.drain(..) {
            let _ = waiter.send(());
        }

        if self.shutdown_waiters.is_empty() {
            return true;
        }
        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
        false
    }

    fn has_active_export(&self) -> bool {
        self.active.is_some()
    }
}

/// Runs the actor loop until shutdown, or until every handle is dropped and
/// no export is left running.
async fn run_actor_loop(
    mut transformer: Transformer,
    mut receiver: mpsc::Receiver<TransformerCommand>,
    mut event_receiver: mpsc::UnboundedReceiver<TransformerCommand>,
) {
    tracing::debug!("Transformer actor started");
    let mut handles_dropped = false;

    loop {
        tokio::select! {
            command = receiver.recv(), if !handles_dropped => match command {
                Some(command) => {
                    if !handle_command(&mut transformer, command) {
                        break;
                    }
                }
                None => {
                    handles_dropped = true;
                    if !transformer.has_active_export() {
                        break;
                    }
                    tracing::debug!("All handles dropped; waiting for the active export");
                }
            },
            Some(command) = event_receiver.recv() => {
                if !handle_command(&mut transformer, command) {
                    break;
                }
                if handles_dropped && !transformer.has_active_export() {
                    break;
                }
            }
            else => break,
        }
    }

    tracing::debug!("Transformer actor stopped");
}

/// Handles a single command.
/// Returns true to continue processing, false to shutdown.
fn handle_command(transformer: &mut Transformer, command: TransformerCommand) -> bool {
    match command {
        TransformerCommand::Start {
            composition,
            output,
            resume_from,
            responder,
        } => {
            let result = transformer.start(*composition, output, resume_from);
            let _ = responder.send(result);
        }

        TransformerCommand::Cancel { responder } => transformer.cancel(responder),

        TransformerCommand::GetProgress { responder } => {
            let progress = transformer
                .active
                .as_ref()
                .map_or(ProgressState::NotStarted, |a| a.progress.state());
            let _ = responder.send(progress);
        }

        TransformerCommand::GetState { responder } => {
            let _ = responder.send(transformer.state);
        }

        TransformerCommand::AddListener {
            listener,
            responder,
        } => {
            transformer.listeners.push(listener);
            let _ = responder.send(());
        }

        TransformerCommand::Shutdown { responder } => {
            if !transformer.has_active_export() {
                tracing::debug!("Transformer actor shutting down");
                let _ = responder.send(());
                return false;
            }
            tracing::debug!("Transformer actor shutting down after the active export");
            transformer.shutdown_waiters.push(responder);
            if let Some(active) = &transformer.active {
                active.cancel.cancel();
            }
        }

        TransformerCommand::StateChanged { export_id, state } => {
            if transformer.active(export_id).is_some() {
                transformer.transition(state);
            }
        }

        TransformerCommand::Progress { export_id, percent } => {
            if transformer.active(export_id).is_some() {
                tracing::trace!("Export {} progress {}%", export_id, percent);
                for listener in &transformer.listeners {
                    listener.on_progress(percent);
                }
            }
        }

        TransformerCommand::FallbackApplied { export_id, event } => {
            if let Some(active) = transformer.active(export_id) {
                tracing::info!(
                    "Fallback applied: requested {}, using {}",
                    event.original,
                    event.fallback
                );
                for listener in &transformer.listeners {
                    listener.on_fallback_applied(&active.composition, &event.original, &event.fallback);
                }
            }
        }

        TransformerCommand::Finished { export_id, outcome } => {
            return transformer.finish(export_id, outcome);
        }
    }

    true
}
