//! Handle for communicating with the transformer actor.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::commands::TransformerCommand;
use super::listener::ExportListener;
use super::{ExportCompletion, ExportState, ProgressState};
use crate::error::TransformerError;
use crate::media::Composition;

/// Handle for communicating with the transformer actor.
///
/// Cheap to clone; every clone talks to the same actor and therefore the
/// same single export slot.
#[derive(Clone)]
pub struct TransformerHandle {
    sender: mpsc::Sender<TransformerCommand>,
}

impl TransformerHandle {
    pub fn new(sender: mpsc::Sender<TransformerCommand>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        command: TransformerCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, TransformerError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| TransformerError::EngineShutdown)?;
        rx.await.map_err(|_| TransformerError::EngineShutdown)
    }

    /// Starts exporting `composition` to `output`.
    ///
    /// Returns once the export is accepted; the returned completion resolves
    /// with its terminal outcome.
    ///
    /// # Errors
    /// - `TransformerError::IllegalState` - Another export is active
    /// - `TransformerError::EngineShutdown` - The actor has stopped
    pub async fn start(
        &self,
        composition: Composition,
        output: &Path,
    ) -> Result<ExportCompletion, TransformerError> {
        let (responder, rx) = oneshot::channel();
        let cmd = TransformerCommand::Start {
            composition: Box::new(composition),
            output: output.to_path_buf(),
            resume_from: None,
            responder,
        };
        self.request(cmd, rx).await?
    }

    /// Exports `composition` to `output`, keeping what a previous partial
    /// export left in `existing_output`.
    ///
    /// `existing_output` may equal `output`; the partial file is then moved
    /// aside before the new output is created. Falls back to a full export
    /// when the partial file cannot be used.
    ///
    /// # Errors
    /// - `TransformerError::IllegalState` - Another export is active
    /// - `TransformerError::EngineShutdown` - The actor has stopped
    pub async fn resume(
        &self,
        composition: Composition,
        output: &Path,
        existing_output: &Path,
    ) -> Result<ExportCompletion, TransformerError> {
        let (responder, rx) = oneshot::channel();
        let cmd = TransformerCommand::Start {
            composition: Box::new(composition),
            output: output.to_path_buf(),
            resume_from: Some(existing_output.to_path_buf()),
            responder,
        };
        self.request(cmd, rx).await?
    }

    /// Cancels the active export and waits until it has released its codecs
    /// and the muxer. Does nothing when no export is active; calling it
    /// again while a cancellation is in progress waits for the same one.
    ///
    /// # Errors
    /// - `TransformerError::EngineShutdown` - The actor has stopped
    pub async fn cancel(&self) -> Result<(), TransformerError> {
        let (responder, rx) = oneshot::channel();
        self.request(TransformerCommand::Cancel { responder }, rx)
            .await
    }

    /// Progress of the active export.
    ///
    /// # Errors
    /// - `TransformerError::EngineShutdown` - The actor has stopped
    pub async fn progress(&self) -> Result<ProgressState, TransformerError> {
        let (responder, rx) = oneshot::channel();
        self.request(TransformerCommand::GetProgress { responder }, rx)
            .await
    }

    /// # Errors
    /// - `TransformerError::EngineShutdown` - The actor has stopped
    pub async fn state(&self) -> Result<ExportState, TransformerError> {
        let (responder, rx) = oneshot::channel();
        self.request(TransformerCommand::GetState { responder }, rx)
            .await
    }

    /// Registers `listener` for the events of subsequent exports.
    ///
    /// # Errors
    /// - `TransformerError::EngineShutdown` - The actor has stopped
    pub async fn add_listener(
        &self,
        listener: Arc<dyn ExportListener>,
    ) -> Result<(), TransformerError> {
        let (responder, rx) = oneshot::channel();
        self.request(TransformerCommand::AddListener { listener, responder }, rx)
            .await
    }

    /// Stops the actor after cancelling any active export.
    ///
    /// # Errors
    /// - `TransformerError::EngineShutdown` - The actor has already stopped
    pub async fn shutdown(&self) -> Result<(), TransformerError> {
        let (responder, rx) = oneshot::channel();
        self.request(TransformerCommand::Shutdown { responder }, rx)
            .await
    }
}
