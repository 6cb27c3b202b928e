//! Message types for the collector actor.
//!
//! The control plane never touches instruments or run counters; it only sends
//! these commands to the single worker task and reads events back.

use crate::error::CollectorError;
use crate::events::CollectorState;
use tokio::sync::oneshot;

/// Commands accepted by the collector worker.
#[derive(Debug)]
pub enum CollectorCommand {
    /// Start a run if the collector is idle.
    StartCollection {
        /// Acknowledged once the run is accepted, before it completes.
        response: oneshot::Sender<Result<(), CollectorError>>,
    },

    /// Report the current state.
    GetState {
        /// Current state.
        response: oneshot::Sender<CollectorState>,
    },

    /// Stop the worker after the current run, if any.
    Shutdown {
        /// Acknowledged when the worker loop has exited.
        response: oneshot::Sender<()>,
    },
}

impl CollectorCommand {
    /// Helper to create a StartCollection command
    pub fn start_collection() -> (Self, oneshot::Receiver<Result<(), CollectorError>>) {
        let (tx, rx) = oneshot::channel();
        (Self::StartCollection { response: tx }, rx)
    }

    /// Helper to create a GetState command
    pub fn get_state() -> (Self, oneshot::Receiver<CollectorState>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetState { response: tx }, rx)
    }

    /// Helper to create a Shutdown command
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}
