//! The collection worker and its control-plane handle.
//!
//! All instrument I/O happens on the run task spawned by [`CollectorActor`];
//! at most one run exists at a time. The handle sends [`CollectorCommand`]s,
//! sets the abort flag, and reads events. It never mutates run state.

use crate::error::CollectorError;
use crate::events::{CollectionEvent, CollectorState, EventBus, RunSummary};
use crate::messages::CollectorCommand;
use crate::orchestrator::CollectionOrchestrator;
use crate::session::AbortFlag;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const COMMAND_CAPACITY: usize = 32;

/// Actor owning the orchestrator.
pub struct CollectorActor {
    orchestrator: Arc<CollectionOrchestrator>,
    current: Option<JoinHandle<RunSummary>>,
}

impl CollectorActor {
    /// Wraps `orchestrator`.
    pub fn new(orchestrator: CollectionOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            current: None,
        }
    }

    /// Processes commands until shutdown or until every handle is dropped.
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<CollectorCommand>) {
        info!("collector worker started");

        while let Some(command) = command_rx.recv().await {
            match command {
                CollectorCommand::StartCollection { response } => {
                    let result = self.start_collection();
                    let _ = response.send(result);
                }

                CollectorCommand::GetState { response } => {
                    let _ = response.send(self.orchestrator.events().state());
                }

                CollectorCommand::Shutdown { response } => {
                    info!("shutdown command received");
                    self.shutdown().await;
                    let _ = response.send(());
                    break;
                }
            }
        }

        info!("collector worker stopped");
    }

    fn is_busy(&self) -> bool {
        let running = self
            .current
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        running || self.orchestrator.events().state() != CollectorState::Idle
    }

    fn start_collection(&mut self) -> Result<(), CollectorError> {
        if self.is_busy() {
            debug!("start ignored: run in progress");
            return Err(CollectorError::Busy);
        }
        self.orchestrator.abort_flag().arm();
        let orchestrator = self.orchestrator.clone();
        self.current = Some(tokio::spawn(async move { orchestrator.run().await }));
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(handle) = self.current.take() {
            if !handle.is_finished() {
                info!("aborting active run before shutdown");
                self.orchestrator.abort_flag().request();
            }
            if let Err(e) = handle.await {
                error!("collection run task failed: {}", e);
            }
        }
    }
}

/// Cloneable control-plane handle.
#[derive(Clone)]
pub struct CollectorHandle {
    commands: mpsc::Sender<CollectorCommand>,
    abort: AbortFlag,
    events: EventBus,
}

impl CollectorHandle {
    /// Spawns the worker on the current Tokio runtime.
    pub fn spawn(orchestrator: CollectionOrchestrator) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let handle = Self {
            commands: tx,
            abort: orchestrator.abort_flag(),
            events: orchestrator.events().clone(),
        };
        let task = tokio::spawn(CollectorActor::new(orchestrator).run(rx));
        (handle, task)
    }

    /// Requests a run. Fails with [`CollectorError::Busy`] unless idle.
    pub async fn start(&self) -> Result<(), CollectorError> {
        let (command, rx) = CollectorCommand::start_collection();
        self.send(command).await?;
        rx.await.map_err(|_| CollectorError::WorkerStopped)?
    }

    /// Starts a run and waits for its summary.
    pub async fn collect(&self) -> Result<RunSummary, CollectorError> {
        let mut events = self.subscribe();
        self.start().await?;
        loop {
            match events.recv().await {
                Ok(CollectionEvent::Finished { summary }) => return Ok(summary),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!("collect() lagged by {} events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(CollectorError::WorkerStopped)
                }
            }
        }
    }

    /// Requests cancellation of the active run. Ignored while idle; returns
    /// whether the request was recorded.
    ///
    /// A run counts as active from the moment the worker accepts `start`, so
    /// an abort sent right after `start()` returns is never lost.
    pub fn abort(&self) -> bool {
        if !self.abort.request_if_armed() {
            debug!("abort ignored: collector idle");
            return false;
        }
        info!("abort requested");
        true
    }

    /// New event subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<CollectionEvent> {
        self.events.subscribe()
    }

    /// New state watcher.
    pub fn watch_state(&self) -> watch::Receiver<CollectorState> {
        self.events.watch_state()
    }

    /// Current state, asked of the worker.
    pub async fn state(&self) -> Result<CollectorState, CollectorError> {
        let (command, rx) = CollectorCommand::get_state();
        self.send(command).await?;
        rx.await.map_err(|_| CollectorError::WorkerStopped)
    }

    /// Aborts any active run, waits for it to restore defaults, and stops
    /// the worker.
    pub async fn shutdown(&self) -> Result<(), CollectorError> {
        let (command, rx) = CollectorCommand::shutdown();
        self.send(command).await?;
        rx.await.map_err(|_| CollectorError::WorkerStopped)
    }

    async fn send(&self, command: CollectorCommand) -> Result<(), CollectorError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CollectorError::WorkerStopped)
    }
}
