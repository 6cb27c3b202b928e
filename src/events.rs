//! Events published to the control plane.
//!
//! The worker never shares its counters; consumers see progress only through
//! these events. Feedback messages carry no timestamp; the consumer adds one.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// Collector state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorState {
    /// Waiting for a start request.
    Idle,
    /// Opening and identifying both instruments.
    Connecting,
    /// Sweeping.
    Collecting,
    /// Abort observed; restoring defaults.
    Aborting,
}

impl fmt::Display for CollectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CollectorState::Idle => "Idle",
            CollectorState::Connecting => "Connecting",
            CollectorState::Collecting => "Collecting",
            CollectorState::Aborting => "Aborting",
        };
        f.write_str(label)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every repetition completed.
    Completed,
    /// Stopped by an abort request.
    Aborted,
    /// One of the instruments could not be connected.
    ConnectFailed,
    /// The plan or addresses failed validation.
    Rejected,
}

/// Summary published when a run returns to idle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Repetitions that were started.
    pub repetitions_started: u32,
    /// Waveform files the digitizer was told to save.
    pub files_saved: u32,
    /// Wall time from start request to idle.
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

/// Everything the control plane can observe.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CollectionEvent {
    /// One line of operator feedback.
    Feedback {
        /// Message text.
        message: String,
    },
    /// A repetition started.
    Progress {
        /// 1-based repetition index.
        repetition: u32,
        /// Planned repetitions; `None` when repeating until aborted.
        total: Option<u32>,
    },
    /// The state machine moved.
    StateChanged {
        /// New state.
        state: CollectorState,
    },
    /// The run returned to idle.
    Finished {
        /// Run summary.
        summary: RunSummary,
    },
}

impl CollectionEvent {
    /// `n/N` (or `n/∞`) label for progress events.
    pub fn progress_label(repetition: u32, total: Option<u32>) -> String {
        match total {
            Some(total) => format!("{repetition}/{total}"),
            None => format!("{repetition}/∞"),
        }
    }
}

/// Publisher side of the event stream plus the watchable state.
#[derive(Debug, Clone)]
pub struct EventBus {
    events: broadcast::Sender<CollectionEvent>,
    state: watch::Sender<CollectorState>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (state, _) = watch::channel(CollectorState::Idle);
        Self { events, state }
    }

    /// New event subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<CollectionEvent> {
        self.events.subscribe()
    }

    /// New state watcher.
    pub fn watch_state(&self) -> watch::Receiver<CollectorState> {
        self.state.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> CollectorState {
        *self.state.borrow()
    }

    /// Publishes a feedback line.
    pub fn feedback(&self, message: impl Into<String>) {
        let message = message.into();
        info!(target: "feedback", "{}", message);
        self.publish(CollectionEvent::Feedback { message });
    }

    /// Publishes a repetition start.
    pub fn progress(&self, repetition: u32, total: Option<u32>) {
        debug!(
            "repetition {}",
            CollectionEvent::progress_label(repetition, total)
        );
        self.publish(CollectionEvent::Progress { repetition, total });
    }

    /// Moves the state machine and publishes the change.
    pub fn set_state(&self, state: CollectorState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!("collector state {} -> {}", previous, state);
            self.publish(CollectionEvent::StateChanged { state });
        }
    }

    /// Publishes the run summary.
    pub fn finished(&self, summary: RunSummary) {
        self.publish(CollectionEvent::Finished { summary });
    }

    fn publish(&self, event: CollectionEvent) {
        // No subscribers is fine: the run must not depend on an observer.
        let _ = self.events.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
