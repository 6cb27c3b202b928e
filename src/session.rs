//! Per-run mutable state and the cross-context abort flag.

use crate::plan::ExperimentPlan;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag.
///
/// The only state written from outside the worker. Clones share the flag.
/// The worker arms it when it accepts a run, before the run task starts,
/// so a control-plane abort sent right after an accepted start is kept.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag {
    requested: Arc<AtomicBool>,
    armed: Arc<AtomicBool>,
}

impl AbortFlag {
    /// A cleared, disarmed flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of the current run.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Requests cancellation only while a run is accepted. Returns whether
    /// the request was recorded.
    pub fn request_if_armed(&self) -> bool {
        if !self.armed.load(Ordering::Acquire) {
            return false;
        }
        self.request();
        true
    }

    /// Whether cancellation was requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Whether a run has been accepted and not yet finished.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Marks a run as accepted. Drops any stale request.
    pub fn arm(&self) {
        self.requested.store(false, Ordering::Release);
        self.armed.store(true, Ordering::Release);
    }

    /// Clears the flag once the run is back to idle.
    pub fn clear(&self) {
        self.armed.store(false, Ordering::Release);
        self.requested.store(false, Ordering::Release);
    }
}

/// State of one run, owned by the worker.
#[derive(Debug)]
pub struct CollectionSession {
    /// 1-based index of the repetition being collected.
    pub current_repetition: u32,
    /// Step suffix used for the files of the current repetition.
    pub current_file_number: u32,
    /// Shared cancellation flag.
    pub abort: AbortFlag,
    /// Both instruments connected and identified.
    pub connected: bool,
}

impl CollectionSession {
    /// Fresh session for `plan`.
    pub fn new(plan: &ExperimentPlan, abort: AbortFlag) -> Self {
        Self {
            current_repetition: 1,
            current_file_number: plan.start_file_number,
            abort,
            connected: false,
        }
    }

    /// Whether cancellation was requested.
    pub fn abort_requested(&self) -> bool {
        self.abort.is_requested()
    }

    /// Moves to the next repetition; file numbers advance once per repetition.
    pub fn advance(&mut self) {
        self.current_repetition += 1;
        self.current_file_number += 1;
    }
}
