//! Waveform destination paths.
//!
//! Paths are rebuilt for every (repetition, frequency) pair:
//!
//! ```text
//! {base_dir}{run_label}_{load}ton_{temperature}K_{frequency}MHz_{MM.DD.YYYY_HH.MM.SS}.csv   repetitions == 1
//! {base_dir}{run_label}_{load}ton_{temperature}K_{frequency}MHz_{scan_label}{step}.csv      otherwise
//! ```
//!
//! `step` is the per-repetition file number, shared by every frequency of one
//! sweep.

use crate::plan::{format_decimal, ExperimentPlan};
use chrono::{Local, NaiveDateTime};

/// Timestamp format of single-shot file names.
pub const TIMESTAMP_FORMAT: &str = "%m.%d.%Y_%H.%M.%S";

/// Inputs of one waveform file name.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformName<'a> {
    /// Destination directory, with trailing separator.
    pub base_dir: &'a str,
    /// Run label.
    pub run_label: &'a str,
    /// Load in tons.
    pub load: f64,
    /// Temperature in kelvin.
    pub temperature: f64,
    /// Frequency in MHz.
    pub frequency: f64,
    /// Planned repetitions (`0` = until aborted).
    pub repetitions: u32,
    /// Scan label.
    pub scan_label: &'a str,
    /// Per-repetition file number.
    pub step: u32,
}

impl<'a> WaveformName<'a> {
    /// Name inputs for `frequency` during the repetition numbered `step`.
    pub fn for_plan(plan: &'a ExperimentPlan, frequency: f64, step: u32) -> Self {
        Self {
            base_dir: &plan.base_dir,
            run_label: &plan.run_label,
            load: plan.load,
            temperature: plan.temperature,
            frequency,
            repetitions: plan.repetitions,
            scan_label: &plan.scan_label,
            step,
        }
    }

    /// Path using the current local time for single-shot runs.
    pub fn build(&self) -> String {
        self.build_at(Local::now().naive_local())
    }

    /// Path using `captured_at` for single-shot runs. Deterministic.
    pub fn build_at(&self, captured_at: NaiveDateTime) -> String {
        let mut path = format!(
            "{}{}_{}ton_{}K_{}MHz",
            self.base_dir,
            self.run_label,
            format_decimal(self.load),
            format_decimal(self.temperature),
            format_decimal(self.frequency),
        );
        if self.repetitions == 1 {
            path.push('_');
            path.push_str(&captured_at.format(TIMESTAMP_FORMAT).to_string());
        } else {
            path.push_str(&format!("_{}{}", self.scan_label, self.step));
        }
        path.push_str(".csv");
        path
    }
}
