//! Per-run configuration snapshots.
//!
//! [`InstrumentAddresses`] and [`ExperimentPlan`] are resolved from the
//! configuration collaborator at the start of every run and never cached
//! across runs. Both validate themselves before the run may enter
//! `Connecting`.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Network addresses of the two instruments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentAddresses {
    /// Signal generator (AFG) address.
    pub generator_address: String,
    /// Digitizer (MSO) address.
    pub digitizer_address: String,
}

impl InstrumentAddresses {
    /// Checks that both addresses are present and dotted-quad IPv4.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("MSO", &self.digitizer_address)?;
        require("AFG", &self.generator_address)?;
        require_ipv4("MSO", &self.digitizer_address)?;
        require_ipv4("AFG", &self.generator_address)?;
        Ok(())
    }
}

/// Everything a single run needs to know about the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentPlan {
    /// Frequencies in MHz, swept in list order.
    pub frequencies: Vec<f64>,
    /// Frequencies strictly above this (MHz) use the two-cycle waveform.
    pub threshold: f64,
    /// Frequency (MHz) the generator is parked at after a run.
    pub reset_frequency: f64,
    /// Number of sweeps. `0` repeats until aborted.
    pub repetitions: u32,
    /// File number used as the step suffix of the first repetition.
    pub start_file_number: u32,
    /// Scan label prefixed to the step suffix.
    pub scan_label: String,
    /// Sample load in tons.
    pub load: f64,
    /// Sample temperature in kelvin.
    pub temperature: f64,
    /// Generator output amplitude in volts peak-to-peak.
    pub peak_voltage: f64,
    /// Run label (run number) used as the filename prefix.
    pub run_label: String,
    /// Beamline cycle; part of the base directory.
    pub cycle: String,
    /// Destination directory on the digitizer, with trailing separator.
    pub base_dir: String,
}

impl ExperimentPlan {
    /// Total number of repetitions, or `None` when repeating until aborted.
    pub fn total_repetitions(&self) -> Option<u32> {
        (self.repetitions > 0).then_some(self.repetitions)
    }

    /// Whether repetition `index` (1-based) belongs to this run.
    pub fn includes_repetition(&self, index: u32) -> bool {
        self.total_repetitions().map_or(true, |total| index <= total)
    }

    /// Waveform shape selection for `frequency` (MHz).
    pub fn cycle_count(&self, frequency: f64) -> CycleCount {
        CycleCount::for_frequency(frequency, self.threshold)
    }

    /// Checks the plan before a run is allowed to start.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("Cycle", &self.cycle)?;
        require("#Run", &self.run_label)?;
        if self.repetitions != 1 {
            require("Scan", &self.scan_label)?;
        }
        if self.frequencies.is_empty() {
            return Err(ValidationError::NoFrequencies);
        }
        if let Some(bad) = self
            .frequencies
            .iter()
            .find(|f| !f.is_finite() || **f <= 0.0)
        {
            return Err(ValidationError::InvalidFrequency(bad.to_string()));
        }
        if self.start_file_number < 1 {
            return Err(ValidationError::InvalidFileNumber);
        }
        Ok(())
    }
}

/// Waveform shape programmed on the generator.
///
/// `Double` selects the pre-loaded two-cycle arbitrary waveform, driven at half
/// the target frequency. The burst-cycle register is always 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleCount {
    /// Plain sine at the target frequency.
    Single,
    /// Custom two-cycle shape at half the target frequency.
    Double,
}

impl CycleCount {
    /// Two cycles strictly above `threshold`, one otherwise.
    pub fn for_frequency(frequency: f64, threshold: f64) -> Self {
        if frequency > threshold {
            CycleCount::Double
        } else {
            CycleCount::Single
        }
    }

    /// Number of cycles (1 or 2).
    pub fn count(self) -> u32 {
        match self {
            CycleCount::Single => 1,
            CycleCount::Double => 2,
        }
    }

    /// Generator frequency in Hz for a target of `frequency_mhz`.
    pub fn programmed_hz(self, frequency_mhz: f64) -> f64 {
        match self {
            CycleCount::Single => frequency_mhz * 1.0e6,
            CycleCount::Double => frequency_mhz * 1.0e6 / 2.0,
        }
    }
}

impl fmt::Display for CycleCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.count())
    }
}

/// Formats a float the way the instrument vocabulary and file names expect:
/// integral values keep one decimal (`10.0`), others print in shortest form.
pub fn format_decimal(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1.0e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty(field));
    }
    Ok(())
}

fn require_ipv4(field: &'static str, value: &str) -> Result<(), ValidationError> {
    value
        .trim()
        .parse::<Ipv4Addr>()
        .map(|_| ())
        .map_err(|_| ValidationError::InvalidIpv4(field))
}
