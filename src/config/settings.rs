//! Figment-backed application settings.

use crate::error::{AppResult, DaqError};
use crate::instrument::CommandSet;
use crate::plan::{ExperimentPlan, InstrumentAddresses};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Prefix of environment overrides (`ULTRA_DAQ_TIMING__SETTLE=500ms`).
pub const ENV_PREFIX: &str = "ULTRA_DAQ_";

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Process-level settings.
    pub application: ApplicationConfig,
    /// Instrument addresses and beamline identity.
    pub setup: SetupConfig,
    /// Sweep parameters.
    pub experiment: ExperimentConfig,
    /// Link transport.
    pub transport: TransportConfig,
    /// Poll and settle intervals.
    pub timing: TimingConfig,
    /// Instrument command tables.
    pub commands: CommandSet,
}

/// Application-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name, used in logs.
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
    /// `pretty` or `json`.
    pub log_format: String,
    /// Feedback journal file. No journal when absent.
    pub journal_path: Option<String>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "U-Measure".into(),
            log_level: "info".into(),
            log_format: "pretty".into(),
            journal_path: None,
        }
    }
}

/// Instruments and the destination directory layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    /// Digitizer (MSO) IPv4 address.
    pub digitizer_address: String,
    /// Signal generator (AFG) IPv4 address.
    pub generator_address: String,
    /// Data root on the digitizer's filesystem.
    pub data_root: String,
    /// Beamline hutch.
    pub hutch: String,
    /// Beamline cycle.
    pub cycle: String,
    /// Institution directory.
    pub institution: String,
    /// Run label (run number).
    pub run_label: String,
    /// Generator output amplitude, Vpp.
    pub peak_voltage: f64,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            digitizer_address: "164.54.160.105".into(),
            generator_address: "164.54.160.117".into(),
            data_root: "C:/Data".into(),
            hutch: "13BMD".into(),
            cycle: "2022-2".into(),
            institution: "GSECARS".into(),
            run_label: "D2711".into(),
            peak_voltage: 2.0,
        }
    }
}

impl SetupConfig {
    /// `{data_root}/{hutch}/{cycle}/{institution}/{run_label}/`.
    ///
    /// Kept as a string: the path lives on the digitizer, not on this host.
    pub fn base_dir(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}/",
            self.data_root.trim_end_matches(['/', '\\']),
            self.hutch,
            self.cycle,
            self.institution,
            self.run_label
        )
    }
}

/// Sweep parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Frequencies in MHz, swept in order.
    pub frequencies: Vec<f64>,
    /// Two-cycle threshold, MHz.
    pub threshold: f64,
    /// Frequency the generator is parked at after a run, MHz.
    pub reset_frequency: f64,
    /// Number of sweeps; `0` repeats until aborted.
    pub repetitions: u32,
    /// First file number.
    pub start_file_number: u32,
    /// Scan label.
    pub scan_label: String,
    /// Load in tons.
    pub load: f64,
    /// Temperature in kelvin.
    pub temperature: f64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            frequencies: vec![20.0, 30.0, 40.0, 50.0, 60.0],
            threshold: 27.0,
            reset_frequency: 30.0,
            repetitions: 1,
            start_file_number: 1,
            scan_label: "A".into(),
            load: 1.0,
            temperature: 1.0,
        }
    }
}

/// Which link implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Raw SCPI over a TCP socket.
    Tcp,
    /// System VISA library (`instrument_visa` feature).
    Visa,
    /// Scripted in-process instruments.
    Mock,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Visa => write!(f, "visa"),
            TransportKind::Mock => write!(f, "mock"),
        }
    }
}

/// Link transport configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Transport implementation.
    pub kind: TransportKind,
    /// Raw-socket SCPI port.
    pub port: u16,
    /// Connection timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Per-query response timeout.
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Tcp,
            port: 4000,
            connect_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(10),
        }
    }
}

/// Acquisition timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Sleep between acquisition-state polls.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Wait after the capture completes, before saving.
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
    /// Wait after the save command, before the next frequency.
    #[serde(with = "humantime_serde")]
    pub trailing_settle: Duration,
    /// Give up after this many polls. Unbounded when absent.
    pub max_poll_iterations: Option<u32>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            settle: Duration::from_secs(2),
            trailing_settle: Duration::from_secs(2),
            max_poll_iterations: None,
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["pretty", "json"];

impl Settings {
    /// Loads [`DEFAULT_CONFIG_PATH`] (if present) and environment overrides.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads settings in order of increasing precedence: built-in defaults,
    /// the TOML file at `path` (a missing file is skipped), `ULTRA_DAQ_*`
    /// environment variables. Validates the result.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The layered figment, before extraction.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Checks values serde cannot check.
    pub fn validate(&self) -> AppResult<()> {
        if !LOG_LEVELS.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        if !LOG_FORMATS.contains(&self.application.log_format.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                LOG_FORMATS.join(", ")
            )));
        }
        if self.timing.poll_interval.is_zero() {
            return Err(DaqError::Configuration(
                "timing.poll_interval must be greater than zero".into(),
            ));
        }
        if self.timing.max_poll_iterations == Some(0) {
            return Err(DaqError::Configuration(
                "timing.max_poll_iterations must be at least 1 (omit it for no bound)".into(),
            ));
        }
        if self.transport.kind == TransportKind::Tcp && self.transport.port == 0 {
            return Err(DaqError::Configuration(
                "transport.port must be non-zero".into(),
            ));
        }
        #[cfg(not(feature = "instrument_visa"))]
        if self.transport.kind == TransportKind::Visa {
            return Err(DaqError::FeatureNotEnabled("instrument_visa".into()));
        }
        Ok(())
    }

    /// Instrument addresses for the next run.
    pub fn addresses(&self) -> InstrumentAddresses {
        InstrumentAddresses {
            generator_address: self.setup.generator_address.clone(),
            digitizer_address: self.setup.digitizer_address.clone(),
        }
    }

    /// Sweep plan for the next run.
    pub fn plan(&self) -> ExperimentPlan {
        let experiment = &self.experiment;
        ExperimentPlan {
            frequencies: experiment.frequencies.clone(),
            threshold: experiment.threshold,
            reset_frequency: experiment.reset_frequency,
            repetitions: experiment.repetitions,
            start_file_number: experiment.start_file_number,
            scan_label: experiment.scan_label.clone(),
            load: experiment.load,
            temperature: experiment.temperature,
            peak_voltage: self.setup.peak_voltage,
            run_label: self.setup.run_label.clone(),
            cycle: self.setup.cycle.clone(),
            base_dir: self.setup.base_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.transport.port, 4000);
        assert_eq!(settings.timing.poll_interval, Duration::from_secs(1));
        assert!(settings.timing.max_poll_iterations.is_none());
    }

    #[test]
    fn test_base_dir_layout() {
        let setup = SetupConfig::default();
        assert_eq!(setup.base_dir(), "C:/Data/13BMD/2022-2/GSECARS/D2711/");

        let setup = SetupConfig {
            data_root: "D:/Ultrasonic/".into(),
            ..SetupConfig::default()
        };
        assert_eq!(setup.base_dir(), "D:/Ultrasonic/13BMD/2022-2/GSECARS/D2711/");
    }

    #[test]
    fn test_plan_snapshot() {
        let plan = Settings::default().plan();
        assert_eq!(plan.frequencies, vec![20.0, 30.0, 40.0, 50.0, 60.0]);
        assert_eq!(plan.threshold, 27.0);
        assert_eq!(plan.peak_voltage, 2.0);
        assert_eq!(plan.run_label, "D2711");
        plan.validate().unwrap();
        Settings::default().addresses().validate().unwrap();
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[setup]
run_label = "D3000"

[experiment]
frequencies = [60.0, 20.0, 45.0]
repetitions = 3
scan_label = "B"

[timing]
poll_interval = "250ms"
settle = "1s"
max_poll_iterations = 600

[transport]
kind = "mock"
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.experiment.frequencies, vec![60.0, 20.0, 45.0]);
        assert_eq!(settings.experiment.repetitions, 3);
        assert_eq!(settings.timing.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.timing.max_poll_iterations, Some(600));
        assert_eq!(settings.transport.kind, TransportKind::Mock);
        // untouched sections keep their defaults
        assert_eq!(settings.setup.hutch, "13BMD");
        assert_eq!(settings.timing.trailing_settle, Duration::from_secs(2));
        assert_eq!(
            settings.plan().base_dir,
            "C:/Data/13BMD/2022-2/GSECARS/D3000/"
        );
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ULTRA_DAQ_SETUP__CYCLE", "2023-1");
            jail.set_env("ULTRA_DAQ_TIMING__SETTLE", "500ms");
            let settings: Settings = Settings::figment(Path::new("absent.toml")).extract()?;
            assert_eq!(settings.setup.cycle, "2023-1");
            assert_eq!(settings.timing.settle, Duration::from_millis(500));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".into();
        assert!(matches!(settings.validate(), Err(DaqError::Configuration(_))));

        let mut settings = Settings::default();
        settings.application.log_format = "xml".into();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.timing.poll_interval = Duration::ZERO;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.timing.max_poll_iterations = Some(0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_command_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[commands.digitizer]
channel = "ch2"
"#
        )
        .unwrap();
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.commands.digitizer.channel, "ch2");
        assert_eq!(settings.commands.digitizer.run, ":acquire:state run");
    }
}
