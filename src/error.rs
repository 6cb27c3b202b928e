//! Custom error types for the application.
//!
//! This module defines the error taxonomy of the acquisition core. Using the
//! `thiserror` crate, it provides a centralized and consistent way to handle
//! the different things that can go wrong between the configuration layer and
//! the two instruments.
//!
//! ## Error Hierarchy
//!
//! - **`DaqError`**: application-level errors (configuration loading, I/O,
//!   worker lifecycle). This is what the binary and the collector handle see.
//! - **`ConnectError`**: one of the instrument links failed to open or to answer
//!   the identification query. Fatal for the run, never retried.
//! - **`LinkError`**: a single write or query on an open link failed.
//! - **`AcquireError`**: a capture or save step failed. Reported and skipped;
//!   the sweep continues with the next frequency.
//! - **`ValidationError`**: the plan or the addresses are not acceptable. Caught
//!   before the run enters `Connecting`.
//!
//! Instrument-facing errors are converted into feedback events at the point of
//! use; none of them escape the worker loop.

use crate::instrument::InstrumentRole;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Application-level error.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but holds an unusable value.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File or network I/O failure outside of an instrument link.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Worker lifecycle problem (start/stop/shutdown).
    #[error(transparent)]
    Collector(#[from] CollectorError),

    /// A code path requires a cargo feature that was not compiled in.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

/// Failure to establish an instrument link.
///
/// Carries a human-readable description and, when the transport reports one,
/// the numeric code (VISA status, OS error number).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{role} connection to {address} failed: {description} ({})", code_label(.code))]
pub struct ConnectError {
    /// Which instrument failed.
    pub role: InstrumentRole,
    /// Address the link attempted to open.
    pub address: String,
    /// Description reported by the transport.
    pub description: String,
    /// Transport or instrument reported error code.
    pub code: Option<i64>,
}

impl ConnectError {
    /// Builds a connect error for `role` at `address`.
    pub fn new(
        role: InstrumentRole,
        address: impl Into<String>,
        description: impl Into<String>,
        code: Option<i64>,
    ) -> Self {
        Self {
            role,
            address: address.into(),
            description: description.into(),
            code,
        }
    }

    /// Converts a link failure during identification into a connect error.
    pub fn from_link(role: InstrumentRole, address: impl Into<String>, err: &LinkError) -> Self {
        let code = match err {
            LinkError::Io { code, .. } => *code,
            _ => None,
        };
        Self::new(role, address, err.to_string(), code)
    }
}

fn code_label(code: &Option<i64>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "no code".to_string(),
    }
}

/// Failure of a single command on an open link.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    /// Transport-level I/O failure.
    #[error("I/O failure: {message}")]
    Io {
        /// Transport error message.
        message: String,
        /// OS or VISA error code, if any.
        code: Option<i64>,
    },

    /// The instrument did not answer within the configured latency.
    #[error("no response to '{command}' within {timeout_ms}ms")]
    Timeout {
        /// Command that timed out.
        command: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The peer closed the connection.
    #[error("connection closed by instrument")]
    Closed,

    /// The command was refused by the instrument (or by a test double).
    #[error("command '{0}' rejected")]
    Rejected(String),

    /// A command template could not be rendered.
    #[error("command template '{template}' could not be rendered: {reason}")]
    Template {
        /// Offending template.
        template: String,
        /// Formatter message.
        reason: String,
    },

    /// A query answered with something we could not interpret.
    #[error("unexpected response to '{command}': '{response}'")]
    UnexpectedResponse {
        /// Query that was sent.
        command: String,
        /// Raw response text.
        response: String,
    },
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Io {
            message: err.to_string(),
            code: err.raw_os_error().map(i64::from),
        }
    }
}

/// Failure while capturing or saving a waveform.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquireError {
    /// The digitizer link failed.
    #[error("digitizer link error: {0}")]
    Link(#[from] LinkError),

    /// The acquisition never reported idle within the configured poll bound.
    #[error("acquisition still running after {polls} polls")]
    PollLimit {
        /// Number of polls issued before giving up.
        polls: u32,
    },
}

/// A plan or address set that must not start a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required text field is blank.
    #[error("The {0} field can't be empty.")]
    Empty(&'static str),

    /// An address is not a dotted-quad IPv4.
    #[error("The {0} must be a valid IPv4.")]
    InvalidIpv4(&'static str),

    /// No frequencies were configured.
    #[error("The frequency list can't be empty.")]
    NoFrequencies,

    /// A frequency is zero, negative or not finite.
    #[error("Frequency {0} MHz is not a positive number.")]
    InvalidFrequency(String),

    /// The first file number must be at least 1.
    #[error("The file number must be at least 1.")]
    InvalidFileNumber,
}

/// Control-plane errors from the collector handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectorError {
    /// A run is already in progress.
    #[error("a collection is already running")]
    Busy,

    /// The worker task is gone.
    #[error("collector worker is not running")]
    WorkerStopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_display() {
        let err = ConnectError::new(
            InstrumentRole::Digitizer,
            "164.54.160.105",
            "resource not found",
            Some(-1073807343),
        );
        assert_eq!(
            err.to_string(),
            "digitizer connection to 164.54.160.105 failed: resource not found (-1073807343)."
        );
    }

    #[test]
    fn test_connect_error_without_code() {
        let err = ConnectError::new(InstrumentRole::Generator, "10.0.0.2", "refused", None);
        assert!(err.to_string().ends_with("(no code)."));
    }

    #[test]
    fn test_connect_error_keeps_io_code() {
        let link = LinkError::Io {
            message: "broken pipe".into(),
            code: Some(32),
        };
        let err = ConnectError::from_link(InstrumentRole::Generator, "10.0.0.2", &link);
        assert_eq!(err.code, Some(32));
        assert!(err.description.contains("broken pipe"));
    }

    #[test]
    fn test_validation_messages() {
        assert_eq!(
            ValidationError::Empty("Cycle").to_string(),
            "The Cycle field can't be empty."
        );
        assert_eq!(
            ValidationError::InvalidIpv4("MSO").to_string(),
            "The MSO must be a valid IPv4."
        );
    }

    #[test]
    fn test_acquire_error_wraps_link() {
        let err: AcquireError = LinkError::Closed.into();
        assert_eq!(err.to_string(), "digitizer link error: connection closed by instrument");
    }
}
