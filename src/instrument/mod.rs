//! Instrument links.
//!
//! An instrument is treated as a textual command channel plus a textual query
//! channel with a bounded response latency. The transport (raw SCPI socket,
//! VISA, or the scripted mock) is chosen by configuration; everything above this
//! module only sees [`InstrumentLink`] and [`LinkConnector`].
//!
//! ```text
//! LinkConnector::connect(role, address) --> Box<dyn InstrumentLink>
//!                                              |  write("...")
//!                                              |  query("...?") -> String
//! ```

pub mod commands;
pub mod mock;
pub mod tcp;
pub mod visa;

use crate::error::{ConnectError, LinkError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

pub use commands::{CommandSet, DigitizerCommands, GeneratorCommands};

/// Standard identification query.
pub const IDENTIFY: &str = "*IDN?";

/// Which of the two instruments a link talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentRole {
    /// Waveform source (AFG).
    Generator,
    /// Capturing oscilloscope (MSO).
    Digitizer,
}

impl fmt::Display for InstrumentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentRole::Generator => write!(f, "generator"),
            InstrumentRole::Digitizer => write!(f, "digitizer"),
        }
    }
}

/// An open connection to one instrument.
///
/// Links are owned exclusively by the collection worker; no other context
/// issues commands on them.
#[async_trait]
pub trait InstrumentLink: Send {
    /// Sends a command that produces no response.
    async fn write(&mut self, command: &str) -> Result<(), LinkError>;

    /// Sends a query and returns the trimmed response.
    async fn query(&mut self, command: &str) -> Result<String, LinkError>;

    /// Short description for logs (transport and address).
    fn describe(&self) -> String;

    /// Queries the instrument identity.
    async fn identify(&mut self) -> Result<String, LinkError> {
        self.query(IDENTIFY).await
    }
}

/// Opens links to instruments by address.
#[async_trait]
pub trait LinkConnector: Send + Sync {
    /// Opens a link to the instrument at `address`. Never retries.
    async fn connect(
        &self,
        role: InstrumentRole,
        address: &str,
    ) -> Result<Box<dyn InstrumentLink>, ConnectError>;
}

/// A link that answered identification, plus its identity string.
pub struct IdentifiedLink {
    /// The open link.
    pub link: Box<dyn InstrumentLink>,
    /// Response to `*IDN?`.
    pub identity: String,
}

/// Connects and immediately identifies the instrument.
///
/// A link that opens but does not answer `*IDN?` counts as a connect failure.
pub async fn connect_identified(
    connector: &dyn LinkConnector,
    role: InstrumentRole,
    address: &str,
) -> Result<IdentifiedLink, ConnectError> {
    let mut link = connector.connect(role, address).await?;
    let identity = link
        .identify()
        .await
        .map_err(|e| ConnectError::from_link(role, address, &e))?;
    info!("{} at {} identified as '{}'", role, link.describe(), identity);
    Ok(IdentifiedLink { link, identity })
}

/// Interprets a boolean-ish query response.
///
/// Only the first token is considered; numeric tokens are true when non-zero,
/// and the usual SCPI keywords (`ON`/`OFF`, `RUN`/`STOP`) are accepted.
pub fn parse_flag(command: &str, response: &str) -> Result<bool, LinkError> {
    let token = response
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .find(|t| !t.is_empty())
        .unwrap_or_default();

    if let Ok(value) = token.parse::<f64>() {
        return Ok(value != 0.0);
    }
    match token.to_ascii_uppercase().as_str() {
        "ON" | "RUN" | "TRUE" => Ok(true),
        "OFF" | "STOP" | "FALSE" => Ok(false),
        _ => Err(LinkError::UnexpectedResponse {
            command: command.to_string(),
            response: response.to_string(),
        }),
    }
}
