//! VISA transport.
//!
//! Opens `TCPIP::{address}::INSTR` resources through the system VISA library
//! using the `visa-rs` crate. VISA calls are blocking, so every operation runs
//! on Tokio's blocking pool. Requires the `instrument_visa` feature; without it
//! the connector reports a connect error for every attempt.

use super::{InstrumentLink, InstrumentRole, LinkConnector};
use crate::error::ConnectError;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_visa")]
use crate::error::LinkError;
#[cfg(feature = "instrument_visa")]
use std::sync::{Arc, Mutex};
#[cfg(feature = "instrument_visa")]
use tracing::debug;

/// Builds the VISA resource string for a LAN instrument.
pub fn resource_string(address: &str) -> String {
    format!("TCPIP::{}::INSTR", address)
}

/// Opens VISA sessions.
#[derive(Debug, Clone)]
pub struct VisaConnector {
    /// VISA I/O timeout.
    pub timeout: Duration,
}

impl VisaConnector {
    /// Creates a connector with the given I/O timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Link over a VISA session.
#[cfg(feature = "instrument_visa")]
pub struct VisaLink {
    resource: String,
    instrument: Arc<Mutex<visa_rs::Instrument>>,
}

/// VISA status code carried by a `visa-rs` error (e.g. `-1073807343` for
/// `VI_ERROR_RSRC_NFOUND`).
#[cfg(feature = "instrument_visa")]
fn visa_status(err: &visa_rs::Error) -> i64 {
    err.0 as i64
}

/// Status of an I/O error raised through `visa-rs`' `Read`/`Write` impls,
/// falling back to the OS error number.
#[cfg(feature = "instrument_visa")]
fn io_status(err: &std::io::Error) -> Option<i64> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<visa_rs::Error>())
        .map(visa_status)
        .or_else(|| err.raw_os_error().map(i64::from))
}

#[cfg(feature = "instrument_visa")]
impl VisaLink {
    async fn blocking<T, F>(&self, command: &str, op: F) -> Result<T, LinkError>
    where
        T: Send + 'static,
        F: FnOnce(&mut visa_rs::Instrument) -> std::io::Result<T> + Send + 'static,
    {
        let instrument = self.instrument.clone();
        let command_for_log = command.to_string();
        tokio::task::spawn_blocking(move || {
            let mut guard = instrument.lock().map_err(|_| LinkError::Io {
                message: "VISA session lock poisoned".to_string(),
                code: None,
            })?;
            op(&mut guard).map_err(|e| {
                let code = io_status(&e);
                let e = anyhow::Error::new(e)
                    .context(format!("VISA I/O failed for: {}", command_for_log));
                LinkError::Io {
                    message: format!("{e:#}"),
                    code,
                }
            })
        })
        .await
        .map_err(|e| LinkError::Io {
            message: format!("VISA I/O task panicked: {e}"),
            code: None,
        })?
    }
}

#[cfg(feature = "instrument_visa")]
#[async_trait]
impl InstrumentLink for VisaLink {
    async fn write(&mut self, command: &str) -> Result<(), LinkError> {
        use std::io::Write;
        let line = format!("{}\n", command);
        self.blocking(command, move |instr| instr.write_all(line.as_bytes()))
            .await?;
        debug!("VISA write sent: {}", command);
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String, LinkError> {
        use std::io::{BufRead, BufReader, Write};
        let line = format!("{}\n", command);
        let response = self
            .blocking(command, move |instr| {
                instr.write_all(line.as_bytes())?;
                let mut response = String::new();
                BufReader::new(&*instr).read_line(&mut response)?;
                Ok(response)
            })
            .await?;
        let response = response.trim().to_string();
        debug!("VISA query '{}' -> '{}'", command, response);
        Ok(response)
    }

    fn describe(&self) -> String {
        self.resource.clone()
    }
}

#[async_trait]
impl LinkConnector for VisaConnector {
    #[cfg(feature = "instrument_visa")]
    async fn connect(
        &self,
        role: InstrumentRole,
        address: &str,
    ) -> Result<Box<dyn InstrumentLink>, ConnectError> {
        use std::ffi::CString;
        use visa_rs::prelude::*;

        let resource = resource_string(address);
        let c_string = CString::new(resource.clone())
            .map_err(|e| ConnectError::new(role, address, e.to_string(), None))?;
        let timeout = self.timeout;

        let opened = tokio::task::spawn_blocking(move || {
            let rm = DefaultRM::new()?;
            rm.open(&c_string.into(), AccessMode::NO_LOCK, timeout)
        })
        .await
        .map_err(|e| ConnectError::new(role, address, format!("VISA open task panicked: {e}"), None))?;

        match opened {
            Ok(instrument) => Ok(Box::new(VisaLink {
                resource,
                instrument: Arc::new(Mutex::new(instrument)),
            })),
            Err(e) => Err(ConnectError::new(
                role,
                address,
                format!("VisaIOError: {e}"),
                Some(visa_status(&e)),
            )),
        }
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn connect(
        &self,
        role: InstrumentRole,
        address: &str,
    ) -> Result<Box<dyn InstrumentLink>, ConnectError> {
        Err(ConnectError::new(
            role,
            address,
            "VISA support not enabled. Rebuild with --features instrument_visa",
            None,
        ))
    }
}
