//! Core library for the ultra_daq application.
//!
//! Automates ultrasonic data collection: a signal generator (AFG) is swept
//! across a list of frequencies while a digitizer (MSO) captures one sequence
//! per frequency and saves it under a deterministic file name. The sweep is
//! repeated a configured number of times, or until aborted.
//!
//! ```text
//! CollectorHandle ──commands──> CollectorActor ──> CollectionOrchestrator
//!       ^                                            |        |
//!       |                                    SignalGenerator  AcquisitionDriver
//!       └──── EventBus (feedback, progress, state) <─┘        |
//!                                                      WaveformName
//! ```
//!
//! Instruments are reached through [`instrument::LinkConnector`]; raw SCPI
//! sockets, VISA and a scripted mock are provided.

pub mod collector;
pub mod config;
pub mod digitizer;
pub mod error;
pub mod events;
pub mod filename;
pub mod generator;
pub mod instrument;
pub mod journal;
pub mod logging;
pub mod messages;
pub mod orchestrator;
pub mod plan;
pub mod session;

pub use collector::CollectorHandle;
pub use config::Settings;
pub use error::{AppResult, DaqError};
pub use events::{CollectionEvent, CollectorState, RunOutcome, RunSummary};
pub use orchestrator::CollectionOrchestrator;
