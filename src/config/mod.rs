//! Configuration management.
//!
//! Settings are loaded with Figment from, in order of precedence:
//! 1. Environment variables prefixed with `ULTRA_DAQ_` (sections separated by `__`)
//! 2. TOML configuration file (default: `config/default.toml`)
//! 3. Built-in defaults
//!
//! ```text
//! ULTRA_DAQ_SETUP__RUN_LABEL=D2712
//! ULTRA_DAQ_EXPERIMENT__REPETITIONS=0
//! ULTRA_DAQ_TIMING__POLL_INTERVAL=500ms
//! ```
//!
//! The collection worker never caches the plan: it asks its [`PlanSource`]
//! for a fresh snapshot at the start of every run.

pub mod settings;

pub use settings::{
    ApplicationConfig, ExperimentConfig, Settings, SetupConfig, TimingConfig, TransportConfig,
    TransportKind, DEFAULT_CONFIG_PATH, ENV_PREFIX,
};

use crate::instrument::mock::MockConnector;
use crate::instrument::tcp::TcpConnector;
use crate::instrument::visa::VisaConnector;
use crate::instrument::LinkConnector;
use crate::plan::{ExperimentPlan, InstrumentAddresses};
use parking_lot::RwLock;
use std::sync::Arc;

/// Read-only accessors the worker resolves at every run start.
pub trait PlanSource: Send + Sync {
    /// Instrument addresses.
    fn addresses(&self) -> InstrumentAddresses;
    /// Sweep plan.
    fn plan(&self) -> ExperimentPlan;
}

impl PlanSource for Settings {
    fn addresses(&self) -> InstrumentAddresses {
        Settings::addresses(self)
    }

    fn plan(&self) -> ExperimentPlan {
        Settings::plan(self)
    }
}

/// Settings the control plane may edit between runs.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings(Arc<RwLock<Settings>>);

impl SharedSettings {
    /// Wraps `settings`.
    pub fn new(settings: Settings) -> Self {
        Self(Arc::new(RwLock::new(settings)))
    }

    /// Applies `edit` under the write lock.
    pub fn update(&self, edit: impl FnOnce(&mut Settings)) {
        edit(&mut self.0.write());
    }

    /// Copy of the current settings.
    pub fn snapshot(&self) -> Settings {
        self.0.read().clone()
    }
}

impl PlanSource for SharedSettings {
    fn addresses(&self) -> InstrumentAddresses {
        self.0.read().addresses()
    }

    fn plan(&self) -> ExperimentPlan {
        self.0.read().plan()
    }
}

/// Builds the connector selected by `transport`.
pub fn connector_from(transport: &TransportConfig) -> Arc<dyn LinkConnector> {
    match transport.kind {
        TransportKind::Tcp => Arc::new(TcpConnector::new(
            transport.port,
            transport.connect_timeout,
            transport.query_timeout,
        )),
        TransportKind::Visa => Arc::new(VisaConnector::new(transport.query_timeout)),
        TransportKind::Mock => Arc::new(MockConnector::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_settings_edits_visible_to_next_plan() {
        let shared = SharedSettings::new(Settings::default());
        let source: Arc<dyn PlanSource> = Arc::new(shared.clone());
        assert_eq!(source.plan().repetitions, 1);

        shared.update(|s| {
            s.experiment.repetitions = 4;
            s.setup.generator_address = "10.0.0.9".into();
        });
        assert_eq!(source.plan().repetitions, 4);
        assert_eq!(source.addresses().generator_address, "10.0.0.9");
        assert_eq!(shared.snapshot().experiment.repetitions, 4);
    }

    #[tokio::test]
    async fn test_mock_transport_connects() {
        let transport = TransportConfig {
            kind: TransportKind::Mock,
            ..TransportConfig::default()
        };
        let connector = connector_from(&transport);
        let mut link = connector
            .connect(crate::instrument::InstrumentRole::Digitizer, "127.0.0.1")
            .await
            .unwrap();
        assert!(link.identify().await.unwrap().contains("MSO"));
    }
}
