//! Collection state machine.
//!
//! One run walks `Idle → Connecting → Collecting → (Aborting) → Idle`:
//!
//! ```text
//!   resolve plan + addresses ──invalid──────────────────────────────┐
//!        │                                                          │
//!   Connecting: digitizer, generator ──ConnectError────────────────┤
//!        │                                                          │
//!   Collecting: for each repetition                                 │
//!                 for each frequency (list order)                   │
//!                   generator.configure_and_arm                     │
//!                   digitizer.capture_and_save                      │
//!        │  abort observed ──> Aborting                             │
//!   restore defaults (exactly once)                                 │
//!        └──────────────────────────────────────────────> Idle <────┘
//! ```
//!
//! Instrument failures never escape [`CollectionOrchestrator::run`]; they are
//! turned into feedback events and the run carries on (or ends, for connection
//! failures).

use crate::config::{PlanSource, TimingConfig};
use crate::digitizer::{AcquisitionDriver, CaptureOutcome};
use crate::error::ConnectError;
use crate::events::{CollectorState, EventBus, RunOutcome, RunSummary};
use crate::filename::WaveformName;
use crate::generator::SignalGenerator;
use crate::instrument::{connect_identified, CommandSet, InstrumentRole, LinkConnector};
use crate::plan::{format_decimal, ExperimentPlan, InstrumentAddresses};
use crate::session::{AbortFlag, CollectionSession};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Drives repetitions × frequencies across the two instruments.
pub struct CollectionOrchestrator {
    source: Arc<dyn PlanSource>,
    connector: Arc<dyn LinkConnector>,
    commands: CommandSet,
    timing: TimingConfig,
    events: EventBus,
    abort: AbortFlag,
}

#[derive(Debug, Default)]
struct SweepTally {
    repetitions_started: u32,
    files_saved: u32,
}

impl CollectionOrchestrator {
    /// Creates an orchestrator publishing on `events`.
    pub fn new(
        source: Arc<dyn PlanSource>,
        connector: Arc<dyn LinkConnector>,
        commands: CommandSet,
        timing: TimingConfig,
        events: EventBus,
    ) -> Self {
        Self {
            source,
            connector,
            commands,
            timing,
            events,
            abort: AbortFlag::new(),
        }
    }

    /// Flag the control plane sets to cancel the current run.
    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    /// Event bus this orchestrator publishes on.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Executes one run and returns to `Idle`.
    ///
    /// Callers arm the abort flag before spawning the run; an abort requested
    /// between acceptance and the first check stops the sweep before it
    /// collects anything.
    #[instrument(skip(self), name = "collection_run")]
    pub async fn run(&self) -> RunSummary {
        let started = Instant::now();

        let addresses = self.source.addresses();
        let plan = self.source.plan();
        if let Err(e) = addresses.validate().and_then(|_| plan.validate()) {
            warn!("run rejected: {}", e);
            self.events.feedback(e.to_string());
            return self.finish(RunOutcome::Rejected, SweepTally::default(), started);
        }

        self.events.feedback("Starting new collection process.");
        self.events.set_state(CollectorState::Connecting);

        let mut session = CollectionSession::new(&plan, self.abort.clone());
        let (mut generator, mut digitizer) = match self.connect(&addresses).await {
            Ok(instruments) => instruments,
            Err(e) => {
                warn!("{}", e);
                self.events.feedback(e.to_string());
                return self.finish(RunOutcome::ConnectFailed, SweepTally::default(), started);
            }
        };
        session.connected = true;

        self.events.set_state(CollectorState::Collecting);
        let tally = self
            .sweep(&plan, &mut session, &mut generator, &mut digitizer)
            .await;

        let outcome = if session.abort_requested() {
            self.events.set_state(CollectorState::Aborting);
            self.events.feedback("Collection aborted.");
            RunOutcome::Aborted
        } else {
            RunOutcome::Completed
        };

        self.restore_defaults(&plan, &mut generator, &mut digitizer)
            .await;
        self.finish(outcome, tally, started)
    }

    async fn connect(
        &self,
        addresses: &InstrumentAddresses,
    ) -> Result<(SignalGenerator, AcquisitionDriver), ConnectError> {
        let digitizer = connect_identified(
            self.connector.as_ref(),
            InstrumentRole::Digitizer,
            &addresses.digitizer_address,
        )
        .await?;
        self.events.feedback(digitizer.identity.clone());

        let generator = connect_identified(
            self.connector.as_ref(),
            InstrumentRole::Generator,
            &addresses.generator_address,
        )
        .await?;
        self.events.feedback(generator.identity.clone());

        Ok((
            SignalGenerator::new(
                generator.link,
                self.commands.generator.clone(),
                self.events.clone(),
            ),
            AcquisitionDriver::new(
                digitizer.link,
                self.commands.digitizer.clone(),
                self.timing.clone(),
                self.events.clone(),
            ),
        ))
    }

    async fn sweep(
        &self,
        plan: &ExperimentPlan,
        session: &mut CollectionSession,
        generator: &mut SignalGenerator,
        digitizer: &mut AcquisitionDriver,
    ) -> SweepTally {
        let mut tally = SweepTally::default();
        let total = plan.total_repetitions();

        while plan.includes_repetition(session.current_repetition) {
            if session.abort_requested() {
                break;
            }
            tally.repetitions_started += 1;
            self.events.progress(session.current_repetition, total);

            for &frequency in &plan.frequencies {
                if session.abort_requested() {
                    break;
                }
                let cycles = plan.cycle_count(frequency);
                if let Err(e) = generator
                    .configure_and_arm(frequency, cycles, plan.peak_voltage)
                    .await
                {
                    warn!("generator setup failed at {} MHz: {}", frequency, e);
                    self.events.feedback(format!(
                        "Generator error at {}MHz: {}",
                        format_decimal(frequency),
                        e
                    ));
                    continue;
                }

                if session.abort_requested() {
                    break;
                }
                let path =
                    WaveformName::for_plan(plan, frequency, session.current_file_number).build();
                match digitizer
                    .capture_and_save(frequency, &path, &session.abort)
                    .await
                {
                    Ok(CaptureOutcome::Saved) => tally.files_saved += 1,
                    Ok(CaptureOutcome::Aborted) => break,
                    Err(e) => {
                        warn!("capture failed at {} MHz: {}", frequency, e);
                        self.events.feedback(format!(
                            "Acquisition error at {}MHz: {}",
                            format_decimal(frequency),
                            e
                        ));
                    }
                }
            }

            session.advance();
        }
        tally
    }

    async fn restore_defaults(
        &self,
        plan: &ExperimentPlan,
        generator: &mut SignalGenerator,
        digitizer: &mut AcquisitionDriver,
    ) {
        if let Err(e) = generator.restore_defaults(plan.reset_frequency).await {
            warn!("generator restore failed: {}", e);
            self.events
                .feedback(format!("Failed to restore generator defaults: {e}"));
        }
        if let Err(e) = digitizer.set_free_run().await {
            warn!("digitizer restore failed: {}", e);
            self.events
                .feedback(format!("Failed to restore digitizer defaults: {e}"));
        }
        info!("instrument defaults restored");
    }

    fn finish(&self, outcome: RunOutcome, tally: SweepTally, started: Instant) -> RunSummary {
        let summary = RunSummary {
            outcome,
            repetitions_started: tally.repetitions_started,
            files_saved: tally.files_saved,
            elapsed: started.elapsed(),
        };
        self.events.set_state(CollectorState::Idle);
        self.abort.clear();
        info!(
            "run finished: {:?}, {} repetition(s), {} file(s)",
            summary.outcome, summary.repetitions_started, summary.files_saved
        );
        self.events.finished(summary.clone());
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::events::CollectionEvent;
    use crate::instrument::mock::MockConnector;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn fast_timing() -> TimingConfig {
        TimingConfig {
            poll_interval: Duration::from_millis(1),
            settle: Duration::ZERO,
            trailing_settle: Duration::ZERO,
            max_poll_iterations: None,
        }
    }

    fn orchestrator(settings: Settings, connector: &MockConnector) -> CollectionOrchestrator {
        CollectionOrchestrator::new(
            Arc::new(settings),
            Arc::new(connector.clone()),
            CommandSet::default(),
            fast_timing(),
            EventBus::default(),
        )
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<CollectionEvent>) -> Vec<CollectionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_completed_run_summary() {
        let connector = MockConnector::new();
        let mut settings = Settings::default();
        settings.experiment.repetitions = 2;
        let orchestrator = orchestrator(settings, &connector);

        let summary = orchestrator.run().await;
        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(summary.repetitions_started, 2);
        assert_eq!(summary.files_saved, 10);
        assert_eq!(orchestrator.events().state(), CollectorState::Idle);
    }

    #[tokio::test]
    async fn test_state_sequence() {
        let connector = MockConnector::new();
        let orchestrator = orchestrator(Settings::default(), &connector);
        let mut rx = orchestrator.events().subscribe();
        orchestrator.run().await;

        let states: Vec<CollectorState> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                CollectionEvent::StateChanged { state } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                CollectorState::Connecting,
                CollectorState::Collecting,
                CollectorState::Idle
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_address_rejected_before_connecting() {
        let connector = MockConnector::new();
        let mut settings = Settings::default();
        settings.setup.generator_address = "164.54.160".into();
        let orchestrator = orchestrator(settings, &connector);
        let mut rx = orchestrator.events().subscribe();

        let summary = orchestrator.run().await;
        assert_eq!(summary.outcome, RunOutcome::Rejected);
        assert!(connector.connections().is_empty());
        let events = drain(&mut rx);
        assert_eq!(
            events[0],
            CollectionEvent::Feedback {
                message: "The AFG must be a valid IPv4.".into()
            }
        );
        assert!(!events
            .iter()
            .any(|e| matches!(e, CollectionEvent::StateChanged { .. })));
    }

    #[tokio::test]
    async fn test_identity_feedback() {
        let connector = MockConnector::new();
        let orchestrator = orchestrator(Settings::default(), &connector);
        let mut rx = orchestrator.events().subscribe();
        orchestrator.run().await;

        let feedback: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                CollectionEvent::Feedback { message } => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(feedback[0], "Starting new collection process.");
        assert!(feedback[1].contains("MSO58"));
        assert!(feedback[2].contains("AFG31252"));
    }

    #[tokio::test]
    async fn test_indefinite_run_stops_on_abort() {
        let connector = MockConnector::new();
        let mut settings = Settings::default();
        settings.experiment.repetitions = 0;
        settings.experiment.frequencies = vec![20.0];
        let orchestrator = orchestrator(settings, &connector);

        let abort = orchestrator.abort_flag();
        let saves = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = saves.clone();
        connector
            .digitizer()
            .on_command(":save:waveform ch1", move |_| {
                if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 2 {
                    abort.request();
                }
            });

        let summary = orchestrator.run().await;
        assert_eq!(summary.outcome, RunOutcome::Aborted);
        assert_eq!(summary.repetitions_started, 3);
        assert_eq!(summary.files_saved, 3);
        assert!(!orchestrator.abort_flag().is_requested());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_run_is_logged() {
        let connector = MockConnector::new();
        connector.refuse(InstrumentRole::Digitizer);
        let orchestrator = orchestrator(Settings::default(), &connector);
        orchestrator.run().await;

        assert!(logs_contain("digitizer connection to 164.54.160.105 failed"));
        assert!(logs_contain("collector state Connecting -> Idle"));
        assert!(!logs_contain("instrument defaults restored"));
    }
}
