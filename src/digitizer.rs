//! Digitizer capture and save.

use crate::config::TimingConfig;
use crate::error::{AcquireError, LinkError};
use crate::events::EventBus;
use crate::instrument::commands::render;
use crate::instrument::{parse_flag, DigitizerCommands, InstrumentLink};
use crate::plan::format_decimal;
use crate::session::AbortFlag;
use tracing::{debug, info, warn};

/// How a capture ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The waveform was saved.
    Saved,
    /// Abort was observed while the acquisition was running. Nothing was
    /// saved and the digitizer was left mid-sequence.
    Aborted,
}

/// Arms single-sequence captures and saves the resulting waveform.
pub struct AcquisitionDriver {
    link: Box<dyn InstrumentLink>,
    commands: DigitizerCommands,
    timing: TimingConfig,
    events: EventBus,
}

impl AcquisitionDriver {
    /// Wraps an open digitizer link.
    pub fn new(
        link: Box<dyn InstrumentLink>,
        commands: DigitizerCommands,
        timing: TimingConfig,
        events: EventBus,
    ) -> Self {
        Self {
            link,
            commands,
            timing,
            events,
        }
    }

    /// Captures one sequence and saves channel data to `path` on the
    /// digitizer.
    ///
    /// The running state is polled every `poll_interval`; `abort` is checked
    /// before each sleep. With `max_poll_iterations` unset the poll is
    /// unbounded.
    pub async fn capture_and_save(
        &mut self,
        frequency_mhz: f64,
        path: &str,
        abort: &AbortFlag,
    ) -> Result<CaptureOutcome, AcquireError> {
        self.write(&self.commands.stop.clone()).await?;
        self.write(&self.commands.single_sequence.clone()).await?;
        self.write(&self.commands.run.clone()).await?;

        let running_query = self.commands.running_query.clone();
        let mut polls: u32 = 0;
        loop {
            let response = self.link.query(&running_query).await?;
            polls += 1;
            if !parse_flag(&running_query, &response)? {
                break;
            }
            if abort.is_requested() {
                info!("abort observed after {} polls; waveform not saved", polls);
                return Ok(CaptureOutcome::Aborted);
            }
            if let Some(limit) = self.timing.max_poll_iterations {
                if polls >= limit {
                    warn!("acquisition still running after {} polls", polls);
                    return Err(AcquireError::PollLimit { polls });
                }
            }
            tokio::time::sleep(self.timing.poll_interval).await;
        }
        debug!("acquisition complete after {} polls", polls);

        tokio::time::sleep(self.timing.settle).await;

        self.write(&self.commands.save_format_auto.clone()).await?;
        let save = render(
            &self.commands.save_waveform,
            &[
                ("channel", self.commands.channel.clone()),
                ("path", path.to_string()),
            ],
        )?;
        self.write(&save).await?;

        info!("saved waveform {}", path);
        self.events.feedback(format!(
            "Waveform data at {}MHz saved in file {}.",
            format_decimal(frequency_mhz),
            path
        ));

        tokio::time::sleep(self.timing.trailing_settle).await;
        Ok(CaptureOutcome::Saved)
    }

    /// Returns the digitizer to continuous free-run acquisition.
    pub async fn set_free_run(&mut self) -> Result<(), LinkError> {
        self.write(&self.commands.free_run.clone()).await?;
        self.write(&self.commands.run.clone()).await
    }

    async fn write(&mut self, command: &str) -> Result<(), LinkError> {
        self.link.write(command).await
    }
}
