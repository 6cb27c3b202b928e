//! Signal generator control.

use crate::error::LinkError;
use crate::events::EventBus;
use crate::instrument::commands::render;
use crate::instrument::{GeneratorCommands, InstrumentLink};
use crate::plan::{format_decimal, CycleCount};
use tracing::debug;

/// Programs and arms the waveform source.
pub struct SignalGenerator {
    link: Box<dyn InstrumentLink>,
    commands: GeneratorCommands,
    events: EventBus,
}

impl SignalGenerator {
    /// Wraps an open generator link.
    pub fn new(link: Box<dyn InstrumentLink>, commands: GeneratorCommands, events: EventBus) -> Self {
        Self {
            link,
            commands,
            events,
        }
    }

    /// Programs one frequency and enables the output.
    ///
    /// The burst-cycle register is always 1; `cycles` selects the waveform
    /// shape. The two-cycle shape is driven at half the target frequency.
    pub async fn configure_and_arm(
        &mut self,
        frequency_mhz: f64,
        cycles: CycleCount,
        peak_voltage: f64,
    ) -> Result<(), LinkError> {
        self.send(&self.commands.output_off.clone(), &[]).await?;
        self.send(&self.commands.burst_cycles.clone(), &[("cycles", "1".into())])
            .await?;
        self.select_shape(cycles, frequency_mhz).await?;
        self.send(
            &self.commands.amplitude.clone(),
            &[("volts", format_decimal(peak_voltage))],
        )
        .await?;
        self.send(&self.commands.phase.clone(), &[("phase", "0.0e0".into())])
            .await?;
        self.send(&self.commands.offset.clone(), &[("offset", "0.0e0".into())])
            .await?;
        self.send(&self.commands.output_on.clone(), &[]).await?;

        self.events.feedback(format!(
            "Sending {} cycle(s) {}MHz signal with Vpp = {}V.",
            cycles,
            format_decimal(frequency_mhz),
            format_decimal(peak_voltage)
        ));
        Ok(())
    }

    /// Parks the generator at `reset_frequency_mhz` on the two-cycle shape with
    /// the output enabled.
    pub async fn restore_defaults(&mut self, reset_frequency_mhz: f64) -> Result<(), LinkError> {
        self.send(&self.commands.burst_cycles.clone(), &[("cycles", "1".into())])
            .await?;
        self.select_shape(CycleCount::Double, reset_frequency_mhz)
            .await?;
        self.send(&self.commands.output_on.clone(), &[]).await?;
        debug!(
            "generator parked at {} MHz",
            format_decimal(reset_frequency_mhz)
        );
        Ok(())
    }

    async fn select_shape(&mut self, cycles: CycleCount, frequency_mhz: f64) -> Result<(), LinkError> {
        let shape = match cycles {
            CycleCount::Double => self.commands.shape_custom.clone(),
            CycleCount::Single => self.commands.shape_sine.clone(),
        };
        self.send(&shape, &[]).await?;
        self.send(
            &self.commands.frequency.clone(),
            &[("hz", format_decimal(cycles.programmed_hz(frequency_mhz)))],
        )
        .await
    }

    async fn send(&mut self, template: &str, vars: &[(&str, String)]) -> Result<(), LinkError> {
        let command = render(template, vars)?;
        self.link.write(&command).await
    }
}
