//! Instrument command vocabularies.
//!
//! Commands are data: each logical operation maps to a template string that is
//! rendered with `strfmt` and sent verbatim. The defaults are the Tektronix
//! AFG / MSO vocabulary; any entry can be overridden from the configuration
//! file under `[commands.generator]` / `[commands.digitizer]`.

use crate::error::LinkError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Renders `template`, substituting `{name}` placeholders from `vars`.
pub fn render(template: &str, vars: &[(&str, String)]) -> Result<String, LinkError> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect();
    strfmt::strfmt(template, &vars).map_err(|e| LinkError::Template {
        template: template.to_string(),
        reason: e.to_string(),
    })
}

/// Signal generator command table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorCommands {
    /// Disables channel output.
    pub output_off: String,
    /// Enables channel output.
    pub output_on: String,
    /// Sets the burst cycle register; `{cycles}`.
    pub burst_cycles: String,
    /// Selects the pre-loaded two-cycle arbitrary waveform.
    pub shape_custom: String,
    /// Selects the sine shape.
    pub shape_sine: String,
    /// Sets the frequency; `{hz}`.
    pub frequency: String,
    /// Sets the amplitude; `{volts}`.
    pub amplitude: String,
    /// Sets the phase; `{phase}`.
    pub phase: String,
    /// Sets the DC offset; `{offset}`.
    pub offset: String,
}

impl Default for GeneratorCommands {
    fn default() -> Self {
        Self {
            output_off: ":output1:state off".into(),
            output_on: ":output1:state on".into(),
            burst_cycles: ":source1:burst:ncycles {cycles}".into(),
            shape_custom: ":source1:function:shape user1".into(),
            shape_sine: ":source1:function:shape sin".into(),
            frequency: ":source1:frequency {hz}".into(),
            amplitude: ":source1:voltage {volts}".into(),
            phase: ":source1:phase {phase}".into(),
            offset: ":source1:voltage:offset {offset}".into(),
        }
    }
}

/// Digitizer command table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigitizerCommands {
    /// Stops any running acquisition.
    pub stop: String,
    /// Stop after a single sequence.
    pub single_sequence: String,
    /// Continuous free-run acquisition.
    pub free_run: String,
    /// Starts acquisition.
    pub run: String,
    /// Query answering whether acquisition is running.
    pub running_query: String,
    /// Selects the automatic save-file format.
    pub save_format_auto: String,
    /// Saves a channel waveform; `{channel}`, `{path}`.
    pub save_waveform: String,
    /// Channel whose waveform is saved.
    pub channel: String,
}

impl Default for DigitizerCommands {
    fn default() -> Self {
        Self {
            stop: ":acquire:state stop".into(),
            single_sequence: "acquire:stopafter sequence".into(),
            free_run: "acquire:stopafter runstop".into(),
            run: ":acquire:state run".into(),
            running_query: ":acquire:state?".into(),
            save_format_auto: ":save:waveform:fileformat auto".into(),
            save_waveform: ":save:waveform {channel}, '{path}'".into(),
            channel: "ch1".into(),
        }
    }
}

/// Both command tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSet {
    /// Generator vocabulary.
    pub generator: GeneratorCommands,
    /// Digitizer vocabulary.
    pub digitizer: DigitizerCommands,
}
