//! Layered runtime configuration.
//!
//! Settings come from `config/default.toml` (optional) overlaid with
//! `TRAP_DAQ__*` environment variables, deserialized through serde. Every
//! field has a default, so an empty deployment still gets a runnable mock
//! configuration; [`Settings::validate`] rejects combinations the acquisition
//! loop cannot work with before any hardware is touched.

use crate::cycle::StageTimings;
use crate::error::{AppResult, DaqError};
use crate::instrument::AnalyzerWindow;
use config::{Config, Environment, File};
use serde::Deserialize;

/// Which transport a device endpoint speaks.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// In-memory simulated device, no hardware needed.
    Mock,
    /// Raw serial line (trigger box, coil supply, ring supply, HF generator).
    Serial,
    /// VISA resource (spectrum analyzer over USB-TMC or GPIB).
    Visa,
}

/// One device endpoint: where it lives and how to talk to it.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub kind: AdapterKind,
    /// Serial port path or VISA resource string. Ignored for mocks.
    pub address: String,
    /// Baud rate for serial endpoints.
    pub baud: u32,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            kind: AdapterKind::Mock,
            address: String::new(),
            baud: 9600,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct InstrumentSettings {
    pub trigger_box: Endpoint,
    pub analyzer: Endpoint,
    pub coil: Endpoint,
    pub ring: Endpoint,
    pub hf_generator: Endpoint,
}

/// Knobs of the acquisition loop itself.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Measurement cycles averaged per sweep point.
    pub averages: u32,
    /// Slack added on top of the cycle duration before the trace fetch, in
    /// milliseconds. Covers analyzer processing and readout latency.
    pub settle_margin_ms: u64,
    /// Leading samples that estimate the trace baseline.
    pub dip_window: usize,
    /// Leave the first trace sample out of the minimum search.
    pub exclude_first: bool,
    /// Trace fetch retry budget.
    pub fetch_attempts: u32,
    /// Pause between trace fetch retries, in milliseconds.
    pub fetch_backoff_ms: u64,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            averages: 10,
            settle_margin_ms: 200,
            dip_window: 10,
            exclude_first: true,
            fetch_attempts: 10,
            fetch_backoff_ms: 4000,
        }
    }
}

/// Backoffs of the trigger recovery ladder.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    /// Pause after a buffer clear, in milliseconds.
    pub clear_backoff_ms: u64,
    /// Pause after a channel reset, in milliseconds. The trigger box
    /// controller needs several seconds to reboot.
    pub reset_backoff_ms: u64,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            clear_backoff_ms: 300,
            reset_backoff_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Directory the result stream lands in.
    pub directory: String,
    /// File name stem; a timestamp and `.csv` get appended.
    pub file_stem: String,
    /// Records between flushes.
    pub flush_every: u32,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: "data".to_string(),
            file_stem: "sweep".to_string(),
            flush_every: 10,
        }
    }
}

/// The quantity a sweep varies, point by point.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SweepVariable {
    ExcitationFrequencyMhz,
    RingVoltage,
    CoilCurrent,
    Wait2Ms,
}

/// Half-open range `[start, stop)` stepped by `step`, for sweeps too long to
/// spell out as an explicit value list.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct SweepRange {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    pub variable: SweepVariable,
    /// Explicit sweep points. Takes precedence over `range`.
    pub values: Vec<f64>,
    pub range: Option<SweepRange>,
    /// Fixed excitation power during the sweep, in dBm.
    pub excitation_power_dbm: f64,
    /// Fixed excitation frequency, in MHz. The setpoint when the sweep
    /// varies something else.
    pub excitation_frequency_mhz: f64,
    /// Fixed ring voltage, in volts.
    pub ring_voltage: f64,
    /// Fixed magnet coil current, in amperes.
    pub coil_current: f64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            variable: SweepVariable::Wait2Ms,
            values: Vec::new(),
            range: None,
            excitation_power_dbm: -12.0,
            excitation_frequency_mhz: 57.35,
            ring_voltage: 39.5,
            coil_current: 1.3,
        }
    }
}

impl SweepSettings {
    /// Expand the configured sweep into its ordered point list.
    pub fn points(&self) -> Vec<f64> {
        if !self.values.is_empty() {
            return self.values.clone();
        }
        match self.range {
            Some(r) => arange(r.start, r.stop, r.step),
            None => Vec::new(),
        }
    }
}

/// `[start, stop)` in steps of `step`. Empty when `step` is not a positive
/// finite number or the range is inverted.
pub fn arange(start: f64, stop: f64, step: f64) -> Vec<f64> {
    if !(step > 0.0) || !step.is_finite() {
        return Vec::new();
    }
    let mut points = Vec::new();
    let mut i = 0u64;
    loop {
        // Multiply instead of accumulating so float error stays bounded.
        let x = start + step * i as f64;
        if x >= stop {
            break;
        }
        points.push(x);
        i += 1;
    }
    points
}

/// Optional ring voltage ramp armed once at startup for the detect stage.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct RingRampSettings {
    pub stop_voltage: f64,
    pub time_ms: u64,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub instruments: InstrumentSettings,
    pub timing: StageTimings,
    pub analyzer: AnalyzerWindow,
    pub acquisition: AcquisitionSettings,
    pub recovery: RecoverySettings,
    pub output: OutputSettings,
    pub sweep: SweepSettings,
    pub ring_ramp: Option<RingRampSettings>,
    /// Coil current the stand-down leaves behind, in amperes. Zero would
    /// thermally shock the magnet; park it low instead.
    pub coil_cooldown_a: f64,
}

impl Settings {
    pub fn load() -> AppResult<Self> {
        let settings = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                // Nested keys split on double underscores:
                // TRAP_DAQ__ACQUISITION__AVERAGES=5
                Environment::with_prefix("TRAP_DAQ")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Reject configurations the acquisition loop cannot run with. Called
    /// once at startup; a bad config is fatal before any device is opened.
    pub fn validate(&self) -> AppResult<()> {
        if self.acquisition.averages == 0 {
            return Err(DaqError::Configuration(
                "acquisition.averages must be >= 1".into(),
            ));
        }
        if self.acquisition.dip_window == 0 {
            return Err(DaqError::Configuration(
                "acquisition.dip_window must be >= 1".into(),
            ));
        }
        if self.acquisition.fetch_attempts == 0 {
            return Err(DaqError::Configuration(
                "acquisition.fetch_attempts must be >= 1".into(),
            ));
        }
        if self.sweep.points().is_empty() {
            return Err(DaqError::Configuration(
                "sweep defines no points: set sweep.values or sweep.range".into(),
            ));
        }
        if let Some(r) = self.sweep.range {
            if r.step <= 0.0 {
                return Err(DaqError::Configuration(
                    "sweep.range.step must be > 0".into(),
                ));
            }
        }
        if self.timing.total_ms() == 0 {
            return Err(DaqError::Configuration(
                "timing stages sum to zero, the cycle would never run".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_once_a_sweep_exists() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_err(), "no sweep points yet");

        settings.sweep.values = vec![20.0, 100.0, 500.0];
        settings.validate().unwrap();
    }

    #[test]
    fn explicit_values_take_precedence_over_range() {
        let sweep = SweepSettings {
            values: vec![1.0, 2.0],
            range: Some(SweepRange {
                start: 0.0,
                stop: 10.0,
                step: 1.0,
            }),
            ..SweepSettings::default()
        };
        assert_eq!(sweep.points(), vec![1.0, 2.0]);
    }

    #[test]
    fn arange_is_stop_exclusive() {
        assert_eq!(arange(0.0, 1.0, 0.25), vec![0.0, 0.25, 0.5, 0.75]);
        assert_eq!(arange(5.0, 5.0, 1.0), Vec::<f64>::new());
        assert_eq!(arange(57.0, 57.3, 0.1).len(), 3);
    }

    #[test]
    fn arange_rejects_bad_steps() {
        assert!(arange(0.0, 10.0, 0.0).is_empty());
        assert!(arange(0.0, 10.0, -1.0).is_empty());
        assert!(arange(0.0, 10.0, f64::NAN).is_empty());
    }

    #[test]
    fn zero_averages_is_rejected() {
        let mut settings = Settings::default();
        settings.sweep.values = vec![1.0];
        settings.acquisition.averages = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_cycle_is_rejected() {
        let mut settings = Settings::default();
        settings.sweep.values = vec![1.0];
        settings.timing = StageTimings {
            load: 0,
            wait1: 0,
            excite: 0,
            wait2: 0,
            rigol: 0,
            wait3: 0,
            detect: 0,
        };
        assert!(settings.validate().is_err());
    }
}
