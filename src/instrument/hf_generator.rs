//! High-frequency excitation generator.
//!
//! Drives the antenna that excites the trapped electrons' cyclotron motion.
//! The generator needs a short settle pause after every setpoint before its
//! output is stable; those pauses live here because they are properties of
//! this device, not of the measurement cycle.

use crate::error::AppResult;
use crate::hardware::HardwareAdapter;
use log::debug;
use std::time::Duration;
use tokio::time::sleep;

const FREQUENCY_SETTLE: Duration = Duration::from_millis(50);
const POWER_SETTLE: Duration = Duration::from_millis(100);
const OUTPUT_SETTLE: Duration = Duration::from_millis(100);

pub struct ExcitationGenerator {
    adapter: Box<dyn HardwareAdapter>,
}

impl ExcitationGenerator {
    pub fn new(adapter: Box<dyn HardwareAdapter>) -> Self {
        Self { adapter }
    }

    pub async fn set_frequency_mhz(&mut self, frequency: f64) -> AppResult<()> {
        self.adapter.send(&format!("FR {} MZ", frequency)).await?;
        sleep(FREQUENCY_SETTLE).await;
        debug!("hf: frequency set to {} MHz", frequency);
        Ok(())
    }

    pub async fn set_power_dbm(&mut self, power: f64) -> AppResult<()> {
        self.adapter.send(&format!("AP {} DM", power)).await?;
        sleep(POWER_SETTLE).await;
        debug!("hf: power set to {} dBm", power);
        Ok(())
    }

    pub async fn output_on(&mut self) -> AppResult<()> {
        self.adapter.send("R3").await?;
        sleep(OUTPUT_SETTLE).await;
        Ok(())
    }

    pub async fn output_off(&mut self) -> AppResult<()> {
        self.adapter.send("R2").await?;
        sleep(OUTPUT_SETTLE).await;
        Ok(())
    }
}
