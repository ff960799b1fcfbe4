//! Pulse/trigger box control.
//!
//! The trigger box generates the measurement cycle's pulse train. Stage
//! durations are pushed one at a time (`"wait2 120"`); a trigger pulse starts
//! one cycle (`"trig"`). The box is the least reliable link in the setup, so
//! it also exposes the two recovery actions the acquisition loop escalates
//! through: a buffer flush and a full channel reset.

use crate::cycle::{Stage, StageTimings};
use crate::error::{AppResult, DaqError};
use crate::hardware::HardwareAdapter;
use log::{debug, warn};
use std::time::Duration;
use tokio::time::sleep;

/// Guard pause around every timing command; the box's firmware parses its
/// serial input between pulses and drops bytes that arrive back-to-back.
const CMD_GUARD: Duration = Duration::from_millis(100);

/// Active pulse time beyond which the box's serial link becomes flaky.
const ACTIVE_MS_WARN: u64 = 1500;

pub struct TriggerBox {
    adapter: Box<dyn HardwareAdapter>,
    timings: StageTimings,
}

impl TriggerBox {
    pub fn new(adapter: Box<dyn HardwareAdapter>) -> Self {
        Self {
            adapter,
            timings: StageTimings::default(),
        }
    }

    /// The timing set as last pushed to the hardware.
    pub fn timings(&self) -> &StageTimings {
        &self.timings
    }

    /// Total duration of one measurement cycle with the current timings.
    pub fn cycle_total(&self) -> Duration {
        self.timings.total()
    }

    /// Push one stage duration to the box and mirror it locally.
    pub async fn set_stage_duration(&mut self, stage: Stage, ms: u64) -> AppResult<()> {
        sleep(CMD_GUARD).await;
        self.adapter
            .send(&format!("{} {}", stage.token(), ms))
            .await?;
        sleep(CMD_GUARD).await;
        self.timings.set(stage, ms);
        debug!("trigger: {} = {} ms (cycle {} ms)", stage, ms, self.timings.total_ms());
        Ok(())
    }

    /// Push a complete timing set, stage by stage, in pulse order.
    pub async fn apply_timings(&mut self, timings: &StageTimings) -> AppResult<()> {
        if timings.active_ms() > ACTIVE_MS_WARN {
            warn!(
                "trigger period {} ms exceeds {} ms; serial communication \
                 with the box is more likely to fail",
                timings.active_ms(),
                ACTIVE_MS_WARN
            );
        }
        for stage in Stage::ALL {
            self.set_stage_duration(stage, timings.get(stage)).await?;
        }
        Ok(())
    }

    /// Fire one trigger pulse, starting a measurement cycle.
    pub async fn trigger(&mut self) -> AppResult<()> {
        self.adapter.send("trig").await
    }

    /// Lightweight recovery: flush stale bytes on the link.
    pub async fn clear_pending(&mut self) -> AppResult<()> {
        self.adapter.clear().await
    }

    /// Heavyweight recovery: close and reopen the channel.
    pub async fn reset_channel(&mut self) -> AppResult<()> {
        self.adapter.reset().await
    }

    /// Read back the stage durations the box is actually running,
    /// in pulse order.
    pub async fn read_back_times(&mut self) -> AppResult<Vec<f64>> {
        let response = self.adapter.query("times?").await?;
        response
            .split(',')
            .map(|s| {
                s.trim().parse::<f64>().map_err(|e| {
                    DaqError::parse(self.adapter.name(), format!("bad time field '{}': {}", s, e))
                })
            })
            .collect()
    }
}
