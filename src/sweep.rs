//! The acquisition loop.
//!
//! A sweep walks one independent variable over a list of points. At each
//! point the runner applies the setpoint, runs `averages` measurement cycles
//! (trigger, settle for one cycle duration plus a margin, fetch the trace,
//! reduce it to the dip metric), and appends the aggregated record to the
//! result stream. Strictly sequential: nothing overlaps a running cycle.
//!
//! Trigger failures escalate through a fixed recovery ladder (buffer clear,
//! then channel reset); a cycle whose trigger still fails after the ladder
//! is skipped, not retried, so the sweep keeps moving. Trace fetches retry
//! inside [`SpectrumAnalyzer::fetch_trace`] independently of the ladder.

use crate::config::{AcquisitionSettings, RecoverySettings, SweepVariable};
use crate::cycle::Stage;
use crate::error::{AppResult, DaqError};
use crate::instrument::{
    CoilSupply, ExcitationGenerator, RingSupply, SpectrumAnalyzer, TriggerBox,
};
use crate::metric::{dip_metric, mean_std};
use crate::storage::{ResultWriter, SweepPointResult};
use log::{error, info, warn};
use std::io::Write;
use std::time::Duration;
use tokio::time::sleep;

pub struct SweepRunner {
    pub trigger: TriggerBox,
    pub analyzer: SpectrumAnalyzer,
    pub coil: CoilSupply,
    pub ring: RingSupply,
    pub hf: ExcitationGenerator,
    acq: AcquisitionSettings,
    recovery: RecoverySettings,
}

impl SweepRunner {
    pub fn new(
        trigger: TriggerBox,
        analyzer: SpectrumAnalyzer,
        coil: CoilSupply,
        ring: RingSupply,
        hf: ExcitationGenerator,
        acq: AcquisitionSettings,
        recovery: RecoverySettings,
    ) -> Self {
        Self {
            trigger,
            analyzer,
            coil,
            ring,
            hf,
            acq,
            recovery,
        }
    }

    /// Route one sweep setpoint to the instrument that owns the variable.
    pub async fn apply(&mut self, variable: SweepVariable, x: f64) -> AppResult<()> {
        match variable {
            SweepVariable::ExcitationFrequencyMhz => self.hf.set_frequency_mhz(x).await,
            SweepVariable::RingVoltage => self.ring.set_voltage(x).await,
            SweepVariable::CoilCurrent => self.coil.set_current(x).await,
            SweepVariable::Wait2Ms => {
                self.trigger
                    .set_stage_duration(Stage::Wait2, x.round() as u64)
                    .await
            }
        }
    }

    /// Fire one trigger pulse, escalating through the recovery ladder on
    /// transient failures.
    ///
    /// Ladder: plain attempt, then buffer clear and retry, then clear plus
    /// full channel reset and a final retry. The clear is best-effort; a
    /// failed *reset* propagates, because a channel that cannot be reopened
    /// will not heal by itself.
    async fn fire_trigger(&mut self) -> AppResult<()> {
        let first = match self.trigger.trigger().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() => e,
            Err(e) => return Err(e),
        };
        warn!("trigger failed ({}), clearing the link and retrying", first);
        if let Err(e) = self.trigger.clear_pending().await {
            warn!("trigger buffer clear failed: {}", e);
        }
        sleep(Duration::from_millis(self.recovery.clear_backoff_ms)).await;

        let second = match self.trigger.trigger().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() => e,
            Err(e) => return Err(e),
        };
        warn!(
            "trigger failed again ({}), resetting the channel",
            second
        );
        if let Err(e) = self.trigger.clear_pending().await {
            warn!("trigger buffer clear failed: {}", e);
        }
        self.trigger.reset_channel().await?;
        sleep(Duration::from_millis(self.recovery.reset_backoff_ms)).await;

        self.trigger.trigger().await
    }

    /// Run one measurement cycle and reduce its trace to the dip metric.
    async fn acquire_once(&mut self) -> AppResult<f64> {
        self.fire_trigger().await?;

        let settle =
            self.trigger.cycle_total() + Duration::from_millis(self.acq.settle_margin_ms);
        sleep(settle).await;

        let trace = self.analyzer.fetch_trace().await?;
        dip_metric(&trace, self.acq.dip_window, self.acq.exclude_first)
    }

    /// Average `averages` measurement cycles at the current setpoint.
    ///
    /// A cycle lost to a transient error is skipped, not repeated; the point
    /// is aggregated over whatever cycles survived and the shortfall goes to
    /// the log. Only a point with *zero* surviving cycles is an error.
    pub async fn acquire_point(&mut self, x: f64) -> AppResult<SweepPointResult> {
        let mut samples = Vec::with_capacity(self.acq.averages as usize);
        for cycle in 1..=self.acq.averages {
            // Progress marker per cycle, same rhythm the console has always
            // shown during long sweeps.
            print!(".");
            let _ = std::io::stdout().flush();

            match self.acquire_once().await {
                Ok(metric) => samples.push(metric),
                Err(e) if e.is_transient() => {
                    warn!(
                        "cycle {}/{} at x = {} lost: {}",
                        cycle, self.acq.averages, x, e
                    );
                }
                Err(e) => return Err(e),
            }
        }
        println!();

        let (mean, std_dev) = mean_std(&samples).ok_or_else(|| {
            DaqError::Processing(format!("all {} cycles at x = {} lost", self.acq.averages, x))
        })?;
        let achieved = samples.len() as u32;
        if achieved < self.acq.averages {
            warn!(
                "point x = {} averaged over {}/{} cycles",
                x, achieved, self.acq.averages
            );
        }
        Ok(SweepPointResult {
            x,
            mean,
            std_dev,
            samples: achieved,
        })
    }

    /// Walk the whole sweep, appending one record per point.
    ///
    /// A point lost to errors is logged and skipped; the sweep continues so
    /// an overnight run survives a flaky hour. Storage errors abort, there
    /// is no sense acquiring data nobody can read back.
    pub async fn run(
        &mut self,
        variable: SweepVariable,
        points: &[f64],
        writer: &mut ResultWriter,
    ) -> AppResult<()> {
        info!(
            "sweep over {:?}: {} points, {} cycles each",
            variable,
            points.len(),
            self.acq.averages
        );
        for (i, &x) in points.iter().enumerate() {
            info!("point {}/{}: x = {}", i + 1, points.len(), x);
            if let Err(e) = self.apply(variable, x).await {
                error!("skipping point x = {}: setpoint failed: {}", x, e);
                continue;
            }
            match self.acquire_point(x).await {
                Ok(result) => writer.append(&result)?,
                Err(e) => error!("skipping point x = {}: {}", x, e),
            }
        }
        Ok(())
    }

    /// Park the hardware after a sweep: excitation off, coil down to the
    /// cooldown current.
    pub async fn stand_down(&mut self, cooldown_a: f64) -> AppResult<()> {
        self.hf.output_off().await?;
        self.coil.set_current(cooldown_a).await?;
        info!("stand-down complete, coil parked at {} A", cooldown_a);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockState;
    use crate::hardware::MockAdapter;
    use crate::instrument::FetchRetry;
    use std::sync::{Arc, Mutex};

    struct Handles {
        trigger: Arc<Mutex<MockState>>,
        analyzer: Arc<Mutex<MockState>>,
    }

    fn runner(averages: u32) -> (SweepRunner, Handles) {
        let trigger = MockAdapter::new("trigger");
        let analyzer = MockAdapter::new("analyzer");
        let handles = Handles {
            trigger: trigger.handle(),
            analyzer: analyzer.handle(),
        };
        let acq = AcquisitionSettings {
            averages,
            settle_margin_ms: 200,
            dip_window: 3,
            exclude_first: false,
            fetch_attempts: 2,
            fetch_backoff_ms: 10,
        };
        let runner = SweepRunner::new(
            TriggerBox::new(Box::new(trigger)),
            SpectrumAnalyzer::new(
                Box::new(analyzer),
                FetchRetry {
                    attempts: acq.fetch_attempts,
                    backoff: Duration::from_millis(acq.fetch_backoff_ms),
                },
            ),
            CoilSupply::new(Box::new(MockAdapter::new("coil"))),
            RingSupply::new(Box::new(MockAdapter::new("ring"))),
            ExcitationGenerator::new(Box::new(MockAdapter::new("hf"))),
            acq,
            RecoverySettings {
                clear_backoff_ms: 10,
                reset_backoff_ms: 20,
            },
        );
        (runner, handles)
    }

    #[tokio::test(start_paused = true)]
    async fn clean_trigger_needs_no_recovery() {
        let (mut runner, handles) = runner(1);
        runner.fire_trigger().await.unwrap();

        let state = handles.trigger.lock().unwrap();
        assert_eq!(state.sent, vec!["trig"]);
        assert_eq!(state.clears, 0);
        assert_eq!(state.resets, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn one_failure_recovers_with_a_clear() {
        let (mut runner, handles) = runner(1);
        handles.trigger.lock().unwrap().fail_sends = 1;

        runner.fire_trigger().await.unwrap();

        let state = handles.trigger.lock().unwrap();
        assert_eq!(state.clears, 1);
        assert_eq!(state.resets, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn two_failures_escalate_to_a_reset() {
        let (mut runner, handles) = runner(1);
        handles.trigger.lock().unwrap().fail_sends = 2;

        runner.fire_trigger().await.unwrap();

        let state = handles.trigger.lock().unwrap();
        assert_eq!(state.clears, 2);
        assert_eq!(state.resets, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_exhaust_the_ladder() {
        let (mut runner, handles) = runner(1);
        handles.trigger.lock().unwrap().fail_sends = 3;

        let err = runner.fire_trigger().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn lost_cycle_shrinks_the_average_instead_of_failing() {
        let (mut runner, handles) = runner(2);
        // First cycle burns the whole ladder and is skipped; second succeeds.
        handles.trigger.lock().unwrap().fail_sends = 3;
        handles.analyzer.lock().unwrap().push_trace(&[
            -10.0, -10.0, -10.0, -18.0, -10.0, -10.0,
        ]);

        let result = runner.acquire_point(42.0).await.unwrap();
        assert_eq!(result.samples, 1);
        assert_eq!(result.mean, 8.0);
        assert_eq!(result.std_dev, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn point_with_no_surviving_cycles_is_an_error() {
        let (mut runner, handles) = runner(1);
        handles.trigger.lock().unwrap().fail_sends = 3;

        let err = runner.acquire_point(1.0).await.unwrap_err();
        assert!(matches!(err, DaqError::Processing(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_setpoint_goes_to_the_trigger_box() {
        let (mut runner, handles) = runner(1);
        runner.apply(SweepVariable::Wait2Ms, 120.4).await.unwrap();

        assert_eq!(handles.trigger.lock().unwrap().sent, vec!["wait2 120"]);
        assert_eq!(runner.trigger.timings().wait2, 120);
    }
}
