//! Sweep runner binary.
//!
//! Loads the layered configuration, opens the five instrument channels,
//! programs the measurement cycle and the analyzer window, runs the
//! configured sweep, and parks the hardware afterwards. Everything the run
//! does lands in the log; the measured records land in a timestamped CSV
//! under the configured output directory.

use anyhow::Context;
use chrono::Local;
use log::{info, warn};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use trap_daq::config::{AdapterKind, Endpoint, Settings};
use trap_daq::error::{AppResult, DaqError};
use trap_daq::hardware::{HardwareAdapter, MockAdapter};
use trap_daq::instrument::{
    CoilSupply, ExcitationGenerator, FetchRetry, RingSupply, SpectrumAnalyzer, TriggerBox,
};
use trap_daq::storage::ResultWriter;
use trap_daq::sweep::SweepRunner;

async fn build_adapter(label: &str, endpoint: &Endpoint) -> AppResult<Box<dyn HardwareAdapter>> {
    match endpoint.kind {
        AdapterKind::Mock => {
            warn!("[{}] using mock adapter, no hardware attached", label);
            Ok(Box::new(MockAdapter::new(label)))
        }
        AdapterKind::Serial => {
            #[cfg(feature = "instrument_serial")]
            {
                let adapter = trap_daq::hardware::SerialAdapter::open(
                    label,
                    &endpoint.address,
                    endpoint.baud,
                )
                .await?;
                Ok(Box::new(adapter))
            }
            #[cfg(not(feature = "instrument_serial"))]
            {
                Err(DaqError::FeatureNotEnabled("instrument_serial".into()))
            }
        }
        AdapterKind::Visa => {
            #[cfg(feature = "instrument_visa")]
            {
                let adapter =
                    trap_daq::hardware::VisaAdapter::open(label, &endpoint.address).await?;
                Ok(Box::new(adapter))
            }
            #[cfg(not(feature = "instrument_visa"))]
            {
                Err(DaqError::FeatureNotEnabled("instrument_visa".into()))
            }
        }
    }
}

fn output_path(settings: &Settings) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    PathBuf::from(&settings.output.directory)
        .join(format!("{}_{}.csv", settings.output.file_stem, stamp))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::load().context("loading configuration")?;
    settings.validate().context("validating configuration")?;

    let trigger = TriggerBox::new(
        build_adapter("trigger", &settings.instruments.trigger_box).await?,
    );
    let analyzer = SpectrumAnalyzer::new(
        build_adapter("analyzer", &settings.instruments.analyzer).await?,
        FetchRetry {
            attempts: settings.acquisition.fetch_attempts,
            backoff: Duration::from_millis(settings.acquisition.fetch_backoff_ms),
        },
    );
    let coil = CoilSupply::new(build_adapter("coil", &settings.instruments.coil).await?);
    let ring = RingSupply::new(build_adapter("ring", &settings.instruments.ring).await?);
    let hf = ExcitationGenerator::new(
        build_adapter("hf", &settings.instruments.hf_generator).await?,
    );

    let mut runner = SweepRunner::new(
        trigger,
        analyzer,
        coil,
        ring,
        hf,
        settings.acquisition,
        settings.recovery,
    );

    // Cycle timing first; everything downstream paces itself off it.
    runner
        .trigger
        .apply_timings(&settings.timing)
        .await
        .context("programming cycle timings")?;
    match runner.trigger.read_back_times().await {
        Ok(times) => info!("trigger box confirms stage times {:?}", times),
        Err(e) => warn!("trigger box timing read-back failed: {}", e),
    }

    runner
        .analyzer
        .configure_zero_span(&settings.analyzer)
        .await
        .context("configuring the analyzer")?;
    // The analyzer discards its first external trigger right after a preset.
    sleep(Duration::from_secs(1)).await;

    runner
        .coil
        .set_current(settings.sweep.coil_current)
        .await
        .context("setting the coil current")?;
    match settings.ring_ramp {
        Some(ramp) => {
            runner
                .ring
                .configure_ramp(settings.sweep.ring_voltage, ramp.stop_voltage, ramp.time_ms)
                .await
                .context("arming the ring detection ramp")?;
        }
        None => {
            runner
                .ring
                .set_voltage(settings.sweep.ring_voltage)
                .await
                .context("setting the ring voltage")?;
        }
    }
    runner
        .hf
        .set_frequency_mhz(settings.sweep.excitation_frequency_mhz)
        .await
        .context("setting the excitation frequency")?;
    runner
        .hf
        .set_power_dbm(settings.sweep.excitation_power_dbm)
        .await
        .context("setting the excitation power")?;
    runner.hf.output_on().await.context("enabling excitation")?;

    let points = settings.sweep.points();
    let path = output_path(&settings);
    let mut writer = ResultWriter::create(&path, settings.output.flush_every)?;

    let sweep_result = runner
        .run(settings.sweep.variable, &points, &mut writer)
        .await;

    // Stand down on every exit path; a sweep failure must not leave the
    // excitation on or the coils hot.
    if let Err(e) = runner.stand_down(settings.coil_cooldown_a).await {
        warn!("stand-down failed, check the hardware by hand: {}", e);
    }
    writer.finish()?;
    sweep_result.context("running the sweep")?;

    info!("sweep complete, results in '{}'", path.display());
    Ok(())
}
