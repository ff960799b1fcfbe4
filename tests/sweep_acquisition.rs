//! End-to-end sweep runs against mock instruments: scripted traces in,
//! aggregated CSV records out.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use trap_daq::config::{AcquisitionSettings, RecoverySettings, SweepVariable};
use trap_daq::hardware::mock::MockState;
use trap_daq::hardware::MockAdapter;
use trap_daq::instrument::{
    CoilSupply, ExcitationGenerator, FetchRetry, RingSupply, SpectrumAnalyzer, TriggerBox,
};
use trap_daq::storage::ResultWriter;
use trap_daq::sweep::SweepRunner;

struct Rig {
    runner: SweepRunner,
    trigger: Arc<Mutex<MockState>>,
    analyzer: Arc<Mutex<MockState>>,
}

fn rig(acq: AcquisitionSettings) -> Rig {
    let trigger = MockAdapter::new("trigger");
    let analyzer = MockAdapter::new("analyzer");
    let trigger_handle = trigger.handle();
    let analyzer_handle = analyzer.handle();

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
    Rig {
        runner,
        trigger: trigger_handle,
        analyzer: analyzer_handle,
    }
}

/// A trace with baseline 10 and one dip of the given depth, sized for a
/// 3-sample baseline window.
fn dipped_trace(depth: f64) -> Vec<f64> {
    vec![10.0, 10.0, 10.0, 10.0 - depth, 10.0, 10.0]
}

#[tokio::test(start_paused = true)]
async fn single_point_reduces_trace_to_dip_depth() {
    let mut rig = rig(AcquisitionSettings {
        averages: 1,
        settle_margin_ms: 200,
        dip_window: 3,
        exclude_first: false,
        fetch_attempts: 2,
        fetch_backoff_ms: 10,
    });
    rig.analyzer.lock().unwrap().push_trace(&dipped_trace(8.0));

    let result = rig.runner.acquire_point(10.0).await.unwrap();
    assert_eq!(result.mean, 8.0);
    assert_eq!(result.std_dev, 0.0);
    assert_eq!(result.samples, 1);
}

#[tokio::test(start_paused = true)]
async fn wait_sweep_emits_one_record_per_point() {
    let mut rig = rig(AcquisitionSettings {
        averages: 3,
        settle_margin_ms: 200,
        dip_window: 3,
        exclude_first: false,
        fetch_attempts: 2,
        fetch_backoff_ms: 10,
    });
    let points = [20.0, 100.0, 500.0];
    {
        let mut analyzer = rig.analyzer.lock().unwrap();
        for (i, _) in points.iter().enumerate() {
            let depth = 2.0 * (i + 1) as f64;
            for _ in 0..3 {
                analyzer.push_trace(&dipped_trace(depth));
            }
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sweep.csv");
    let mut writer = ResultWriter::create(&path, 1).unwrap();

    rig.runner
        .run(SweepVariable::Wait2Ms, &points, &mut writer)
        .await
        .unwrap();
    writer.finish().unwrap();

    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "20,2.0,0.0\n100,4.0,0.0\n500,6.0,0.0\n"
    );

    let sent = rig.trigger.lock().unwrap().sent.clone();
    let waits: Vec<&String> = sent.iter().filter(|c| c.starts_with("wait2")).collect();
    assert_eq!(waits, ["wait2 20", "wait2 100", "wait2 500"]);
    assert_eq!(sent.iter().filter(|c| c.as_str() == "trig").count(), 9);
}

#[tokio::test(start_paused = true)]
async fn jittered_traces_average_to_the_dip_depth() {
    let mut rig = rig(AcquisitionSettings {
        averages: 5,
        settle_margin_ms: 200,
        dip_window: 3,
        exclude_first: false,
        fetch_attempts: 2,
        fetch_backoff_ms: 10,
    });
    {
        let mut analyzer = rig.analyzer.lock().unwrap();
        for _ in 0..5 {
            analyzer.push_trace(&trap_daq::hardware::mock::noisy_trace(-10.0, 8.0, 601, 0.05));
        }
    }

    let result = rig.runner.acquire_point(0.0).await.unwrap();
    assert_eq!(result.samples, 5);
    // Baseline estimate and minimum each wobble by at most the jitter.
    assert!((result.mean - 8.0).abs() < 0.2, "mean was {}", result.mean);
    assert!(result.std_dev < 0.2, "std was {}", result.std_dev);
}

#[tokio::test(start_paused = true)]
async fn flaky_trigger_heals_mid_sweep() {
    let mut rig = rig(AcquisitionSettings {
        averages: 2,
        settle_margin_ms: 200,
        dip_window: 3,
        exclude_first: false,
        fetch_attempts: 2,
        fetch_backoff_ms: 10,
    });
    rig.runner.apply(SweepVariable::Wait2Ms, 50.0).await.unwrap();
    // First cycle's trigger fails once; the clear-and-retry rung recovers it
    // and both cycles still contribute to the average.
    rig.trigger.lock().unwrap().fail_sends = 1;
    {
        let mut analyzer = rig.analyzer.lock().unwrap();
        analyzer.push_trace(&dipped_trace(4.0));
        analyzer.push_trace(&dipped_trace(4.0));
    }

    let result = rig.runner.acquire_point(50.0).await.unwrap();

    assert_eq!(result.samples, 2);
    assert_eq!(result.mean, 4.0);
    let state = rig.trigger.lock().unwrap();
    assert_eq!(state.clears, 1);
    assert_eq!(state.resets, 0);
}

#[tokio::test(start_paused = true)]
async fn dead_point_is_skipped_and_the_sweep_continues() {
    let mut rig = rig(AcquisitionSettings {
        averages: 1,
        settle_margin_ms: 200,
        dip_window: 3,
        exclude_first: false,
        fetch_attempts: 1,
        fetch_backoff_ms: 10,
    });
    // First point: every trigger attempt fails (ladder is 3 deep per cycle).
    rig.trigger.lock().unwrap().fail_sends = 3;
    rig.analyzer.lock().unwrap().push_trace(&dipped_trace(2.0));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sweep.csv");
    let mut writer = ResultWriter::create(&path, 1).unwrap();

    rig.runner
        .run(SweepVariable::RingVoltage, &[30.0, 35.0], &mut writer)
        .await
        .unwrap();
    writer.finish().unwrap();

    // Only the surviving point made it to disk.
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "35,2.0,0.0\n");
    assert_eq!(rig.trigger.lock().unwrap().resets, 1);
}
