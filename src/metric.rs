//! Trace reduction: the dip metric and its aggregation.
//!
//! One zero-span trace shows the resonator's response over a measurement
//! cycle; trapped electrons show up as a dip. The experiment's observable is
//! the maximum-minimum difference (MMD): the trace's leading baseline minus
//! its deepest point.

use crate::error::{AppResult, DaqError};

/// Depth of the deepest dip in `trace`.
///
/// `head_window` samples at the start of the trace estimate the baseline
/// (they precede the detection ramp). With `exclude_first`, the very first
/// sample is left out of the minimum search; it regularly carries a trigger
/// artifact.
pub fn dip_metric(trace: &[f64], head_window: usize, exclude_first: bool) -> AppResult<f64> {
    if head_window == 0 {
        return Err(DaqError::Processing("dip window must be >= 1".into()));
    }
    if trace.len() < head_window {
        return Err(DaqError::Processing(format!(
            "trace has {} samples, dip window needs {}",
            trace.len(),
            head_window
        )));
    }

    let baseline = trace[..head_window].iter().sum::<f64>() / head_window as f64;

    let tail = if exclude_first && trace.len() > 1 {
        &trace[1..]
    } else {
        trace
    };
    let minimum = tail.iter().cloned().fold(f64::INFINITY, f64::min);

    Ok(baseline - minimum)
}

/// Mean and *population* standard deviation of a sample set.
///
/// Population (not sample) deviation: the repeats of one sweep point are the
/// whole population of interest, and a single repeat then has deviation 0
/// instead of being undefined. Returns `None` for an empty set.
pub fn mean_std(samples: &[f64]) -> Option<(f64, f64)> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}
