//! Spectrum analyzer control and trace readout.
//!
//! The analyzer runs in zero-span mode: center frequency fixed on the
//! resonator, externally triggered by the trigger box, one sweep per
//! measurement cycle. [`SpectrumAnalyzer::fetch_trace`] pulls the trace tied
//! to the most recent trigger and owns its own bounded retry, independent of
//! the acquisition loop's trigger recovery.

use crate::error::{AppResult, DaqError};
use crate::hardware::HardwareAdapter;
use log::{debug, warn};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;

/// Display/acquisition window pushed to the analyzer at startup.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AnalyzerWindow {
    /// Center frequency, in the unit-suffixed form the firmware takes.
    pub center_freq: String,
    /// Reference level in dBm.
    pub ref_level: f64,
    /// Vertical scale per division in dB.
    pub scale_per_div: f64,
    /// Sweep time in milliseconds. 100 ms shows the whole cycle; shorter
    /// values zoom in and put more points on the dip.
    pub sweep_time_ms: u64,
    /// Input attenuation in dB.
    pub attenuation: u32,
}

impl Default for AnalyzerWindow {
    fn default() -> Self {
        Self {
            center_freq: "57.35MHz".to_string(),
            ref_level: -16.0,
            scale_per_div: 3.0,
            sweep_time_ms: 250,
            attenuation: 7,
        }
    }
}

/// Bounded retry for trace fetches.
#[derive(Clone, Copy, Debug)]
pub struct FetchRetry {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for FetchRetry {
    fn default() -> Self {
        Self {
            attempts: 10,
            backoff: Duration::from_secs(4),
        }
    }
}

pub struct SpectrumAnalyzer {
    adapter: Box<dyn HardwareAdapter>,
    retry: FetchRetry,
}

impl SpectrumAnalyzer {
    pub fn new(adapter: Box<dyn HardwareAdapter>, retry: FetchRetry) -> Self {
        Self { adapter, retry }
    }

    /// Put the analyzer into externally-triggered zero-span mode with the
    /// given window. The trigger source and slope are not negotiable; the
    /// sample detector keeps the firmware from averaging away the dip.
    pub async fn configure_zero_span(&mut self, window: &AnalyzerWindow) -> AppResult<()> {
        let commands = [
            ":SYST:PRES:TYPe FACT".to_string(),
            ":SYST:PRES".to_string(),
            format!(":SENSe:FREQuency:CENTer {}", window.center_freq),
            ":SENSe:FREQuency:SPAN 0".to_string(),
            format!(":SENSe:SWEep:TIME {}ms", window.sweep_time_ms),
            ":SENSe:SWEep:TIME:AUTO:RULes NORMal".to_string(),
            ":TRIGger:SEQuence:SOURce EXTernal".to_string(),
            ":TRIGger:SEQuence:EXTernal:SLOPe POSitive".to_string(),
            ":SENSe:DETector:FUNCtion SAMPle".to_string(),
            format!(":SENSe:POWer:RF:ATTenuation {}", window.attenuation),
            ":SOURce:POWer:LEVel:IMMediate:AMPLitude -20dBm".to_string(),
            format!(":DISPlay:WINdow:TRACe:Y:SCALe:RLEVel {}", window.ref_level),
            format!(":DISPlay:WINdow:TRACe:Y:SCALe:PDIVision {}", window.scale_per_div),
            // Careful: without the LOG spacing the firmware defaults the
            // trace unit to volts.
            ":DISPlay:WINdow:TRACe:Y:SCALe:SPACing LOG".to_string(),
            "OUTPut ON".to_string(),
        ];
        for cmd in &commands {
            self.adapter.send(cmd).await?;
        }
        debug!("analyzer: zero-span window configured ({})", window.center_freq);
        Ok(())
    }

    /// Fetch the trace belonging to the most recent trigger.
    ///
    /// Retries up to the configured attempt count with a fixed backoff;
    /// after that the last error propagates and the caller decides what the
    /// loss of this trace means.
    pub async fn fetch_trace(&mut self) -> AppResult<Vec<f64>> {
        let mut last_err = DaqError::comm(self.adapter.name(), "no fetch attempted");
        for attempt in 1..=self.retry.attempts {
            match self.fetch_once().await {
                Ok(trace) => return Ok(trace),
                Err(e) if e.is_transient() => {
                    warn!(
                        "analyzer: trace fetch attempt {}/{} failed: {}",
                        attempt, self.retry.attempts, e
                    );
                    last_err = e;
                    if attempt < self.retry.attempts {
                        sleep(self.retry.backoff).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn fetch_once(&mut self) -> AppResult<Vec<f64>> {
        let raw = self.adapter.query(":TRACe:DATA? TRACE1").await?;
        parse_trace(self.adapter.name(), &raw)
    }
}

/// Strip the response header and parse the comma-separated amplitudes.
///
/// The firmware prefixes the payload with a length header; the payload
/// itself is all negative dBm values, so the first `-` within the leading
/// bytes marks where the numbers start. Synthetic traces without any
/// negative value have no header either, so fall back to parsing from the
/// beginning.
fn parse_trace(device: &str, raw: &str) -> AppResult<Vec<f64>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DaqError::parse(device, "empty trace response"));
    }

    // Byte search: the response passed through a lossy UTF-8 conversion, so
    // indexing by char boundary is not safe near line noise.
    let head_len = raw.len().min(100);
    let payload = match raw.as_bytes()[..head_len].iter().position(|&b| b == b'-') {
        Some(start) => &raw[start..],
        None => raw,
    };

    payload
        .split(',')
        .map(|s| {
            s.trim()
                .parse::<f64>()
                .map_err(|e| DaqError::parse(device, format!("bad sample '{}': {}", s, e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockAdapter;

    fn analyzer(retry: FetchRetry) -> (SpectrumAnalyzer, std::sync::Arc<std::sync::Mutex<crate::hardware::mock::MockState>>) {
        let adapter = MockAdapter::new("analyzer");
        let handle = adapter.handle();
        (SpectrumAnalyzer::new(Box::new(adapter), retry), handle)
    }

    #[test]
    fn parse_strips_length_header() {
        let trace = parse_trace("analyzer", "#9000000043 -10.0,-10.5,-18.2,-10.1").unwrap();
        assert_eq!(trace, vec![-10.0, -10.5, -18.2, -10.1]);
    }

    #[test]
    fn parse_accepts_headerless_positive_trace() {
        let trace = parse_trace("analyzer", "10,10,10,2,10,10").unwrap();
        assert_eq!(trace, vec![10.0, 10.0, 10.0, 2.0, 10.0, 10.0]);
    }

    #[test]
    fn parse_survives_multibyte_noise_at_the_head_boundary() {
        // Lossy UTF-8 conversion can leave a multibyte char straddling the
        // 100-byte header search window; that is malformed data, not a
        // crash.
        let mut raw = "#".repeat(99);
        raw.push('é'); // bytes 99..101
        raw.push_str("-10.0,-11.0");
        let err = parse_trace("analyzer", &raw).unwrap_err();
        assert!(matches!(err, DaqError::Parse { .. }));
    }

    #[test]
    fn parse_strips_header_containing_multibyte_chars() {
        let trace = parse_trace("analyzer", "#é\u{fffd} -10.0,-11.0").unwrap();
        assert_eq!(trace, vec![-10.0, -11.0]);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = parse_trace("analyzer", "-10.0,abc,-9.0").unwrap_err();
        assert!(matches!(err, DaqError::Parse { .. }));
        assert!(parse_trace("analyzer", "").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_retries_until_a_good_trace() {
        let (mut az, handle) = analyzer(FetchRetry {
            attempts: 3,
            backoff: Duration::from_millis(10),
        });
        {
            let mut state = handle.lock().unwrap();
            state.fail_queries = 2;
            state.push_trace(&[-10.0, -18.0, -10.0]);
        }

        let trace = az.fetch_trace().await.unwrap();
        assert_eq!(trace, vec![-10.0, -18.0, -10.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_gives_up_after_the_attempt_budget() {
        let (mut az, handle) = analyzer(FetchRetry {
            attempts: 3,
            backoff: Duration::from_millis(10),
        });
        handle.lock().unwrap().fail_queries = 3;

        let err = az.fetch_trace().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn zero_span_setup_fixes_trigger_source() {
        let (mut az, handle) = analyzer(FetchRetry::default());
        az.configure_zero_span(&AnalyzerWindow::default()).await.unwrap();

        let sent = handle.lock().unwrap().sent.clone();
        assert!(sent.contains(&":TRIGger:SEQuence:SOURce EXTernal".to_string()));
        assert!(sent.contains(&":SENSe:FREQuency:CENTer 57.35MHz".to_string()));
        assert!(sent.contains(&":SENSe:SWEep:TIME 250ms".to_string()));
        assert!(sent.contains(&":SENSe:FREQuency:SPAN 0".to_string()));
    }
}
