//! Ring electrode voltage source.
//!
//! Sets the trap's ring potential and, for detection, arms a hardware
//! voltage sweep that ramps the ring during the cycle's detect stage. The
//! supply keeps the armed sweep parameters until rearmed, so repeated
//! identical ramps only need `rearm`.

use crate::error::AppResult;
use crate::hardware::HardwareAdapter;
use log::debug;

pub struct RingSupply {
    adapter: Box<dyn HardwareAdapter>,
}

impl RingSupply {
    pub fn new(adapter: Box<dyn HardwareAdapter>) -> Self {
        Self { adapter }
    }

    /// Set the ring voltage and make sure the output is on. This is the
    /// voltage the electrons see during loading and excitation; the
    /// detection ramp starts from it.
    pub async fn set_voltage(&mut self, voltage: f64) -> AppResult<()> {
        self.adapter.send(&format!("VOLT{}", voltage)).await?;
        self.adapter.send("SOUTon").await?;
        debug!("ring: voltage set to {} V", voltage);
        Ok(())
    }

    /// Configure and arm the detection voltage ramp. The fastest ramp the
    /// supply supports over its full range is 100 ms.
    pub async fn configure_ramp(&mut self, start: f64, stop: f64, time_ms: u64) -> AppResult<()> {
        self.set_voltage(start).await?;
        self.adapter.send("SCAR RANGE100").await?;
        self.adapter.send(&format!("SCAB{}", start)).await?;
        self.adapter.send(&format!("SCAE{}", stop)).await?;
        self.adapter.send(&format!("SCAT{}", time_ms)).await?;
        self.adapter.send("SCAA ARMED").await?;
        debug!("ring: ramp armed {} V -> {} V over {} ms", start, stop, time_ms);
        Ok(())
    }

    /// Rearm the supply for the next identical ramp.
    pub async fn rearm(&mut self) -> AppResult<()> {
        self.adapter.send("SCAA ARMED").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockAdapter;

    #[tokio::test]
    async fn voltage_setpoint_keeps_output_on() {
        let adapter = MockAdapter::new("ring");
        let handle = adapter.handle();
        let mut ring = RingSupply::new(Box::new(adapter));

        ring.set_voltage(39.5).await.unwrap();

        assert_eq!(handle.lock().unwrap().sent, vec!["VOLT39.5", "SOUTon"]);
    }

    #[tokio::test]
    async fn rearm_resends_only_the_arm_command() {
        let adapter = MockAdapter::new("ring");
        let handle = adapter.handle();
        let mut ring = RingSupply::new(Box::new(adapter));

        ring.configure_ramp(39.5, 15.0, 100).await.unwrap();
        handle.lock().unwrap().sent.clear();

        ring.rearm().await.unwrap();

        // The supply keeps the ramp endpoints; the next identical ramp only
        // needs the arm.
        assert_eq!(handle.lock().unwrap().sent, vec!["SCAA ARMED"]);
    }

    #[tokio::test]
    async fn ramp_configuration_arms_the_sweep() {
        let adapter = MockAdapter::new("ring");
        let handle = adapter.handle();
        let mut ring = RingSupply::new(Box::new(adapter));

        ring.configure_ramp(39.5, 15.0, 100).await.unwrap();

        assert_eq!(
            handle.lock().unwrap().sent,
            vec![
                "VOLT39.5",
                "SOUTon",
                "SCAR RANGE100",
                "SCAB39.5",
                "SCAE15",
                "SCAT100",
                "SCAA ARMED"
            ]
        );
    }
}
