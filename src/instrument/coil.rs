//! Magnet coil power supply (4-channel bench supply).
//!
//! The trap's field coils hang off outputs 3 and 4 and must always carry the
//! same current, so one setpoint programs both channels.

use crate::error::AppResult;
use crate::hardware::HardwareAdapter;
use log::debug;

pub struct CoilSupply {
    adapter: Box<dyn HardwareAdapter>,
}

impl CoilSupply {
    pub fn new(adapter: Box<dyn HardwareAdapter>) -> Self {
        Self { adapter }
    }

    /// Program both coil outputs to `current` amperes.
    /// The coils saturate the supply above 1.3 A.
    pub async fn set_current(&mut self, current: f64) -> AppResult<()> {
        let cmd = format!("CURR {:.3}", current);
        self.adapter.send("INST OUT3").await?;
        self.adapter.send(&cmd).await?;
        self.adapter.send("INST OUT4").await?;
        self.adapter.send(&cmd).await?;
        debug!("coil: current set to {:.3} A on OUT3/OUT4", current);
        Ok(())
    }
}
