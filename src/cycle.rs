//! Measurement-cycle timing.
//!
//! One measurement cycle is a fixed pulse sequence emitted by the trigger
//! box: load the trap, wait, excite, wait, start the analyzer sweep, wait,
//! ramp the detection voltage. Every stage duration is *relative to the
//! previous pulse*, so the total cycle time is a plain sum and stages can be
//! reshuffled without recomputing offsets.
//!
//! [`StageTimings`] carries one field per stage, so a timing set is complete
//! by construction; there is no way to compute a cycle total with a stage
//! missing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One named phase of the measurement cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Load,
    Wait1,
    Excite,
    Wait2,
    Rigol,
    Wait3,
    Detect,
}

impl Stage {
    /// All stages, in the order their pulses are emitted.
    pub const ALL: [Stage; 7] = [
        Stage::Load,
        Stage::Wait1,
        Stage::Excite,
        Stage::Wait2,
        Stage::Rigol,
        Stage::Wait3,
        Stage::Detect,
    ];

    /// The identifier the trigger box firmware expects on the wire.
    pub fn token(self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Wait1 => "wait1",
            Stage::Excite => "excite",
            Stage::Wait2 => "wait2",
            Stage::Rigol => "rigol",
            Stage::Wait3 => "wait3",
            Stage::Detect => "detect",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Relative stage durations in milliseconds for one full cycle.
///
/// The `rigol` stage starts after `wait2`, but the analyzer trigger can be
/// shifted independently to later times with `wait3`, which is why `wait3`
/// still contributes to the total even though it overlaps the detection ramp
/// on the hardware side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimings {
    pub load: u64,
    pub wait1: u64,
    pub excite: u64,
    pub wait2: u64,
    pub rigol: u64,
    pub wait3: u64,
    pub detect: u64,
}

impl Default for StageTimings {
    /// The timing set used for the lifetime measurement: a long load phase,
    /// short guard waits, and a 50 ms detection ramp. The 5 ms `rigol` lead
    /// compensates the analyzer's external-trigger latency.
    fn default() -> Self {
        Self {
            load: 500,
            wait1: 5,
            excite: 10,
            wait2: 5,
            rigol: 5,
            wait3: 30,
            detect: 50,
        }
    }
}

impl StageTimings {
    pub fn get(&self, stage: Stage) -> u64 {
        match stage {
            Stage::Load => self.load,
            Stage::Wait1 => self.wait1,
            Stage::Excite => self.excite,
            Stage::Wait2 => self.wait2,
            Stage::Rigol => self.rigol,
            Stage::Wait3 => self.wait3,
            Stage::Detect => self.detect,
        }
    }

    pub fn set(&mut self, stage: Stage, ms: u64) {
        match stage {
            Stage::Load => self.load = ms,
            Stage::Wait1 => self.wait1 = ms,
            Stage::Excite => self.excite = ms,
            Stage::Wait2 => self.wait2 = ms,
            Stage::Rigol => self.rigol = ms,
            Stage::Wait3 => self.wait3 = ms,
            Stage::Detect => self.detect = ms,
        }
    }

    /// Total cycle time in milliseconds: the sum of all seven stages.
    pub fn total_ms(&self) -> u64 {
        Stage::ALL.iter().map(|&s| self.get(s)).sum()
    }

    /// Total cycle time as a [`Duration`], used to size the post-trigger
    /// settle sleep.
    pub fn total(&self) -> Duration {
        Duration::from_millis(self.total_ms())
    }

    /// Time the trigger box spends actively pulsing, excluding the analyzer
    /// lead and its shift. Past ~1.5 s of this the box's serial link starts
    /// dropping bytes.
    pub fn active_ms(&self) -> u64 {
        self.load + self.wait1 + self.excite + self.wait2 + self.detect
    }
}
