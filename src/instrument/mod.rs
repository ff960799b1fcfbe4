//! Instrument wrappers.
//!
//! Each wrapper owns one [`HardwareAdapter`](crate::hardware::HardwareAdapter)
//! and translates domain operations into the device's command set. The
//! wrappers carry the fixed settle delays the hardware needs after individual
//! commands; pacing between whole measurement cycles is the sweep runner's
//! job.

pub mod analyzer;
pub mod coil;
pub mod hf_generator;
pub mod ring;
pub mod trigger_box;

pub use analyzer::{AnalyzerWindow, FetchRetry, SpectrumAnalyzer};
pub use coil::CoilSupply;
pub use hf_generator::ExcitationGenerator;
pub use ring::RingSupply;
pub use trigger_box::TriggerBox;
