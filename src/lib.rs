//! Automation for a Penning-trap electron lifetime experiment.
//!
//! The setup is a room-temperature Penning trap read out through a resonant
//! circuit and a spectrum analyzer in zero-span mode. A serial trigger box
//! paces the measurement cycle (load, excite, detect); this crate programs
//! the cycle timing, drives the surrounding instruments (magnet coil supply,
//! ring voltage source, excitation generator, analyzer), and runs parameter
//! sweeps that reduce each analyzer trace to a single dip-depth number.
//!
//! Layering, bottom to top:
//! - [`hardware`]: transport adapters (serial, VISA, mock) behind one trait
//! - [`instrument`]: per-device wrappers speaking each device's dialect
//! - [`cycle`], [`metric`]: the timing model and the trace reduction
//! - [`sweep`]: the acquisition loop with its trigger recovery ladder
//! - [`config`], [`storage`], [`error`]: settings, the result stream, errors

pub mod config;
pub mod cycle;
pub mod error;
pub mod hardware;
pub mod instrument;
pub mod metric;
pub mod storage;
pub mod sweep;
