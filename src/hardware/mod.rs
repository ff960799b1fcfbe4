//! Hardware adapter layer.
//!
//! An adapter owns one physical connection and exposes the minimal
//! capability set the instrument wrappers need: fire-and-forget commands,
//! query/response, a best-effort flush of stale device state, and a full
//! channel reset. Each adapter is held exclusively by exactly one instrument
//! wrapper; there is no sharing and no locking discipline beyond what the
//! blocking I/O helpers need internally.

use crate::error::AppResult;
use async_trait::async_trait;

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;
#[cfg(feature = "instrument_visa")]
pub mod visa;

pub use mock::MockAdapter;
#[cfg(feature = "instrument_serial")]
pub use serial::SerialAdapter;
#[cfg(feature = "instrument_visa")]
pub use visa::VisaAdapter;

/// Low-level I/O abstraction over one instrument connection.
#[async_trait]
pub trait HardwareAdapter: Send {
    /// Label used in logs and error messages (e.g. "trigger", "analyzer").
    fn name(&self) -> &str;

    /// Send a command without waiting for a response.
    async fn send(&mut self, command: &str) -> AppResult<()>;

    /// Send a command and wait for one delimited response.
    async fn query(&mut self, command: &str) -> AppResult<String>;

    /// Best-effort flush of any pending device state (stale bytes in the
    /// receive buffer, half-written commands). Failure here is not fatal;
    /// callers log and move on.
    async fn clear(&mut self) -> AppResult<()>;

    /// Tear down and re-establish the underlying channel. Unlike `clear`,
    /// a failure here means the device is genuinely gone.
    async fn reset(&mut self) -> AppResult<()>;
}
