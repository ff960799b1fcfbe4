//! VISA adapter for GPIB/USB attached devices.
//!
//! Uses the `visa-rs` crate to talk to instruments through the installed
//! VISA library (the excitation generator on GPIB, the spectrum analyzer on
//! USB-TMC). Sessions implement the std I/O traits, so reads and writes run
//! on the blocking task executor like the serial adapter's.

use crate::error::{AppResult, DaqError};
use crate::hardware::HardwareAdapter;
use async_trait::async_trait;
use log::debug;
use std::ffi::CString;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use visa_rs::prelude::*;

/// Pause between closing and reopening a session during a channel reset.
const REOPEN_DELAY: Duration = Duration::from_secs(2);

pub struct VisaAdapter {
    label: String,
    resource_string: String,
    session: Option<Arc<Mutex<Instrument>>>,
}

impl VisaAdapter {
    /// Open the VISA resource and return a connected adapter.
    pub async fn open(label: &str, resource_string: &str) -> AppResult<Self> {
        let mut adapter = Self {
            label: label.to_string(),
            resource_string: resource_string.to_string(),
            session: None,
        };
        adapter.session = Some(adapter.open_session().await?);
        Ok(adapter)
    }

    async fn open_session(&self) -> AppResult<Arc<Mutex<Instrument>>> {
        let label = self.label.clone();
        let resource = self.resource_string.clone();

        let session = tokio::task::spawn_blocking(move || -> AppResult<Instrument> {
            let rm = DefaultRM::new()
                .map_err(|e| DaqError::comm(&label, format!("VISA resource manager: {}", e)))?;
            let c_string = CString::new(resource.as_str())
                .map_err(|e| DaqError::comm(&label, format!("bad resource string: {}", e)))?;
            let visa_string = visa_rs::VisaString::from(c_string);
            rm.open(&visa_string, AccessMode::NO_LOCK, TIMEOUT_IMMEDIATE)
                .map_err(|e| DaqError::comm(&label, format!("failed to open '{}': {}", resource, e)))
        })
        .await
        .map_err(|e| DaqError::comm(&self.label, format!("VISA open task panicked: {}", e)))??;

        debug!("[{}] VISA session '{}' opened", self.label, self.resource_string);
        Ok(Arc::new(Mutex::new(session)))
    }

    fn session(&self) -> AppResult<Arc<Mutex<Instrument>>> {
        self.session
            .clone()
            .ok_or_else(|| DaqError::NotConnected(self.label.clone()))
    }
}

#[async_trait]
impl HardwareAdapter for VisaAdapter {
    fn name(&self) -> &str {
        &self.label
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        let session = self.session()?;
        let label = self.label.clone();
        let framed = format!("{}\n", command);
        let logged = command.to_string();

        tokio::task::spawn_blocking(move || {
            use std::io::Write;

            let mut guard = session.blocking_lock();
            guard
                .write_all(framed.as_bytes())
                .map_err(|e| DaqError::comm(&label, format!("write failed: {}", e)))?;
            debug!("[{}] sent: {}", label, logged);
            Ok(())
        })
        .await
        .map_err(|e| DaqError::comm(&self.label, format!("VISA I/O task panicked: {}", e)))?
    }

    async fn query(&mut self, command: &str) -> AppResult<String> {
        let session = self.session()?;
        let label = self.label.clone();
        let framed = format!("{}\n", command);
        let logged = command.to_string();

        tokio::task::spawn_blocking(move || -> AppResult<String> {
            use std::io::{Read, Write};

            let mut guard = session.blocking_lock();
            guard
                .write_all(framed.as_bytes())
                .map_err(|e| DaqError::comm(&label, format!("write failed: {}", e)))?;

            debug!("[{}] sent: {}", label, logged);

            // Spectrum traces run to several kilobytes; keep reading until a
            // chunk comes back short, which marks the end of the message.
            let mut response = Vec::new();
            loop {
                let mut buf = [0u8; 4096];
                let bytes_read = guard
                    .read(&mut buf)
                    .map_err(|e| DaqError::comm(&label, format!("read failed: {}", e)))?;
                response.extend_from_slice(&buf[..bytes_read]);
                if bytes_read < buf.len() {
                    break;
                }
            }

            let response = String::from_utf8_lossy(&response).trim().to_string();
            debug!("[{}] received {} bytes", label, response.len());
            Ok(response)
        })
        .await
        .map_err(|e| DaqError::comm(&self.label, format!("VISA I/O task panicked: {}", e)))?
    }

    /// Drain whatever the device still has queued. VISA has no cheap flush
    /// for message-based sessions, so read and discard until empty.
    async fn clear(&mut self) -> AppResult<()> {
        let session = self.session()?;
        let label = self.label.clone();

        tokio::task::spawn_blocking(move || {
            use std::io::Read;

            let mut guard = session.blocking_lock();
            let mut buf = [0u8; 4096];
            while let Ok(n) = guard.read(&mut buf) {
                if n < buf.len() {
                    break;
                }
            }
            debug!("[{}] drained pending VISA output", label);
            Ok(())
        })
        .await
        .map_err(|e| DaqError::comm(&self.label, format!("VISA I/O task panicked: {}", e)))?
    }

    async fn reset(&mut self) -> AppResult<()> {
        self.session = None;
        tokio::time::sleep(REOPEN_DELAY).await;
        self.session = Some(self.open_session().await?);
        debug!("[{}] VISA session reset complete", self.label);
        Ok(())
    }
}
