//! Serial adapter for RS-232 attached devices.
//!
//! Wraps the `serialport` crate and provides async I/O by running the
//! blocking serial operations on Tokio's blocking task executor. Commands
//! are line-terminated; responses are read byte-by-byte until the delimiter
//! or an overall timeout.

use crate::error::{AppResult, DaqError};
use crate::hardware::HardwareAdapter;
use async_trait::async_trait;
use log::debug;
use serialport::{ClearBuffer, SerialPort};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// How long a device gets to reboot between closing and reopening its port
/// during a channel reset. The trigger box (an Arduino) re-enumerates USB
/// when its port is reopened.
const REOPEN_DELAY: Duration = Duration::from_secs(2);

pub struct SerialAdapter {
    /// Label for logs and errors.
    label: String,

    /// Port name (e.g. "/dev/ttyUSB0", "COM5").
    port_name: String,

    /// Baud rate (e.g. 9600, 115200).
    baud_rate: u32,

    /// Overall response timeout.
    timeout: Duration,

    /// Line terminator appended to every command.
    line_terminator: &'static str,

    /// Response delimiter byte.
    response_delimiter: u8,

    /// The open port, behind Arc<Mutex> so blocking tasks can borrow it.
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialAdapter {
    /// Open the port and return a connected adapter.
    pub async fn open(label: &str, port_name: &str, baud_rate: u32) -> AppResult<Self> {
        let mut adapter = Self {
            label: label.to_string(),
            port_name: port_name.to_string(),
            baud_rate,
            timeout: Duration::from_secs(1),
            line_terminator: "\r\n",
            response_delimiter: b'\n',
            port: None,
        };
        adapter.port = Some(adapter.open_port().await?);
        Ok(adapter)
    }

    async fn open_port(&self) -> AppResult<Arc<Mutex<Box<dyn SerialPort>>>> {
        let label = self.label.clone();
        let port_name = self.port_name.clone();
        let baud_rate = self.baud_rate;

        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&port_name, baud_rate)
                // Internal read timeout; the overall timeout is enforced by
                // the read loop in query().
                .timeout(Duration::from_millis(100))
                .open()
                .map_err(|e| {
                    DaqError::comm(
                        &label,
                        format!("failed to open '{}' at {} baud: {}", port_name, baud_rate, e),
                    )
                })
        })
        .await
        .map_err(|e| DaqError::comm(&self.label, format!("serial open task panicked: {}", e)))??;

        debug!(
            "[{}] serial port '{}' opened at {} baud",
            self.label, self.port_name, self.baud_rate
        );
        Ok(Arc::new(Mutex::new(port)))
    }

    fn port(&self) -> AppResult<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port
            .clone()
            .ok_or_else(|| DaqError::NotConnected(self.label.clone()))
    }
}

#[async_trait]
impl HardwareAdapter for SerialAdapter {
    fn name(&self) -> &str {
        &self.label
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        let port = self.port()?;
        let label = self.label.clone();
        let framed = format!("{}{}", command, self.line_terminator);
        let logged = command.to_string();

        tokio::task::spawn_blocking(move || {
            use std::io::Write;

            let mut guard = port.blocking_lock();
            guard
                .write_all(framed.as_bytes())
                .and_then(|()| guard.flush())
                .map_err(|e| DaqError::comm(&label, format!("write failed: {}", e)))?;

            debug!("[{}] sent: {}", label, logged);
            Ok(())
        })
        .await
        .map_err(|e| DaqError::comm(&self.label, format!("serial I/O task panicked: {}", e)))?
    }

    async fn query(&mut self, command: &str) -> AppResult<String> {
        let port = self.port()?;
        let label = self.label.clone();
        let framed = format!("{}{}", command, self.line_terminator);
        let logged = command.to_string();
        let delimiter = self.response_delimiter;
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || -> AppResult<String> {
            use std::io::{Read, Write};

            let mut guard = port.blocking_lock();
            guard
                .write_all(framed.as_bytes())
                .and_then(|()| guard.flush())
                .map_err(|e| DaqError::comm(&label, format!("write failed: {}", e)))?;

            debug!("[{}] sent: {}", label, logged);

            let mut response = Vec::new();
            let mut buffer = [0u8; 1];
            let start = Instant::now();

            loop {
                if start.elapsed() > timeout {
                    return Err(DaqError::comm(
                        &label,
                        format!("read timeout after {:?}", timeout),
                    ));
                }

                match guard.read(&mut buffer) {
                    Ok(1) => {
                        if buffer[0] == delimiter {
                            break;
                        }
                        response.push(buffer[0]);
                    }
                    Ok(_) => {
                        return Err(DaqError::comm(&label, "unexpected EOF on serial port"));
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        // Port timeout is shorter than the overall timeout.
                        continue;
                    }
                    Err(e) => {
                        return Err(DaqError::comm(&label, format!("read failed: {}", e)));
                    }
                }
            }

            let response = String::from_utf8_lossy(&response).trim().to_string();
            debug!("[{}] received: {}", label, response);
            Ok(response)
        })
        .await
        .map_err(|e| DaqError::comm(&self.label, format!("serial I/O task panicked: {}", e)))?
    }

    async fn clear(&mut self) -> AppResult<()> {
        let port = self.port()?;
        let label = self.label.clone();

        tokio::task::spawn_blocking(move || {
            let guard = port.blocking_lock();
            guard
                .clear(ClearBuffer::All)
                .map_err(|e| DaqError::comm(&label, format!("buffer clear failed: {}", e)))?;
            debug!("[{}] cleared pending serial buffers", label);
            Ok(())
        })
        .await
        .map_err(|e| DaqError::comm(&self.label, format!("serial I/O task panicked: {}", e)))?
    }

    /// Close the port, wait for the device to settle, and reopen. The new
    /// handle replaces the owned one, so every later command goes through the
    /// fresh connection.
    async fn reset(&mut self) -> AppResult<()> {
        self.port = None;
        tokio::time::sleep(REOPEN_DELAY).await;
        self.port = Some(self.open_port().await?);
        debug!("[{}] serial channel reset complete", self.label);
        Ok(())
    }
}
