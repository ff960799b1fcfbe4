//! Mock hardware adapter for testing without physical instruments.
//!
//! The mock records every command it is sent, replays scripted query
//! responses in order, and can be told to fail the next N sends or queries
//! with a communication error. State lives behind a shared handle so tests
//! keep visibility after the adapter has been moved into an instrument
//! wrapper.

use crate::error::{AppResult, DaqError};
use crate::hardware::HardwareAdapter;
use async_trait::async_trait;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct MockState {
    /// Every command passed to `send` or `query`, in order.
    pub sent: Vec<String>,
    /// Scripted responses consumed front-to-back by `query`.
    pub responses: VecDeque<String>,
    /// Number of upcoming `send` calls that fail.
    pub fail_sends: u32,
    /// Number of upcoming `query` calls that fail.
    pub fail_queries: u32,
    /// How many times `clear` was called.
    pub clears: u32,
    /// How many times `reset` was called.
    pub resets: u32,
}

pub struct MockAdapter {
    label: String,
    state: Arc<Mutex<MockState>>,
}

impl MockAdapter {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Shared handle onto the mock's state for scripting and inspection.
    pub fn handle(&self) -> Arc<Mutex<MockState>> {
        Arc::clone(&self.state)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A poisoned mock is still inspectable; take the data anyway.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MockState {
    /// Script one trace response in the analyzer's wire format.
    pub fn push_trace(&mut self, samples: &[f64]) {
        let rendered: Vec<String> = samples.iter().map(|v| format!("{:?}", v)).collect();
        self.responses.push_back(rendered.join(","));
    }
}

/// A synthetic zero-span trace: flat baseline with one dip, plus uniform
/// jitter. Handy for exercising the reduction pipeline against data that
/// looks like the real analyzer's.
pub fn noisy_trace(baseline: f64, dip_depth: f64, len: usize, jitter: f64) -> Vec<f64> {
    let mut rng = rand::thread_rng();
    let dip_at = len / 2;
    (0..len)
        .map(|i| {
            let base = if i == dip_at { baseline - dip_depth } else { baseline };
            base + rng.gen_range(-jitter..=jitter)
        })
        .collect()
}

#[async_trait]
impl HardwareAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.label
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        let mut state = self.state();
        if state.fail_sends > 0 {
            state.fail_sends -= 1;
            return Err(DaqError::comm(&self.label, "injected send failure"));
        }
        state.sent.push(command.to_string());
        Ok(())
    }

    async fn query(&mut self, command: &str) -> AppResult<String> {
        let mut state = self.state();
        if state.fail_queries > 0 {
            state.fail_queries -= 1;
            return Err(DaqError::comm(&self.label, "injected query failure"));
        }
        state.sent.push(command.to_string());
        state
            .responses
            .pop_front()
            .ok_or_else(|| DaqError::comm(&self.label, "no scripted response"))
    }

    async fn clear(&mut self) -> AppResult<()> {
        self.state().clears += 1;
        Ok(())
    }

    async fn reset(&mut self) -> AppResult<()> {
        self.state().resets += 1;
        Ok(())
    }
}
