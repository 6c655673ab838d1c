//! Scripted fake controller for tests
//!
//! [`MockDevice`] behaves like a healthy controller by default: it
//! acknowledges sync and speed-set requests and answers telemetry reads
//! from a per-channel table. Tests steer it with a queue of one-shot
//! [`Reply`] overrides or a persistent responder closure, and inspect what
//! was written, how often the link was opened, and how often it was closed.
//!
//! Reads wait only for the configured read delay (none by default); when
//! not enough bytes are pending they then fail with a timeout.

use async_trait::async_trait;
use fanboy_core::{FanboyError, Result, RetryConfig, StaticConfig};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::protocol::{Opcode, Telemetry, SET_VOLTAGE_ACK, SYNC_ACK, TELEMETRY_HEADER};
use crate::serial_driver::{Connector, SerialTransport};

/// How the fake controller answers one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Queue these bytes for reading
    Bytes(Vec<u8>),
    /// Answer nothing; the next read times out
    Silent,
    /// Fail the next read with an I/O error
    IoError,
}

type Responder = Box<dyn FnMut(&[u8]) -> Reply + Send>;

struct DeviceState {
    script: VecDeque<Reply>,
    responder: Option<Responder>,
    telemetry: HashMap<(u8, u8), [u8; 2]>,
    speed_ack: u8,
    read_delay: Duration,
    writes: Vec<Vec<u8>>,
    inbound: VecDeque<u8>,
    read_error: bool,
    opens: u32,
    failed_opens: u32,
    failing_opens: u32,
    closes: u32,
    input_clears: u32,
    opened_paths: Vec<String>,
    open_log: Vec<usize>,
}

impl DeviceState {
    fn count_requests(&self, opcode: u8) -> usize {
        self.writes
            .iter()
            .filter(|w| w.first() == Some(&opcode))
            .count()
    }

    fn model_reply(&self, request: &[u8]) -> Reply {
        let opcode = request.first().copied().unwrap_or_default();
        let channel = request.get(1).copied().unwrap_or_default();

        if opcode == Opcode::Sync as u8 {
            Reply::Bytes(vec![SYNC_ACK])
        } else if opcode == Opcode::SetVoltage as u8 {
            Reply::Bytes(vec![self.speed_ack])
        } else if [Opcode::ReadVolts, Opcode::ReadAmps, Opcode::ReadRpm]
            .iter()
            .any(|op| *op as u8 == opcode)
        {
            let [hi, lo] = self
                .telemetry
                .get(&(opcode, channel))
                .copied()
                .unwrap_or_else(|| default_telemetry(opcode));
            let mut frame = TELEMETRY_HEADER.to_vec();
            frame.extend_from_slice(&[hi, lo]);
            Reply::Bytes(frame)
        } else {
            Reply::Silent
        }
    }
}

/// 12.0V, 0.5A, 1200rpm
fn default_telemetry(opcode: u8) -> [u8; 2] {
    if opcode == Opcode::ReadVolts as u8 {
        [12, 0]
    } else if opcode == Opcode::ReadAmps as u8 {
        [0, 5]
    } else {
        [0x04, 0xB0]
    }
}

/// Shared handle to one fake controller
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                script: VecDeque::new(),
                responder: None,
                telemetry: HashMap::new(),
                speed_ack: SET_VOLTAGE_ACK,
                read_delay: Duration::ZERO,
                writes: Vec::new(),
                inbound: VecDeque::new(),
                read_error: false,
                opens: 0,
                failed_opens: 0,
                failing_opens: 0,
                closes: 0,
                input_clears: 0,
                opened_paths: Vec::new(),
                open_log: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Connector whose transports all talk to this device
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            device: self.clone(),
        }
    }

    /// Override the answer to the next unscripted request
    pub fn script(&self, reply: Reply) {
        self.lock().script.push_back(reply);
    }

    /// Answer every unscripted request with `responder`
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Reply + Send + 'static,
    {
        self.lock().responder = Some(Box::new(responder));
    }

    /// Return to the built-in healthy controller behaviour
    pub fn clear_responder(&self) {
        self.lock().responder = None;
    }

    /// Set the value bytes returned for one channel's telemetry reads
    pub fn set_telemetry(&self, kind: Telemetry, channel: u8, hi: u8, lo: u8) {
        self.lock()
            .telemetry
            .insert((kind.opcode() as u8, channel), [hi, lo]);
    }

    /// Byte returned for speed-set requests
    pub fn set_speed_ack(&self, ack: u8) {
        self.lock().speed_ack = ack;
    }

    /// Latency added to every read, like a slow controller
    pub fn set_read_delay(&self, delay: Duration) {
        self.lock().read_delay = delay;
    }

    /// Make the next `count` opens fail
    pub fn fail_next_opens(&self, count: u32) {
        self.lock().failing_opens = count;
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    pub fn count_requests(&self, opcode: Opcode) -> usize {
        self.lock().count_requests(opcode as u8)
    }

    /// Speed-set requests as (channel, whole volts, tenths)
    pub fn speed_requests(&self) -> Vec<(u8, u8, u8)> {
        self.lock()
            .writes
            .iter()
            .filter(|w| w.first() == Some(&(Opcode::SetVoltage as u8)) && w.len() == 7)
            .map(|w| (w[1], w[5], w[6]))
            .collect()
    }

    pub fn opens(&self) -> u32 {
        self.lock().opens
    }

    pub fn failed_opens(&self) -> u32 {
        self.lock().failed_opens
    }

    pub fn closes(&self) -> u32 {
        self.lock().closes
    }

    /// Number of OS input buffer flushes
    pub fn input_clears(&self) -> u32 {
        self.lock().input_clears
    }

    pub fn opened_paths(&self) -> Vec<String> {
        self.lock().opened_paths.clone()
    }

    /// Number of sync requests seen before each successful open
    pub fn open_log(&self) -> Vec<usize> {
        self.lock().open_log.clone()
    }

    /// Bytes queued but not yet read
    pub fn pending_inbound(&self) -> usize {
        self.lock().inbound.len()
    }
}

/// Opens [`MockLink`]s onto a [`MockDevice`]
pub struct MockConnector {
    device: MockDevice,
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&mut self, path: &str) -> Result<Box<dyn SerialTransport>> {
        let mut state = self.device.lock();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            state.failed_opens += 1;
            return Err(FanboyError::Io(format!(
                "Failed to open serial port {}: No such file or directory",
                path
            )));
        }

        state.opens += 1;
        let syncs = state.count_requests(Opcode::Sync as u8);
        state.open_log.push(syncs);
        state.opened_paths.push(path.to_string());
        state.inbound.clear();
        state.read_error = false;

        Ok(Box::new(MockLink {
            device: self.device.clone(),
            path: path.to_string(),
        }))
    }
}

/// One open connection to a [`MockDevice`]; dropping it counts as a close
pub struct MockLink {
    device: MockDevice,
    path: String,
}

#[async_trait]
impl SerialTransport for MockLink {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.device.lock();
        let state = &mut *guard;
        state.writes.push(bytes.to_vec());

        let reply = if let Some(reply) = state.script.pop_front() {
            reply
        } else if let Some(responder) = state.responder.as_mut() {
            responder(bytes)
        } else {
            state.model_reply(bytes)
        };

        match reply {
            Reply::Bytes(data) => state.inbound.extend(data),
            Reply::Silent => {}
            Reply::IoError => state.read_error = true,
        }
        Ok(())
    }

    async fn read_exact(&mut self, len: usize, _deadline: Instant) -> Result<Vec<u8>> {
        let delay = self.device.lock().read_delay;
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let mut state = self.device.lock();
        if state.read_error {
            state.read_error = false;
            return Err(FanboyError::Io("Read error: Input/output error".to_string()));
        }
        if state.inbound.len() < len {
            let got = state.inbound.len();
            state.inbound.clear();
            return Err(FanboyError::Timeout(format!(
                "Read timed out with {}/{} bytes",
                got, len
            )));
        }
        Ok(state.inbound.drain(..len).collect())
    }

    fn clear_input_buffer(&mut self) -> Result<()> {
        let mut state = self.device.lock();
        state.inbound.clear();
        state.input_clears += 1;
        Ok(())
    }

    fn port_path(&self) -> &str {
        &self.path
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.device.lock().closes += 1;
    }
}

/// Retry policy with near-zero delays
pub fn fast_retry_config() -> RetryConfig {
    RetryConfig {
        connect_attempts: 3,
        connect_backoff_secs: 0,
        sync_timeout_ms: 5,
        sync_retry_delay_ms: 0,
        sync_failure_threshold: 10,
        max_sync_attempts: 30,
        drain_attempts: 8,
        drain_timeout_ms: 1,
        command_attempts: 3,
        command_retry_delay_ms: 0,
        max_desync_retries: 3,
    }
}

/// Driver configuration for tests: fast retries, no automatic polling
pub fn test_config(channel_count: u8) -> StaticConfig {
    let mut config = StaticConfig::default();
    config.serial.device = "/dev/mock0".to_string();
    config.serial.timeout_ms = 10;
    config.driver.channel_count = channel_count;
    config.driver.poll_interval_ms = 3_600_000;
    config.retry = fast_retry_config();
    config
}
