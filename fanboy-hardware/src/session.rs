//! Link session with automatic resynchronization
//!
//! The session owns the transport and walks it through
//! `Disconnected → Connecting → Syncing → Ready`. Any I/O failure drops it
//! back to `Disconnected`; timeouts and header mismatches drop it to
//! `Syncing`. Every command goes through [`Session::execute`], which brings
//! the session back to `Ready` before each attempt.

use fanboy_core::{FanboyError, Result, RetryConfig};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::port_resolver::resolve_port;
use crate::protocol::{self, SyncReply, ACK_FRAME_LEN};
use crate::serial_driver::{Connector, SerialConnector, SerialTransport};

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No open transport
    Disconnected,
    /// Port resolution and open in progress
    Connecting,
    /// Transport open, waiting for the sync acknowledgement
    Syncing,
    /// Synchronized; commands may flow
    Ready,
}

impl SessionState {
    /// Get a string representation for logs and status output
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Syncing => "syncing",
            SessionState::Ready => "ready",
        }
    }
}

/// Link session owning the one transport handle
pub struct Session<C: Connector = SerialConnector> {
    connector: C,
    device_pattern: String,
    frame_timeout: Duration,
    policy: RetryConfig,
    transport: Option<Box<dyn SerialTransport>>,
    state: SessionState,
    /// Consecutive sync timeouts since the transport was last opened
    sync_failures: u32,
}

impl<C: Connector> Session<C> {
    /// Create a disconnected session
    pub fn new(
        connector: C,
        device_pattern: impl Into<String>,
        frame_timeout: Duration,
        policy: RetryConfig,
    ) -> Self {
        Self {
            connector,
            device_pattern: device_pattern.into(),
            frame_timeout,
            policy,
            transport: None,
            state: SessionState::Disconnected,
            sync_failures: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            debug!("Session {} -> {}", self.state.as_str(), next.as_str());
            self.state = next;
        }
    }

    /// Open the transport, retrying with a fixed backoff
    ///
    /// The device pattern is resolved again on every attempt.
    pub async fn connect(&mut self) -> Result<()> {
        self.close();

        let attempts = self.policy.connect_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            self.set_state(SessionState::Connecting);
            let path = resolve_port(&self.device_pattern);
            debug!("Connect attempt {}/{} on {}", attempt, attempts, path);

            match self.connector.open(&path).await {
                Ok(transport) => {
                    info!("Connected to fan controller at {}", transport.port_path());
                    self.transport = Some(transport);
                    self.set_state(SessionState::Syncing);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Connect attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = e.to_string();
                    self.set_state(SessionState::Disconnected);
                    if attempt < attempts {
                        sleep(self.policy.connect_backoff()).await;
                    }
                }
            }
        }

        error!("Giving up on {} after {} attempts", self.device_pattern, attempts);
        Err(FanboyError::Connect {
            attempts,
            reason: last_error,
        })
    }

    /// Release the transport. Safe to call when already closed.
    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            debug!("Closing transport on {}", transport.port_path());
        }
        self.set_state(SessionState::Disconnected);
        self.sync_failures = 0;
    }

    /// Bring the session to `Ready`, reconnecting as needed
    ///
    /// Sync timeouts are retried; every `sync_failure_threshold` consecutive
    /// timeouts the port is closed and reopened. A reconnect request from
    /// the controller reopens immediately. Fails once `max_sync_attempts`
    /// sync requests went unanswered, or when reconnecting fails.
    pub async fn resync(&mut self) -> Result<()> {
        let max_attempts = self.policy.max_sync_attempts.max(1);
        let threshold = self.policy.sync_failure_threshold.max(1);

        for attempt in 1..=max_attempts {
            if self.transport.is_none() {
                self.connect().await?;
            }
            self.set_state(SessionState::Syncing);

            match self.sync_once().await {
                Ok(SyncReply::Synchronized) => {
                    self.set_state(SessionState::Ready);
                    self.sync_failures = 0;
                    info!("Controller synchronized after {} attempt(s)", attempt);

                    match self.discard_stale().await {
                        Ok(0) => {}
                        Ok(stale) => debug!("Discarded {} stale byte(s)", stale),
                        Err(e) => {
                            warn!("Link failed while discarding stale input: {}", e);
                            self.close();
                            continue;
                        }
                    }
                    return Ok(());
                }
                Ok(SyncReply::Reconnect) => {
                    info!("Controller requested a reconnect");
                    self.close();
                    continue;
                }
                Ok(SyncReply::Unexpected(byte)) => {
                    warn!("Unexpected sync reply 0x{:02X}, retrying", byte);
                }
                Err(e) if e.is_link_failure() => {
                    warn!("Link failed during sync: {}", e);
                    self.close();
                }
                Err(e) => {
                    self.sync_failures += 1;
                    debug!(
                        "Sync attempt {} failed ({} consecutive): {}",
                        attempt, self.sync_failures, e
                    );
                    if self.sync_failures >= threshold {
                        warn!(
                            "{} consecutive sync timeouts, forcing reconnect",
                            self.sync_failures
                        );
                        self.close();
                    }
                }
            }

            sleep(self.policy.sync_retry_delay()).await;
        }

        error!("Controller did not synchronize after {} attempts", max_attempts);
        Err(FanboyError::Timeout(format!(
            "No sync acknowledgement after {} attempts",
            max_attempts
        )))
    }

    async fn sync_once(&mut self) -> Result<SyncReply> {
        let transport = self.transport_mut()?;
        transport.write(&protocol::sync_request()).await?;
        let deadline = Instant::now() + self.policy.sync_timeout();
        let reply = self.transport_mut()?.read_exact(ACK_FRAME_LEN, deadline).await?;
        Ok(protocol::decode_sync(reply[0]))
    }

    /// Flush the OS input buffer, then read off anything still arriving
    /// from a desynchronized exchange
    async fn discard_stale(&mut self) -> Result<usize> {
        self.transport_mut()?.clear_input_buffer()?;
        self.drain().await
    }

    async fn drain(&mut self) -> Result<usize> {
        let drain_timeout = self.policy.drain_timeout();
        let mut discarded = 0;

        for _ in 0..self.policy.drain_attempts {
            let deadline = Instant::now() + drain_timeout;
            match self.transport_mut()?.read_exact(1, deadline).await {
                Ok(bytes) => discarded += bytes.len(),
                Err(e) if e.is_link_failure() => return Err(e),
                Err(_) => break,
            }
        }

        Ok(discarded)
    }

    /// Run one command with bounded retries and resync between attempts
    ///
    /// I/O failures and timeouts consume one of `command_attempts`. Header
    /// mismatches resync and repeat the same request without consuming an
    /// attempt, up to `max_desync_retries`. Exhaustion, or a resync that
    /// cannot recover, fails with [`FanboyError::FatalCommand`].
    pub async fn execute<T, F>(
        &mut self,
        command: &str,
        request: &[u8],
        response_len: usize,
        decode: F,
    ) -> Result<T>
    where
        F: Fn(&[u8]) -> Result<T>,
    {
        let attempts = self.policy.command_attempts.max(1);
        let mut failures = 0u32;
        let mut desyncs = 0u32;

        loop {
            if !self.is_ready() {
                if let Err(e) = self.resync().await {
                    return Err(fatal(command, e));
                }
            }

            let outcome = match self.exchange(request, response_len).await {
                Ok(frame) => decode(&frame),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(FanboyError::Protocol(reason)) => {
                    desyncs += 1;
                    warn!("{}: {}, resyncing", command, reason);
                    if desyncs > self.policy.max_desync_retries {
                        return Err(fatal(command, FanboyError::Protocol(reason)));
                    }
                    self.mark_desynced();
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        command, failures, attempts, e
                    );
                    if e.is_link_failure() {
                        self.close();
                    } else {
                        self.mark_desynced();
                    }
                    if failures >= attempts {
                        return Err(fatal(command, e));
                    }
                    sleep(self.policy.command_retry_delay()).await;
                }
            }
        }
    }

    async fn exchange(&mut self, request: &[u8], response_len: usize) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.frame_timeout;
        let transport = self.transport_mut()?;
        transport.write(request).await?;
        transport.read_exact(response_len, deadline).await
    }

    fn mark_desynced(&mut self) {
        if self.transport.is_some() {
            self.set_state(SessionState::Syncing);
        }
    }

    fn transport_mut(&mut self) -> Result<&mut Box<dyn SerialTransport>> {
        self.transport
            .as_mut()
            .ok_or_else(|| FanboyError::Io("Transport not connected".to_string()))
    }
}

fn fatal(command: &str, cause: FanboyError) -> FanboyError {
    error!("Command '{}' failed permanently: {}", command, cause);
    FanboyError::FatalCommand {
        command: command.to_string(),
        reason: cause.to_string(),
    }
}
