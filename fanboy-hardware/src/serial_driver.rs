//! Serial driver for low-level hardware communication
//!
//! Provides timed async byte I/O with the fan controller. Nothing in this
//! module knows about frame semantics.

use async_trait::async_trait;
use fanboy_core::{FanboyError, Parity, Result, SerialConfig};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, warn};

use crate::protocol::format_frame;

/// Pause before polling again after a zero-byte read
const EOF_RETRY_DELAY: Duration = Duration::from_millis(5);

/// Trait for serial transport abstraction
///
/// This trait enables testing of the session and actor without real
/// hardware by allowing mock implementations. Closing a transport is
/// dropping it.
#[async_trait]
pub trait SerialTransport: Send {
    /// Send exactly `bytes`
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Collect exactly `len` bytes, failing with `Timeout` once `deadline` passes
    async fn read_exact(&mut self, len: usize, deadline: Instant) -> Result<Vec<u8>>;

    /// Discard anything the OS has already buffered
    fn clear_input_buffer(&mut self) -> Result<()>;

    /// Path the transport was opened on
    fn port_path(&self) -> &str;
}

/// Opens transports on a concrete device path
///
/// The session calls this on every (re)connect attempt after resolving the
/// configured pattern.
#[async_trait]
pub trait Connector: Send {
    async fn open(&mut self, path: &str) -> Result<Box<dyn SerialTransport>>;
}

/// Serial driver for hardware communication
pub struct SerialDriver {
    port: SerialStream,
    port_path: String,
    debug_uart: bool,
}

impl SerialDriver {
    /// Open a serial device with the configured line framing
    ///
    /// # Arguments
    /// * `port_path` - Concrete path to the serial device (e.g., "/dev/ttyACM0")
    /// * `config` - Baud rate, data bits, stop bits, parity, and debug logging
    pub fn open(port_path: &str, config: &SerialConfig) -> Result<Self> {
        debug!("Opening serial port: {}", port_path);

        let port = tokio_serial::new(port_path, config.baud_rate)
            .timeout(config.frame_timeout())
            .data_bits(data_bits(config.data_bits)?)
            .parity(parity(config.parity))
            .stop_bits(stop_bits(config.stop_bits)?)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                error!("Failed to open serial port {}: {}", port_path, e);
                FanboyError::Io(format!("Failed to open serial port {}: {}", port_path, e))
            })?;

        debug!("Serial port opened successfully");

        if config.debug_uart {
            debug!("UART debug logging enabled");
        }

        Ok(Self {
            port,
            port_path: port_path.to_string(),
            debug_uart: config.debug_uart,
        })
    }
}

#[async_trait]
impl SerialTransport for SerialDriver {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.debug_uart {
            debug!("TX: {}", format_frame(bytes));
        }

        self.port.write_all(bytes).await.map_err(|e| {
            error!("Write failed: {}", e);
            FanboyError::Io(format!("Write failed: {}", e))
        })?;

        // Flush to ensure data is sent
        self.port
            .flush()
            .await
            .map_err(|e| FanboyError::Io(format!("Flush failed: {}", e)))
    }

    async fn read_exact(&mut self, len: usize, deadline: Instant) -> Result<Vec<u8>> {
        let frame = read_frame(&mut self.port, len, deadline).await?;

        if self.debug_uart {
            debug!("RX: {}", format_frame(&frame));
        }

        Ok(frame)
    }

    fn clear_input_buffer(&mut self) -> Result<()> {
        self.port
            .clear(tokio_serial::ClearBuffer::Input)
            .map_err(|e| {
                warn!("Failed to clear input buffer: {}", e);
                FanboyError::Io(format!("Failed to clear buffer: {}", e))
            })
    }

    fn port_path(&self) -> &str {
        &self.port_path
    }
}

/// Opens [`SerialDriver`] transports with a fixed line configuration
pub struct SerialConnector {
    config: SerialConfig,
}

impl SerialConnector {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn open(&mut self, path: &str) -> Result<Box<dyn SerialTransport>> {
        let driver = SerialDriver::open(path, &self.config)?;
        Ok(Box::new(driver))
    }
}

/// Collect exactly `len` bytes from `reader` before `deadline`
///
/// Zero-byte reads and OS read timeouts are retried until the deadline.
/// Never reads past `len`, so a following response stays queued.
pub(crate) async fn read_frame<R>(
    reader: &mut R,
    len: usize,
    deadline: Instant,
) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut frame = Vec::with_capacity(len);
    let mut chunk = [0u8; 128];

    while frame.len() < len {
        let want = (len - frame.len()).min(chunk.len());

        match timeout_at(deadline, reader.read(&mut chunk[..want])).await {
            Err(_) => return Err(read_timeout(frame.len(), len)),
            Ok(Ok(0)) => {
                // The controller may pause mid-frame
                if Instant::now() >= deadline {
                    return Err(read_timeout(frame.len(), len));
                }
                sleep_until((Instant::now() + EOF_RETRY_DELAY).min(deadline)).await;
            }
            Ok(Ok(n)) => frame.extend_from_slice(&chunk[..n]),
            Ok(Err(e)) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                continue;
            }
            Ok(Err(e)) => {
                error!("Read error: {}", e);
                return Err(FanboyError::Io(format!("Read error: {}", e)));
            }
        }
    }

    Ok(frame)
}

fn read_timeout(got: usize, len: usize) -> FanboyError {
    FanboyError::Timeout(format!("Read timed out with {}/{} bytes", got, len))
}

fn data_bits(bits: u8) -> Result<tokio_serial::DataBits> {
    match bits {
        5 => Ok(tokio_serial::DataBits::Five),
        6 => Ok(tokio_serial::DataBits::Six),
        7 => Ok(tokio_serial::DataBits::Seven),
        8 => Ok(tokio_serial::DataBits::Eight),
        other => Err(FanboyError::Config(format!(
            "Unsupported data bits: {}",
            other
        ))),
    }
}

fn stop_bits(bits: u8) -> Result<tokio_serial::StopBits> {
    match bits {
        1 => Ok(tokio_serial::StopBits::One),
        2 => Ok(tokio_serial::StopBits::Two),
        other => Err(FanboyError::Config(format!(
            "Unsupported stop bits: {}",
            other
        ))),
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    }
}
