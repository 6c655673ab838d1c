//! Error types for the fanboy system

use thiserror::Error;

/// Core error type for fanboy operations
#[derive(Error, Debug)]
pub enum FanboyError {
    /// Transport-level failure while reading from or writing to the link
    #[error("I/O error: {0}")]
    Io(String),

    /// Deadline elapsed before the expected number of bytes arrived
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A response arrived but its header or ack byte was not the expected one
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The serial port could not be opened after bounded retries
    #[error("Connect failed after {attempts} attempts: {reason}")]
    Connect { attempts: u32, reason: String },

    /// A command exhausted its retries, resync attempts included
    #[error("Command '{command}' failed: {reason}")]
    FatalCommand { command: String, reason: String },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Channel id outside 1..=count
    #[error("Channel out of range: {channel} (must be 1-{count})")]
    InvalidChannel { channel: u8, count: u8 },

    /// The driver actor is no longer accepting requests
    #[error("Driver stopped")]
    DriverStopped,

    /// Hardware watchdog errors
    #[error("Watchdog error: {0}")]
    Watchdog(String),

    /// Filesystem I/O errors (config files, device nodes)
    #[error("File I/O error: {0}")]
    FileIo(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl FanboyError {
    /// Returns `true` if the error means the physical link is gone and the
    /// transport must be reopened, rather than merely resynchronized.
    pub fn is_link_failure(&self) -> bool {
        match self {
            FanboyError::Io(_) | FanboyError::FileIo(_) => true,
            FanboyError::Timeout(_) | FanboyError::Protocol(_) => false,
            _ => false,
        }
    }
}

/// Result type alias for fanboy operations
pub type Result<T> = std::result::Result<T, FanboyError>;

impl From<serde_json::Error> for FanboyError {
    fn from(err: serde_json::Error) -> Self {
        FanboyError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for FanboyError {
    fn from(err: toml::de::Error) -> Self {
        FanboyError::Config(err.to_string())
    }
}
