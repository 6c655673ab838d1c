//! Fanboy Core Library
//!
//! Shared types, errors, and configuration for the fanboy fan controller
//! driver. This crate is used by both the hardware driver and the daemon.

pub mod api;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    default_config_path, DriverConfig, Parity, RetryConfig, SerialConfig, ServerConfig,
    StaticConfig, WatchdogConfig,
};
pub use error::*;
pub use types::*;
