//! Configuration types for fanboy
//!
//! [`StaticConfig`] is read once at startup and split into one section per
//! concern:
//! - [`SerialConfig`] - device path pattern and line framing
//! - [`DriverConfig`] - channel count and polling cadence
//! - [`RetryConfig`] - connect, resync, and per-command retry policy
//! - [`ServerConfig`] - HTTP bind address
//! - [`WatchdogConfig`] - hardware watchdog keep-alive

mod paths;
mod static_config;

pub use paths::default_config_path;
pub use static_config::{
    DriverConfig, Parity, RetryConfig, SerialConfig, ServerConfig, StaticConfig, WatchdogConfig,
};
