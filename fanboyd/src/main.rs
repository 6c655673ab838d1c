//! Fanboy daemon
//!
//! Drives a serial multi-channel fan controller and exposes it over REST and
//! WebSocket.
//!
//! Startup order: configuration, hardware watchdog, fan driver (connect,
//! sync, initial speed), HTTP server. Shutdown runs in reverse once Ctrl+C,
//! SIGTERM, or `GET /stop` arrives.

mod api;
mod config;
mod shutdown;
mod watchdog;

use anyhow::{Context, Result};
use api::AppState;
use clap::Parser;
use config::CliOverrides;
use fanboy_hardware::FanDriver;
use shutdown::ShutdownTrigger;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use watchdog::Watchdog;

/// Fanboy fan controller daemon
#[derive(Parser, Debug)]
#[command(name = "fanboyd")]
#[command(version, about = "Fanboy fan controller daemon", long_about = None)]
struct Args {
    /// Path to configuration file (also read from FANBOY_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial device path or pattern (e.g., /dev/ttyACM0, /dev/ttyACM*)
    #[arg(long)]
    tty_file: Option<String>,

    /// Server bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Do not arm the hardware watchdog
    #[arg(long)]
    disable_watchdog: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            tty_file: self.tty_file.clone(),
            bind: self.bind.clone(),
            port: self.port,
            disable_watchdog: self.disable_watchdog,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(args.verbose);

    info!("Fanboy starting...");

    let config_path = config::resolve_config_path(args.config.clone());
    info!("Configuration file: {}", config_path.display());

    let mut static_config = config::load(&config_path).await?;
    args.overrides().apply(&mut static_config);
    static_config.validate()?;

    // Step 1: Hardware watchdog
    let watchdog = if static_config.watchdog.enabled {
        Some(Watchdog::start(&static_config.watchdog).await?)
    } else {
        info!("Hardware watchdog disabled");
        None
    };

    // Step 2: Fan driver
    info!(
        "Connecting to fan controller at {} ({} baud)",
        static_config.serial.device, static_config.serial.baud_rate
    );
    let driver = match FanDriver::start(&static_config).await {
        Ok(driver) => Arc::new(driver),
        Err(e) => {
            error!("Fan controller unavailable: {}", e);
            stop_watchdog(watchdog).await;
            return Err(e).context("Failed to start fan driver");
        }
    };

    // Step 3: HTTP server
    let shutdown = ShutdownTrigger::new();
    let app = api::create_router(AppState::new(driver.clone(), shutdown.clone()));

    let bind_addr = format!(
        "{}:{}",
        static_config.server.bind, static_config.server.port
    );
    info!("Starting server on {}", bind_addr);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_addr, e);
            shutdown_hardware(&driver, watchdog).await;
            return Err(e).with_context(|| format!("Failed to bind {}", bind_addr));
        }
    };

    info!("Fanboy listening on {}", bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal(shutdown))
        .await;
    if let Err(e) = &served {
        error!("Server error: {}", e);
    }

    shutdown_hardware(&driver, watchdog).await;
    info!("Shutdown complete");
    served.context("HTTP server failed")
}

/// Release the serial link, then disarm the watchdog
async fn shutdown_hardware(driver: &FanDriver, watchdog: Option<Watchdog>) {
    if let Err(e) = driver.stop().await {
        warn!("Fan driver did not stop cleanly: {}", e);
    }
    stop_watchdog(watchdog).await;
}

async fn stop_watchdog(watchdog: Option<Watchdog>) {
    if let Some(watchdog) = watchdog {
        if let Err(e) = watchdog.stop().await {
            warn!("{}", e);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["fanboyd"]).unwrap();
        assert!(args.config.is_none());
        assert!(args.tty_file.is_none());
        assert!(!args.disable_watchdog);
        assert!(!args.verbose);
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::try_parse_from([
            "fanboyd",
            "--tty-file",
            "/dev/ttyUSB1",
            "--port",
            "8080",
            "--bind",
            "127.0.0.1",
            "--disable-watchdog",
        ])
        .unwrap();

        let overrides = args.overrides();
        assert_eq!(overrides.tty_file.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(overrides.port, Some(8080));
        assert_eq!(overrides.bind.as_deref(), Some("127.0.0.1"));
        assert!(overrides.disable_watchdog);
    }

    #[test]
    fn test_args_reject_bad_port() {
        assert!(Args::try_parse_from(["fanboyd", "--port", "http"]).is_err());
    }
}
