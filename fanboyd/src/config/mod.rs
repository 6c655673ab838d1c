//! Configuration loading for the daemon
//!
//! Reads the TOML file once at startup and layers command-line overrides on
//! top of it.

use fanboy_core::{default_config_path, FanboyError, Result, StaticConfig};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Environment variable naming an alternative config file
pub(crate) const CONFIG_ENV: &str = "FANBOY_CONFIG";

/// Settings given on the command line, which win over the file
#[derive(Debug, Clone, Default)]
pub(crate) struct CliOverrides {
    pub tty_file: Option<String>,
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub disable_watchdog: bool,
}

impl CliOverrides {
    pub fn apply(&self, config: &mut StaticConfig) {
        if let Some(tty_file) = &self.tty_file {
            debug!("Serial device overridden: {}", tty_file);
            config.serial.device = tty_file.clone();
        }
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.disable_watchdog {
            config.watchdog.enabled = false;
        }
    }
}

/// Pick the config file: explicit flag, then environment, then default path
pub(crate) fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

/// Load the static configuration
///
/// A missing file yields the defaults. A file that cannot be read or parsed
/// is a configuration error.
pub(crate) async fn load(path: &Path) -> Result<StaticConfig> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(StaticConfig::default());
    }

    let content = fs::read_to_string(path).await.map_err(|e| {
        FanboyError::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let config = StaticConfig::from_toml(&content)?;
    info!("Configuration loaded from {}", path.display());
    Ok(config)
}
