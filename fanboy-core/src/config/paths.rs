//! Default path resolution for configuration files
//!
//! Follows the XDG Base Directory layout when available, with sensible fallbacks.

use std::path::PathBuf;

/// Returns the default path for the static configuration file.
///
/// Uses XDG config directory if available:
/// - Linux/macOS: `~/.config/fanboy/config.toml`
/// - Fallback: `/etc/fanboy/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc"))
        .join("fanboy")
        .join("config.toml")
}
