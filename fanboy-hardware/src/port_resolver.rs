//! Device path resolution
//!
//! The configured device may end in a wildcard segment such as
//! `/dev/ttyACM*`. It is resolved against the parent directory on every
//! connect attempt, so a controller that re-enumerates under a new node
//! name after a replug is still found.

use std::path::Path;
use tracing::{debug, warn};

/// Resolve a possibly-wildcarded device path to a concrete one.
///
/// Without a `*` in the final segment the pattern is returned unchanged.
/// Otherwise the parent directory is listed and the first entry (by name)
/// starting with the text before the `*` wins. When nothing matches the
/// literal pattern is returned, so the subsequent open fails and surfaces
/// as a connect error.
pub fn resolve_port(pattern: &str) -> String {
    let path = Path::new(pattern);

    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        return pattern.to_string();
    };

    let Some((prefix, _)) = file_name.split_once('*') else {
        return pattern.to_string();
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let entries = match std::fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to list {}: {}", parent.display(), e);
            return pattern.to_string();
        }
    };

    let mut candidates: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(prefix))
        .collect();
    candidates.sort();

    match candidates.first() {
        Some(name) => {
            let resolved = parent.join(name).to_string_lossy().into_owned();
            debug!("Resolved {} to {}", pattern, resolved);
            resolved
        }
        None => {
            debug!("No device matches {}", pattern);
            pattern.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) {
        File::create(dir.path().join(name)).unwrap();
    }

    #[test]
    fn test_literal_path_is_identity() {
        assert_eq!(resolve_port("/dev/ttyUSB0"), "/dev/ttyUSB0");
        assert_eq!(resolve_port("COM3"), "COM3");
    }

    #[test]
    fn test_wildcard_picks_matching_entry() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "ttyS0");
        touch(&dir, "ttyACM1");

        let pattern = format!("{}/ttyACM*", dir.path().display());
        let resolved = resolve_port(&pattern);
        assert_eq!(resolved, dir.path().join("ttyACM1").to_string_lossy());
    }

    #[test]
    fn test_wildcard_first_match_by_name() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "ttyACM3");
        touch(&dir, "ttyACM0");
        touch(&dir, "ttyACM2");

        let pattern = format!("{}/ttyACM*", dir.path().display());
        assert_eq!(
            resolve_port(&pattern),
            dir.path().join("ttyACM0").to_string_lossy()
        );
    }

    #[test]
    fn test_wildcard_follows_reenumeration() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "ttyACM0");
        let pattern = format!("{}/ttyACM*", dir.path().display());
        assert!(resolve_port(&pattern).ends_with("ttyACM0"));

        std::fs::remove_file(dir.path().join("ttyACM0")).unwrap();
        touch(&dir, "ttyACM1");
        assert!(resolve_port(&pattern).ends_with("ttyACM1"));
    }

    #[test]
    fn test_wildcard_without_match_returns_pattern() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "ttyS0");

        let pattern = format!("{}/ttyACM*", dir.path().display());
        assert_eq!(resolve_port(&pattern), pattern);
    }

    #[test]
    fn test_missing_directory_returns_pattern() {
        let pattern = "/nonexistent-fanboy-dir/ttyACM*";
        assert_eq!(resolve_port(pattern), pattern);
    }
}
