//! Hardware watchdog keep-alive
//!
//! Opens the watchdog device and writes to it on a fixed period so the
//! board resets if the daemon hangs. Stopping writes the magic close
//! character, which disarms the watchdog on drivers that support it.

use fanboy_core::{FanboyError, Result, WatchdogConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const KEEPALIVE: &[u8] = b"\0";
const MAGIC_CLOSE: &[u8] = b"V";

/// Running keep-alive task
pub(crate) struct Watchdog {
    device: PathBuf,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl Watchdog {
    /// Open the configured device and start pinging it
    pub async fn start(config: &WatchdogConfig) -> Result<Self> {
        Self::spawn(Path::new(&config.device), config.interval()).await
    }

    pub async fn spawn(device: &Path, interval: Duration) -> Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(device)
            .await
            .map_err(|e| {
                FanboyError::Watchdog(format!("Failed to open {}: {}", device.display(), e))
            })?;

        ping(&mut file).await?;
        info!(
            "Hardware watchdog armed on {} (every {:?})",
            device.display(),
            interval
        );

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(keep_alive(file, interval, stop_rx));

        Ok(Self {
            device: device.to_path_buf(),
            stop_tx,
            task,
        })
    }

    /// Stop pinging and disarm the watchdog
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(());
        let result = self
            .task
            .await
            .map_err(|e| FanboyError::Watchdog(format!("Keep-alive task failed: {}", e)))?;
        info!("Hardware watchdog on {} closed", self.device.display());
        result
    }
}

async fn keep_alive(
    mut file: File,
    interval: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) -> Result<()> {
    let period = interval.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = ping(&mut file).await {
                    warn!("{}", e);
                } else {
                    debug!("Hardware watchdog pinged");
                }
            }
            _ = &mut stop_rx => break,
        }
    }

    file.write_all(MAGIC_CLOSE)
        .await
        .map_err(|e| FanboyError::Watchdog(format!("Failed to disarm: {}", e)))?;
    file.flush()
        .await
        .map_err(|e| FanboyError::Watchdog(format!("Failed to disarm: {}", e)))
}

async fn ping(file: &mut File) -> Result<()> {
    file.write_all(KEEPALIVE)
        .await
        .map_err(|e| FanboyError::Watchdog(format!("Keep-alive failed: {}", e)))?;
    file.flush()
        .await
        .map_err(|e| FanboyError::Watchdog(format!("Keep-alive failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_watchdog_pings_then_disarms() {
        let device = NamedTempFile::new().unwrap();

        let watchdog = Watchdog::spawn(device.path(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        watchdog.stop().await.unwrap();

        let written = std::fs::read(device.path()).unwrap();
        assert!(written.len() >= 3, "expected pings, got {:?}", written);
        assert_eq!(written.last(), Some(&b'V'));
        assert!(written[..written.len() - 1].iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_watchdog_stop_right_away_still_disarms() {
        let device = NamedTempFile::new().unwrap();

        let watchdog = Watchdog::spawn(device.path(), Duration::from_secs(60))
            .await
            .unwrap();
        watchdog.stop().await.unwrap();

        assert_eq!(std::fs::read(device.path()).unwrap(), b"\0V".to_vec());
    }

    #[tokio::test]
    async fn test_watchdog_missing_device() {
        let result = Watchdog::spawn(
            Path::new("/nonexistent-fanboy-dir/watchdog0"),
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(FanboyError::Watchdog(_))));
    }

    #[tokio::test]
    async fn test_watchdog_start_from_config() {
        let device = NamedTempFile::new().unwrap();
        let config = WatchdogConfig {
            enabled: true,
            device: device.path().display().to_string(),
            interval_secs: 5,
        };

        let watchdog = Watchdog::start(&config).await.unwrap();
        watchdog.stop().await.unwrap();
        assert_eq!(std::fs::read(device.path()).unwrap(), b"\0V".to_vec());
    }
}
