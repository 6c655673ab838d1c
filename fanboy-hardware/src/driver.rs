//! Driver handle
//!
//! [`FanDriver`] is what the daemon holds. It spawns the command actor and
//! the poller, and turns caller calls into queued requests. Snapshot reads
//! never touch the actor; they copy the table the actor last published.

use fanboy_core::{
    channel_table, clamp_percentage, Channel, ChannelSelector, FanboyError, Result, StaticConfig,
};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::fan_controller::{FanController, Request};
use crate::notifier::{ListenerId, Notifier};
use crate::poller::Poller;
use crate::serial_driver::{Connector, SerialConnector};

struct DriverTasks {
    actor: JoinHandle<()>,
    poller: JoinHandle<()>,
}

/// Handle to a running fan driver
pub struct FanDriver {
    requests: mpsc::UnboundedSender<Request>,
    snapshots: watch::Receiver<Vec<Channel>>,
    notifier: Arc<Notifier>,
    channel_count: u8,
    tasks: Mutex<Option<DriverTasks>>,
}

impl FanDriver {
    /// Start the driver on the configured serial device
    ///
    /// Resolves once the controller is synchronized and the initial speed
    /// has been applied. A device that cannot be opened within the retry
    /// budget fails with [`FanboyError::Connect`].
    pub async fn start(config: &StaticConfig) -> Result<Self> {
        let connector = SerialConnector::new(config.serial.clone());
        Self::start_with_connector(connector, config).await
    }

    /// Start the driver with a custom [`Connector`]
    pub async fn start_with_connector<C>(connector: C, config: &StaticConfig) -> Result<Self>
    where
        C: Connector + 'static,
    {
        config.validate()?;

        let channel_count = config.driver.channel_count;
        let notifier = Arc::new(Notifier::new());
        let (snapshot_tx, snapshot_rx) = watch::channel(channel_table(channel_count));
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let controller = FanController::new(connector, config, notifier.clone(), snapshot_tx);
        let actor = tokio::spawn(controller.run(request_rx, ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = actor.await;
                return Err(e);
            }
            Err(_) => return Err(FanboyError::DriverStopped),
        }

        let poller = Poller::new(request_tx.clone(), config.driver.poll_interval()).spawn();
        info!(
            "Fan driver started: {} channels, polling every {:?}",
            channel_count,
            config.driver.poll_interval()
        );

        Ok(Self {
            requests: request_tx,
            snapshots: snapshot_rx,
            notifier,
            channel_count,
            tasks: Mutex::new(Some(DriverTasks { actor, poller })),
        })
    }

    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    /// Last published channel table, ids 1..=N
    pub fn snapshot(&self) -> Vec<Channel> {
        self.snapshots.borrow().clone()
    }

    /// Receiver that observes every published channel table
    pub fn updates(&self) -> watch::Receiver<Vec<Channel>> {
        self.snapshots.clone()
    }

    /// Check a caller-supplied channel id against the configured range
    pub fn validate_channel(&self, id: u8) -> Result<()> {
        if id == 0 || id > self.channel_count {
            return Err(FanboyError::InvalidChannel {
                channel: id,
                count: self.channel_count,
            });
        }
        Ok(())
    }

    /// Queue a speed change. Returns as soon as the request is queued.
    pub fn set_speed(&self, selector: ChannelSelector, percent: i64) -> Result<()> {
        let percent = clamp_percentage(percent);
        debug!("Queueing speed {}% for {}", percent, selector);
        self.submit(Request::SetSpeed { selector, percent })
    }

    /// Queue an immediate poll, subject to the minimum poll interval
    pub fn poll_now(&self) -> Result<()> {
        self.submit(Request::PollAll)
    }

    fn submit(&self, request: Request) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| FanboyError::DriverStopped)
    }

    /// Register a listener called with the channel table after every poll
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&[Channel]) + Send + Sync + 'static,
    {
        self.notifier.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.notifier.unsubscribe(id)
    }

    /// Shared listener registry, for callers that must unsubscribe from
    /// inside their own callback
    pub fn notifier(&self) -> Arc<Notifier> {
        Arc::clone(&self.notifier)
    }

    /// Stop polling, shut the actor down, and wait until the link is released
    ///
    /// Calling it again is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(tasks) = tasks else {
            return Ok(());
        };

        tasks.poller.abort();
        if self.requests.send(Request::Shutdown).is_err() {
            debug!("Actor already gone");
        }

        tasks.actor.await.map_err(|e| {
            warn!("Fan controller task ended abnormally: {}", e);
            FanboyError::DriverStopped
        })?;

        info!("Fan driver stopped");
        Ok(())
    }
}

impl Drop for FanDriver {
    fn drop(&mut self) {
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(tasks) = tasks {
            tasks.poller.abort();
            let _ = self.requests.send(Request::Shutdown);
        }
    }
}
