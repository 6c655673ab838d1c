//! Fan Controller - the command actor
//!
//! Owns the [`Session`] and the channel table. Requests arrive on one
//! unbounded queue and run to completion in arrival order, so at most one
//! exchange is ever in flight on the link.

use fanboy_core::{channel_table, Channel, ChannelSelector, Result, StaticConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::notifier::Notifier;
use crate::protocol::{self, Telemetry, ACK_FRAME_LEN, TELEMETRY_FRAME_LEN};
use crate::serial_driver::{Connector, SerialConnector};
use crate::session::Session;

/// Work accepted by the actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Read volts, amps and rpm of every channel
    PollAll,
    /// Apply a speed percentage to one or all channels
    SetSpeed {
        selector: ChannelSelector,
        percent: u8,
    },
    /// Release the link and exit
    Shutdown,
}

/// Single owner of the link and the channel table
pub struct FanController<C: Connector = SerialConnector> {
    session: Session<C>,
    channels: Vec<Channel>,
    notifier: Arc<Notifier>,
    snapshots: watch::Sender<Vec<Channel>>,
    min_poll_interval: Duration,
    initial_speed: u8,
    /// Start time of the last fully successful poll
    last_poll: Option<Instant>,
}

impl<C: Connector> FanController<C> {
    pub fn new(
        connector: C,
        config: &StaticConfig,
        notifier: Arc<Notifier>,
        snapshots: watch::Sender<Vec<Channel>>,
    ) -> Self {
        let session = Session::new(
            connector,
            config.serial.device.clone(),
            config.serial.frame_timeout(),
            config.retry.clone(),
        );

        Self {
            session,
            channels: channel_table(config.driver.channel_count),
            notifier,
            snapshots,
            min_poll_interval: config.driver.min_poll_interval(),
            initial_speed: config.driver.initial_speed,
            last_poll: None,
        }
    }

    /// Copy of the current channel table
    pub fn channels(&self) -> Vec<Channel> {
        self.channels.clone()
    }

    /// Connect, synchronize, and put every channel at the initial speed
    pub async fn start(&mut self) -> Result<()> {
        self.session.connect().await?;
        self.session.resync().await?;
        info!(
            "Fan controller ready, applying initial speed {}%",
            self.initial_speed
        );
        let initial_speed = self.initial_speed;
        self.set_speed(ChannelSelector::All, initial_speed).await;
        Ok(())
    }

    /// Actor main loop
    ///
    /// Reports the outcome of [`FanController::start`] on `ready`, then
    /// serves `requests` until a `Shutdown` arrives or every sender is gone.
    pub async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        ready: oneshot::Sender<Result<()>>,
    ) {
        if let Err(e) = self.start().await {
            error!("Fan controller failed to start: {}", e);
            self.session.close();
            let _ = ready.send(Err(e));
            return;
        }
        let _ = ready.send(Ok(()));

        while let Some(request) = requests.recv().await {
            if !self.handle(request).await {
                requests.close();
                break;
            }
        }

        self.session.close();
        info!("Fan controller stopped");
    }

    /// Execute one request. Returns `false` once the actor must stop.
    pub async fn handle(&mut self, request: Request) -> bool {
        debug!("Handling {:?}", request);
        match request {
            Request::PollAll => self.poll_all().await,
            Request::SetSpeed { selector, percent } => self.set_speed(selector, percent).await,
            Request::Shutdown => {
                info!("Shutdown requested");
                return false;
            }
        }
        true
    }

    async fn poll_all(&mut self) {
        if let Some(last) = self.last_poll {
            if last.elapsed() < self.min_poll_interval {
                debug!("Skipping poll, previous one started {:?} ago", last.elapsed());
                return;
            }
        }

        let started = Instant::now();
        let mut complete = true;
        for index in 0..self.channels.len() {
            let id = self.channels[index].id;
            match self.read_channel(id).await {
                Ok((volts, amps, rpm)) => {
                    self.channels[index].apply_telemetry(volts, amps, rpm);
                }
                Err(e) => {
                    warn!("Poll of channel {} failed: {}", id, e);
                    complete = false;
                    break;
                }
            }
        }

        self.publish();

        if complete {
            self.last_poll = Some(started);
            self.notifier.notify(&self.channels);
        }
    }

    async fn read_channel(&mut self, id: u8) -> Result<(f32, f32, u32)> {
        let volts = self
            .read_telemetry(Telemetry::Volts, id, protocol::decode_fixed_point)
            .await?;
        let amps = self
            .read_telemetry(Telemetry::Amps, id, protocol::decode_fixed_point)
            .await?;
        let rpm = self
            .read_telemetry(Telemetry::Rpm, id, protocol::decode_rpm)
            .await?;
        Ok((volts, amps, rpm))
    }

    async fn read_telemetry<T, F>(&mut self, kind: Telemetry, id: u8, decode: F) -> Result<T>
    where
        F: Fn(&[u8]) -> Result<T>,
    {
        let command = format!("read {} ch{}", kind.as_str(), id);
        let request = protocol::telemetry_request(kind, id);
        self.session
            .execute(&command, &request, TELEMETRY_FRAME_LEN, decode)
            .await
    }

    async fn set_speed(&mut self, selector: ChannelSelector, percent: u8) {
        let percent = percent.min(fanboy_core::MAX_SPEED_PERCENT);
        let targets: Vec<u8> = match selector {
            ChannelSelector::All => self.channels.iter().map(|c| c.id).collect(),
            ChannelSelector::Channel(id) if self.index_of(id).is_some() => vec![id],
            ChannelSelector::Channel(id) => {
                warn!(
                    "Ignoring speed request for channel {} (configured: 1-{})",
                    id,
                    self.channels.len()
                );
                return;
            }
        };

        for id in targets {
            if let Some(index) = self.index_of(id) {
                self.channels[index].speed = Some(percent);
            }
            if let Err(e) = self.set_channel_speed(id, percent).await {
                warn!("Setting channel {} to {}% failed: {}", id, percent, e);
            }
        }

        self.publish();
    }

    async fn set_channel_speed(&mut self, id: u8, percent: u8) -> Result<()> {
        let request = protocol::set_speed_request(id, percent);
        let command = format!("set speed ch{}", id);
        self.session
            .execute(&command, &request, ACK_FRAME_LEN, protocol::decode_set_ack)
            .await?;
        debug!("Channel {} set to {}%", id, percent);
        Ok(())
    }

    fn index_of(&self, id: u8) -> Option<usize> {
        self.channels.iter().position(|c| c.id == id)
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.channels.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Opcode, SYNC_ACK};
    use crate::testing::{test_config, MockConnector, MockDevice, Reply};
    use fanboy_core::FanboyError;
    use std::sync::Mutex;

    fn controller(device: &MockDevice, channels: u8) -> FanController<MockConnector> {
        let (tx, _rx) = watch::channel(Vec::new());
        FanController::new(
            device.connector(),
            &test_config(channels),
            Arc::new(Notifier::new()),
            tx,
        )
    }

    #[tokio::test]
    async fn test_start_applies_initial_speed_to_all_channels() {
        let device = MockDevice::new();
        let mut controller = controller(&device, 3);

        controller.start().await.unwrap();

        assert_eq!(device.speed_requests(), vec![(1, 0, 0), (2, 0, 0), (3, 0, 0)]);
        assert!(controller.channels().iter().all(|c| c.speed == Some(0)));
    }

    #[tokio::test]
    async fn test_start_surfaces_connect_error() {
        let device = MockDevice::new();
        device.fail_next_opens(100);
        let mut controller = controller(&device, 2);

        let err = controller.start().await.unwrap_err();
        assert!(matches!(err, FanboyError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_poll_updates_channels_and_wattage() {
        let device = MockDevice::new();
        device.set_telemetry(Telemetry::Volts, 2, 11, 5);
        device.set_telemetry(Telemetry::Amps, 2, 1, 2);
        device.set_telemetry(Telemetry::Rpm, 2, 0x07, 0xD0);
        let mut controller = controller(&device, 2);
        controller.start().await.unwrap();

        controller.handle(Request::PollAll).await;

        let channels = controller.channels();
        assert_eq!(channels[0].volts, 12.0);
        assert_eq!(channels[0].rpm, 1200);
        assert_eq!(channels[1].rpm, 2000);
        assert!((channels[1].volts - 11.5).abs() < 1e-4);
        assert!((channels[1].amps - 1.2).abs() < 1e-4);
        for channel in &channels {
            assert_eq!(channel.wattage, channel.volts * channel.amps);
        }
    }

    #[tokio::test]
    async fn test_second_poll_within_interval_is_noop() {
        let device = MockDevice::new();
        let mut controller = controller(&device, 2);
        controller.start().await.unwrap();

        controller.handle(Request::PollAll).await;
        let first = controller.channels();

        device.set_telemetry(Telemetry::Rpm, 1, 0x01, 0x00);
        controller.handle(Request::PollAll).await;

        assert_eq!(controller.channels(), first);
        assert_eq!(device.count_requests(Opcode::ReadVolts), 2);
    }

    #[tokio::test]
    async fn test_poll_notifies_listeners_with_snapshot() {
        let device = MockDevice::new();
        let (tx, _rx) = watch::channel(Vec::new());
        let notifier = Arc::new(Notifier::new());
        let mut controller =
            FanController::new(device.connector(), &test_config(3), notifier.clone(), tx);
        controller.start().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        notifier.subscribe(move |channels| sink.lock().unwrap().push(channels.len()));

        controller.handle(Request::PollAll).await;
        assert_eq!(*seen.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_stale_values_and_skips_listeners() {
        let device = MockDevice::new();
        let (tx, _rx) = watch::channel(Vec::new());
        let notifier = Arc::new(Notifier::new());
        let mut controller =
            FanController::new(device.connector(), &test_config(2), notifier.clone(), tx);
        controller.start().await.unwrap();
        controller.handle(Request::PollAll).await;
        let before = controller.channels();

        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        notifier.subscribe(move |_| *counter.lock().unwrap() += 1);

        // Outage: nothing answers and the port cannot be reopened
        device.set_responder(|_| Reply::Silent);
        device.fail_next_opens(1000);
        controller.last_poll = None;
        controller.handle(Request::PollAll).await;

        assert_eq!(controller.channels(), before);
        assert_eq!(*calls.lock().unwrap(), 0);

        // Recovery resumes delivery
        device.clear_responder();
        device.fail_next_opens(0);
        controller.handle(Request::PollAll).await;
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_set_speed_single_channel() {
        let device = MockDevice::new();
        let mut controller = controller(&device, 3);
        controller.start().await.unwrap();
        device.clear_writes();

        controller
            .handle(Request::SetSpeed {
                selector: ChannelSelector::Channel(2),
                percent: 50,
            })
            .await;

        assert_eq!(device.speed_requests(), vec![(2, 6, 0)]);
        let channels = controller.channels();
        assert_eq!(channels[1].speed, Some(50));
        assert_eq!(channels[0].speed, Some(0));
    }

    #[tokio::test]
    async fn test_set_speed_all_in_id_order() {
        let device = MockDevice::new();
        let mut controller = controller(&device, 4);
        controller.start().await.unwrap();
        device.clear_writes();

        controller
            .handle(Request::SetSpeed {
                selector: ChannelSelector::All,
                percent: 100,
            })
            .await;

        assert_eq!(
            device.speed_requests(),
            vec![(1, 12, 0), (2, 12, 0), (3, 12, 0), (4, 12, 0)]
        );
    }

    #[tokio::test]
    async fn test_set_speed_all_isolates_channel_failures() {
        let device = MockDevice::new();
        let mut controller = controller(&device, 3);
        controller.start().await.unwrap();
        device.clear_writes();

        // Channel 2 never acknowledges
        device.set_responder(|request| {
            if request[0] == Opcode::Sync as u8 {
                Reply::Bytes(vec![SYNC_ACK])
            } else if request[0] == Opcode::SetVoltage as u8 && request[1] == 2 {
                Reply::Silent
            } else {
                Reply::Bytes(vec![protocol::SET_VOLTAGE_ACK])
            }
        });

        controller
            .handle(Request::SetSpeed {
                selector: ChannelSelector::All,
                percent: 25,
            })
            .await;

        let channels: Vec<u8> = device.speed_requests().iter().map(|r| r.0).collect();
        assert!(channels.contains(&1));
        assert!(channels.contains(&3));
        assert_eq!(channels.last(), Some(&3));
        assert!(controller.channels().iter().all(|c| c.speed == Some(25)));
    }

    #[tokio::test]
    async fn test_set_speed_out_of_range_channel_is_ignored() {
        let device = MockDevice::new();
        let mut controller = controller(&device, 2);
        controller.start().await.unwrap();
        device.clear_writes();

        let keep_running = controller
            .handle(Request::SetSpeed {
                selector: ChannelSelector::Channel(9),
                percent: 50,
            })
            .await;

        assert!(keep_running);
        assert!(device.writes().is_empty());
    }

    #[tokio::test]
    async fn test_set_speed_clamps_percentage() {
        let device = MockDevice::new();
        let mut controller = controller(&device, 1);
        controller.start().await.unwrap();
        device.clear_writes();

        controller
            .handle(Request::SetSpeed {
                selector: ChannelSelector::Channel(1),
                percent: 250,
            })
            .await;

        assert_eq!(device.speed_requests(), vec![(1, 12, 0)]);
        assert_eq!(controller.channels()[0].speed, Some(100));
    }

    #[tokio::test]
    async fn test_stray_ack_resyncs_and_repeats_speed_set() {
        let device = MockDevice::new();
        let mut controller = controller(&device, 1);
        controller.start().await.unwrap();
        device.clear_writes();

        // A telemetry header byte left over from a desynced stream
        device.script(Reply::Bytes(vec![0xC0]));

        controller
            .handle(Request::SetSpeed {
                selector: ChannelSelector::Channel(1),
                percent: 10,
            })
            .await;

        assert_eq!(device.speed_requests(), vec![(1, 1, 2), (1, 1, 2)]);
        assert_eq!(device.count_requests(Opcode::Sync), 1);
        assert_eq!(
            device.writes().iter().map(|w| w[0]).collect::<Vec<_>>(),
            vec![Opcode::SetVoltage as u8, Opcode::Sync as u8, Opcode::SetVoltage as u8]
        );
        assert_eq!(controller.channels()[0].speed, Some(10));
    }

    #[tokio::test]
    async fn test_persistently_rejected_ack_fails_after_bounded_resyncs() {
        let device = MockDevice::new();
        let mut controller = controller(&device, 1);
        controller.start().await.unwrap();
        device.clear_writes();
        device.set_speed_ack(0x00);

        let err = controller.set_channel_speed(1, 10).await.unwrap_err();

        assert!(matches!(err, FanboyError::FatalCommand { .. }));
        let retries = test_config(1).retry.max_desync_retries as usize;
        assert_eq!(device.speed_requests().len(), retries + 1);
        assert_eq!(device.count_requests(Opcode::Sync), retries);
    }

    #[tokio::test]
    async fn test_poll_guard_measures_from_poll_start() {
        let device = MockDevice::new();
        let mut controller = controller(&device, 1);
        controller.min_poll_interval = Duration::from_millis(60);
        controller.start().await.unwrap();
        device.set_read_delay(Duration::from_millis(20));

        // Three reads of 20ms each: the poll takes about 60ms
        let before = Instant::now();
        controller.handle(Request::PollAll).await;
        assert!(before.elapsed() >= Duration::from_millis(60));

        // A tick one interval after the previous one runs, even though the
        // previous poll only just finished
        tokio::time::sleep_until(before + Duration::from_millis(70)).await;
        controller.handle(Request::PollAll).await;
        assert_eq!(device.count_requests(Opcode::ReadRpm), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop_and_closes_link() {
        let device = MockDevice::new();
        let (snapshot_tx, _snapshot_rx) = watch::channel(Vec::new());
        let controller = FanController::new(
            device.connector(),
            &test_config(2),
            Arc::new(Notifier::new()),
            snapshot_tx,
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(controller.run(rx, ready_tx));
        ready_rx.await.unwrap().unwrap();

        tx.send(Request::Shutdown).unwrap();
        task.await.unwrap();

        assert_eq!(device.closes(), 1);
        assert!(tx.send(Request::PollAll).is_err());
    }

    #[tokio::test]
    async fn test_run_reports_startup_failure() {
        let device = MockDevice::new();
        device.fail_next_opens(100);
        let (snapshot_tx, _snapshot_rx) = watch::channel(Vec::new());
        let controller = FanController::new(
            device.connector(),
            &test_config(2),
            Arc::new(Notifier::new()),
            snapshot_tx,
        );
        let (_tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::spawn(controller.run(rx, ready_tx));
        let result = ready_rx.await.unwrap();
        assert!(matches!(result, Err(FanboyError::Connect { .. })));
    }
}
