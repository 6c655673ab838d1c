//! Periodic poll trigger
//!
//! Only ever enqueues [`Request::PollAll`]; the actor decides whether a poll
//! actually runs.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::fan_controller::Request;

/// Timer feeding poll requests into the actor queue
pub struct Poller {
    requests: mpsc::UnboundedSender<Request>,
    period: Duration,
}

impl Poller {
    pub fn new(requests: mpsc::UnboundedSender<Request>, period: Duration) -> Self {
        Self { requests, period }
    }

    /// Start ticking. The task ends once the actor queue is closed.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let period = self.period.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.requests.send(Request::PollAll).is_err() {
                debug!("Actor queue closed, poller exiting");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_poller_emits_poll_requests() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = Poller::new(tx, Duration::from_millis(20)).spawn();

        for _ in 0..3 {
            let request = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("poller stalled");
            assert_eq!(request, Some(Request::PollAll));
        }

        handle.abort();
    }

    #[tokio::test]
    async fn test_poller_does_not_fire_immediately() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = Poller::new(tx, Duration::from_secs(3600)).spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        handle.abort();
    }

    #[tokio::test]
    async fn test_poller_exits_when_queue_closes() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Poller::new(tx, Duration::from_millis(5)).spawn();
        drop(rx);

        timeout(Duration::from_secs(2), handle)
            .await
            .expect("poller kept running")
            .unwrap();
    }
}
