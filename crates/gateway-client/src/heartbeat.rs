//! Heartbeat ping/pong liveness monitoring.
//!
//! One monitor exists per authenticated connection. It never touches the
//! socket: the connection task awaits [`HeartbeatMonitor::next_signal`] and
//! performs the ping or the teardown itself. Dropping the monitor stops it.

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// What the connection task should do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatSignal {
    /// Write a ping; the pong deadline is now armed.
    SendProbe,
    /// The last probe went unanswered; tear the connection down.
    Dead,
}

/// Per-connection probe state machine: idle, probe sent, then either
/// acknowledged (back to idle) or dead.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    ticker: Interval,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl HeartbeatMonitor {
    /// Start a monitor. The first probe goes out one `interval` from now.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ticker,
            timeout,
            deadline: None,
        }
    }

    /// Wait for the next action.
    ///
    /// Ticks that land while a probe is outstanding are skipped, so at most
    /// one probe is unacknowledged at a time and `Dead` is produced at most
    /// once per missed probe.
    pub async fn next_signal(&mut self) -> HeartbeatSignal {
        loop {
            tokio::select! {
                _ = self.ticker.tick() => {
                    if self.deadline.is_none() {
                        self.deadline = Some(Instant::now() + self.timeout);
                        return HeartbeatSignal::SendProbe;
                    }
                }
                () = sleep_until_opt(self.deadline) => {
                    self.deadline = None;
                    return HeartbeatSignal::Dead;
                }
            }
        }
    }

    /// Record a pong, cancelling the outstanding deadline.
    pub fn acknowledge(&mut self) {
        self.deadline = None;
    }

    #[cfg(test)]
    pub(crate) fn is_probe_outstanding(&self) -> bool {
        self.deadline.is_some()
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
