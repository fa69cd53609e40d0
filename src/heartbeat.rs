use crate::config::HeartbeatConfig;
use crate::error::{QsysError, Result};
use crate::protocol::Command;
use crate::queue::CommandQueue;
use crate::subscription::SubscriptionManager;
use crate::types::ChangeGroupId;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

/// Outcome of one heartbeat interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    /// The last probe was answered
    Healthy,
    /// Probes have gone unanswered this many times in a row
    Missed(u32),
    /// A multiple of the miss threshold was reached; resubscribe
    Lost(u32),
}

/// Periodic liveness probe
///
/// Each interval the monitor counts a miss up front and polls the (empty)
/// heartbeat change group. The router clears the count when the poll reply
/// arrives, so a count still above zero after the grace period means the
/// core did not answer.
pub struct HeartbeatMonitor {
    misses: AtomicU32,
    running: AtomicBool,
    config: HeartbeatConfig,
    probe_group: ChangeGroupId,
    queue: Arc<CommandQueue>,
    stop_rx: watch::Receiver<bool>,
}

impl HeartbeatMonitor {
    pub fn new(
        config: HeartbeatConfig,
        probe_group: ChangeGroupId,
        queue: Arc<CommandQueue>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            misses: AtomicU32::new(0),
            running: AtomicBool::new(false),
            config,
            probe_group,
            queue,
            stop_rx,
        }
    }

    /// Consecutive unanswered probes
    pub fn misses(&self) -> u32 {
        self.misses.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Called by the router when a poll reply is seen
    pub fn record_reply(&self) {
        let previous = self.misses.swap(0, Ordering::SeqCst);
        if previous > 1 {
            tracing::debug!("Heartbeat recovered after {} misses", previous);
        }
    }

    /// Count a miss and send the probe
    pub fn probe(&self) -> Result<()> {
        self.misses.fetch_add(1, Ordering::SeqCst);
        self.queue.enqueue(Command::ChangeGroupPoll(self.probe_group))
    }

    /// Judge the current miss count
    pub fn evaluate(&self) -> HeartbeatStatus {
        let misses = self.misses();
        let threshold = self.config.miss_threshold.max(1);
        match misses {
            0 => HeartbeatStatus::Healthy,
            n if n % threshold == 0 => HeartbeatStatus::Lost(n),
            n => HeartbeatStatus::Missed(n),
        }
    }

    /// Start the probe loop unless it is already running
    pub(crate) fn ensure_running(self: &Arc<Self>, subscriptions: Arc<SubscriptionManager>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::debug!("Starting heartbeat every {:?}", self.config.interval());
            tokio::spawn(self.clone().run(subscriptions));
        }
    }

    async fn run(self: Arc<Self>, subscriptions: Arc<SubscriptionManager>) {
        let _running = RunningFlag(&self.running);
        let mut stop_rx = self.stop_rx.clone();
        let period = self.config.interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop_rx.changed() => break,
            }

            if !self.queue.is_connected() {
                continue;
            }

            if let Err(e) = self.probe() {
                tracing::warn!("Failed to send heartbeat probe: {}", e);
            }

            tokio::select! {
                _ = sleep(self.config.reply_grace()) => {}
                _ = stop_rx.changed() => break,
            }

            match self.evaluate() {
                HeartbeatStatus::Healthy => tracing::debug!("Heartbeat okay"),
                HeartbeatStatus::Missed(n) => tracing::debug!("Heartbeat missed, count {}", n),
                HeartbeatStatus::Lost(n) => {
                    tracing::warn!("{}; resubscribing", QsysError::HeartbeatLost { misses: n });
                    if let Err(e) = subscriptions.resubscribe() {
                        tracing::warn!("Resubscribe after heartbeat loss failed: {}", e);
                    }
                }
            }
        }

        tracing::debug!("Heartbeat stopped");
    }
}

/// Clears the running flag however the probe loop ends
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
