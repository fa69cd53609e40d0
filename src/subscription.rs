use crate::error::Result;
use crate::heartbeat::HeartbeatMonitor;
use crate::protocol::Command;
use crate::queue::CommandQueue;
use crate::registry::Registry;
use crate::types::ChangeGroupId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Change groups used by the engine
#[derive(Debug, Clone)]
pub struct ChangeGroups {
    /// Group holding every watched tag, auto-polled by the core
    pub feedback: ChangeGroupId,
    /// Always-empty group polled as the heartbeat
    pub heartbeat: ChangeGroupId,
    /// Auto-poll interval of the feedback group
    pub auto_poll_ms: u64,
}

impl Default for ChangeGroups {
    fn default() -> Self {
        Self {
            feedback: 1,
            heartbeat: 2,
            auto_poll_ms: 1000,
        }
    }
}

impl ChangeGroups {
    pub fn ids(&self) -> [ChangeGroupId; 2] {
        [self.feedback, self.heartbeat]
    }
}

/// Owns the change group lifecycle
///
/// Groups are never diffed: every (re)subscribe destroys and rebuilds them
/// from the registry.
pub struct SubscriptionManager {
    registry: Arc<Registry>,
    queue: Arc<CommandQueue>,
    groups: ChangeGroups,
    heartbeat: Arc<HeartbeatMonitor>,
    refreshed: AtomicBool,
}

impl SubscriptionManager {
    pub fn new(
        registry: Arc<Registry>,
        queue: Arc<CommandQueue>,
        groups: ChangeGroups,
        heartbeat: Arc<HeartbeatMonitor>,
    ) -> Self {
        Self {
            registry,
            queue,
            groups,
            heartbeat,
            refreshed: AtomicBool::new(false),
        }
    }

    pub fn groups(&self) -> &ChangeGroups {
        &self.groups
    }

    /// The full subscription sequence: destroys, creates, auto-poll rate,
    /// then one watch per tag in registration order.
    pub fn commands(&self) -> Vec<Command> {
        let mut commands: Vec<Command> = self
            .groups
            .ids()
            .into_iter()
            .map(Command::ChangeGroupDestroy)
            .collect();

        commands.extend(self.groups.ids().into_iter().map(Command::ChangeGroupCreate));

        commands.push(Command::ChangeGroupAutoPoll {
            group: self.groups.feedback,
            interval_ms: self.groups.auto_poll_ms,
        });

        commands.extend(
            self.registry
                .watched_tags()
                .into_iter()
                .map(|tag| Command::ChangeGroupAdd {
                    group: self.groups.feedback,
                    tag: tag.to_string(),
                }),
        );

        commands
    }

    /// Rebuild every change group and make sure the heartbeat is running
    ///
    /// Safe to call repeatedly. Returns the number of commands enqueued.
    pub fn resubscribe(self: &Arc<Self>) -> Result<usize> {
        let commands = self.commands();
        tracing::info!(
            "Subscribing {} control points ({} commands)",
            self.registry.len(),
            commands.len()
        );

        let enqueued = commands
            .iter()
            .try_for_each(|command| self.queue.enqueue(command));

        self.heartbeat.ensure_running(self.clone());

        enqueued?;
        if !self.refreshed.swap(true, Ordering::SeqCst) {
            self.refresh_all();
        }
        Ok(commands.len())
    }

    /// Ask every control point for its current values
    fn refresh_all(&self) {
        for point in self.registry.points() {
            if let Err(e) = point.refresh() {
                tracing::warn!("Initial poll of '{}' failed: {}", point.key(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeartbeatConfig;
    use crate::queue::QUEUE_CAPACITY;
    use crate::registry::tests::FakePoint;
    use crate::registry::{ControlPointKind, TagBinding, TagRole};
    use tokio::sync::watch;

    fn manager(registry: Registry, capacity: usize) -> (Arc<SubscriptionManager>, Arc<CommandQueue>, watch::Sender<bool>) {
        let queue = Arc::new(CommandQueue::new(capacity));
        let (stop_tx, stop_rx) = watch::channel(false);
        let heartbeat = Arc::new(HeartbeatMonitor::new(
            HeartbeatConfig::default(),
            2,
            queue.clone(),
            stop_rx,
        ));
        let manager = Arc::new(SubscriptionManager::new(
            Arc::new(registry),
            queue.clone(),
            ChangeGroups::default(),
            heartbeat,
        ));
        (manager, queue, stop_tx)
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(FakePoint::new(
                "fader-1",
                ControlPointKind::Level,
                vec![
                    TagBinding::watched("PGM Mute", TagRole::Mute),
                    TagBinding::watched("PGM Gain", TagRole::Level),
                ],
            ))
            .unwrap();
        registry
            .register(FakePoint::new(
                "cam-1",
                ControlPointKind::Camera,
                vec![
                    TagBinding::unwatched("Pan Left", TagRole::PanLeft),
                    TagBinding::watched("Cam Online", TagRole::OnlineStatus),
                ],
            ))
            .unwrap();
        registry
    }

    #[test]
    fn test_sequence_order() {
        let (manager, _queue, _stop) = manager(registry(), QUEUE_CAPACITY);
        let lines: Vec<String> = manager.commands().iter().map(|c| c.to_string()).collect();

        assert_eq!(
            lines,
            vec![
                "cgd 1",
                "cgd 2",
                "cgc 1",
                "cgc 2",
                "cgsna 1 1000",
                "cga 1 \"PGM Mute\"",
                "cga 1 \"PGM Gain\"",
                "cga 1 \"Cam Online\"",
            ]
        );
    }

    #[tokio::test]
    async fn test_resubscribe_is_repeatable() {
        let (manager, queue, _stop) = manager(registry(), QUEUE_CAPACITY);

        assert_eq!(manager.resubscribe().unwrap(), 8);
        assert_eq!(manager.resubscribe().unwrap(), 8);

        let lines = queue.pending_lines();
        assert_eq!(lines.len(), 16);
        assert_eq!(lines[..8], lines[8..]);
        assert!(manager.heartbeat.is_running());
    }

    #[tokio::test]
    async fn test_first_subscribe_refreshes_once() {
        let fader = FakePoint::new(
            "fader-1",
            ControlPointKind::Level,
            vec![TagBinding::watched("PGM Gain", TagRole::Level)],
        );
        let mut registry = Registry::new();
        registry.register(fader.clone()).unwrap();
        let (manager, _queue, _stop) = manager(registry, QUEUE_CAPACITY);

        manager.resubscribe().unwrap();
        manager.resubscribe().unwrap();

        assert_eq!(fader.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_subscribe_defers_refresh() {
        let fader = FakePoint::new(
            "fader-1",
            ControlPointKind::Level,
            vec![TagBinding::watched("PGM Gain", TagRole::Level)],
        );
        let mut registry = Registry::new();
        registry.register(fader.clone()).unwrap();
        let (manager, _queue, _stop) = manager(registry, 4);

        assert!(manager.resubscribe().is_err());
        assert_eq!(fader.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resubscribe_reports_overflow() {
        let (manager, queue, _stop) = manager(registry(), 4);

        assert!(manager.resubscribe().is_err());
        assert_eq!(queue.pending_lines(), vec!["cgd 1", "cgd 2", "cgc 1", "cgc 2"]);
        assert!(manager.heartbeat.is_running());
    }
}
