//! Outbound command queue.
//!
//! Every producer (control points, the subscription manager, the heartbeat)
//! enqueues here; a single writer task drains one command at a time into the
//! transport. The queue is bounded and lossy: when full, new commands are
//! dropped rather than building an unbounded backlog against a wedged core.

use crate::error::{QsysError, Result};
use crate::protocol::{has_line_break, Command};
use crate::transport::Transport;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Notify};
use uuid::Uuid;

/// Maximum number of commands waiting to be written
pub const QUEUE_CAPACITY: usize = 100;

/// Protocol line terminator
pub const LINE_TERMINATOR: &str = "\n";

/// A command waiting in the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCommand {
    /// Correlation id, only used in logs
    pub id: Uuid,
    /// Serialized line without terminator
    pub line: String,
    /// Key of the producer, only used in logs
    pub label: Option<String>,
}

impl QueuedCommand {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            line: line.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl From<Command> for QueuedCommand {
    fn from(command: Command) -> Self {
        QueuedCommand::new(command.to_string())
    }
}

impl From<&Command> for QueuedCommand {
    fn from(command: &Command) -> Self {
        QueuedCommand::new(command.to_string())
    }
}

/// Bounded FIFO of outbound commands
pub struct CommandQueue {
    pending: Mutex<VecDeque<QueuedCommand>>,
    capacity: usize,
    /// Mirrors the transport link; drains only happen while set
    connected: AtomicBool,
    /// Claimed by the drain step for the duration of one write
    in_progress: AtomicBool,
    wake: Notify,
}

impl CommandQueue {
    /// Create an empty queue with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            connected: AtomicBool::new(false),
            in_progress: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<QueuedCommand>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a command, failing with [`QsysError::QueueFull`] at capacity
    pub fn enqueue(&self, command: impl Into<QueuedCommand>) -> Result<()> {
        let command = command.into();
        if has_line_break(&command.line) {
            tracing::warn!("Refusing multi-line command '{}'", command.line.escape_debug());
            return Err(QsysError::invalid_value("command", &command.line));
        }
        {
            let mut pending = self.pending();
            if pending.len() >= self.capacity {
                tracing::warn!("Command queue full ({}), dropping '{}'", self.capacity, command.line);
                return Err(QsysError::QueueFull { line: command.line });
            }
            tracing::trace!(
                id = %command.id,
                label = command.label.as_deref().unwrap_or(""),
                "Enqueued '{}' ({} pending)",
                command.line,
                pending.len() + 1
            );
            pending.push_back(command);
        }
        self.wake.notify_one();
        Ok(())
    }

    /// Number of commands waiting
    pub fn len(&self) -> usize {
        self.pending().len()
    }

    /// Whether no commands are waiting
    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    /// Lines currently waiting, oldest first
    pub fn pending_lines(&self) -> Vec<String> {
        self.pending().iter().map(|c| c.line.clone()).collect()
    }

    /// Whether a drain is currently writing to the transport
    pub fn is_draining(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Whether the queue considers the link up
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Mark the link up, re-arming the drain
    pub fn set_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Drop every pending command, keeping the link state
    pub fn clear(&self) {
        let dropped = {
            let mut pending = self.pending();
            let dropped = pending.len();
            pending.clear();
            dropped
        };
        if dropped > 0 {
            tracing::debug!("Cleared {} pending commands", dropped);
        }
    }

    /// Mark the link down, drop every pending command and release the drain
    pub fn reset(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.clear();
        self.in_progress.store(false, Ordering::SeqCst);
    }

    /// Claim the drain and take the oldest command
    ///
    /// Returns `None` when disconnected, empty, or another drain holds the
    /// claim.
    fn begin_drain(&self) -> Option<QueuedCommand> {
        if !self.is_connected() {
            return None;
        }
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        let next = self.pending().pop_front();
        if next.is_none() {
            self.in_progress.store(false, Ordering::SeqCst);
        }
        next
    }

    /// Write exactly one command to the transport
    ///
    /// Returns `Ok(true)` if a command was handed to the transport and
    /// `Ok(false)` if there was nothing to do. A failed write drops the
    /// command.
    pub async fn drain_one(&self, transport: &dyn Transport) -> Result<bool> {
        let Some(command) = self.begin_drain() else {
            return Ok(false);
        };

        tracing::debug!(id = %command.id, "TX: '{}'", command.line);
        let text = format!("{}{}", command.line, LINE_TERMINATOR);
        let result = transport.write(&text).await;
        self.in_progress.store(false, Ordering::SeqCst);

        result.map(|()| true)
    }

    /// Drain the queue into the transport until told to stop
    pub async fn run_writer(self: Arc<Self>, transport: Arc<dyn Transport>, mut stop_rx: watch::Receiver<bool>) {
        loop {
            loop {
                match self.drain_one(transport.as_ref()).await {
                    Ok(true) => continue,
                    Ok(false) => break,
                    // The failed command is already dropped; keep draining
                    Err(e) => tracing::warn!("Failed to write command: {}", e),
                }
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = stop_rx.changed() => break,
            }
        }
        tracing::debug!("Command writer stopped");
    }
}

/// Cloneable handle producers use to enqueue commands
#[derive(Clone)]
pub struct CommandSender {
    queue: Arc<CommandQueue>,
    label: Option<Arc<str>>,
}

impl CommandSender {
    pub fn new(queue: Arc<CommandQueue>) -> Self {
        Self { queue, label: None }
    }

    /// A sender that tags its commands with `label` in logs
    pub fn labelled(&self, label: &str) -> Self {
        Self {
            queue: self.queue.clone(),
            label: Some(Arc::from(label)),
        }
    }

    /// Enqueue a command
    pub fn send(&self, command: Command) -> Result<()> {
        command.validate()?;
        let mut queued = QueuedCommand::from(command);
        if let Some(label) = &self.label {
            queued = queued.with_label(label.as_ref());
        }
        self.queue.enqueue(queued)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures_util::future::BoxFuture;

    /// Transport that records every write
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) written: Mutex<Vec<String>>,
    }

    impl RecordingTransport {
        pub(crate) fn lines(&self) -> Vec<String> {
            self.written
                .lock()
                .unwrap()
                .iter()
                .map(|t| t.trim_end_matches(LINE_TERMINATOR).to_string())
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        fn write<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.written.lock().unwrap().push(text.to_string());
                Ok(())
            })
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    /// Transport whose first write fails
    #[derive(Default)]
    struct FlakyTransport {
        failed: AtomicBool,
        inner: RecordingTransport,
    }

    impl Transport for FlakyTransport {
        fn write<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<()>> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Box::pin(async { Err(QsysError::NotConnected) });
            }
            self.inner.write(text)
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_overflow_keeps_accepted_entries() {
        let queue = CommandQueue::new(3);
        for i in 0..3 {
            queue.enqueue(Command::ChangeGroupPoll(i)).unwrap();
        }

        let err = queue.enqueue(Command::ChangeGroupPoll(99)).unwrap_err();
        assert!(matches!(err, QsysError::QueueFull { ref line } if line == "cgp 99"));
        assert!(queue.enqueue(Command::StatusGet).is_err());

        assert_eq!(queue.pending_lines(), vec!["cgp 0", "cgp 1", "cgp 2"]);
    }

    #[tokio::test]
    async fn test_drain_requires_connection() {
        let queue = CommandQueue::new(QUEUE_CAPACITY);
        let transport = RecordingTransport::default();
        queue.enqueue(Command::StatusGet).unwrap();

        assert!(!queue.drain_one(&transport).await.unwrap());
        assert_eq!(queue.len(), 1);

        queue.set_connected();
        assert!(queue.drain_one(&transport).await.unwrap());
        assert!(!queue.drain_one(&transport).await.unwrap());
        assert_eq!(transport.written.lock().unwrap().as_slice(), ["sg\n"]);
        assert!(!queue.is_draining());
    }

    #[tokio::test]
    async fn test_drain_is_fifo_one_at_a_time() {
        let queue = CommandQueue::new(QUEUE_CAPACITY);
        let transport = RecordingTransport::default();
        queue.set_connected();

        queue
            .enqueue(Command::snapshot_from_preset("BankA 3").unwrap())
            .unwrap();
        queue.enqueue(Command::ChangeGroupPoll(1)).unwrap();

        assert!(queue.drain_one(&transport).await.unwrap());
        assert_eq!(queue.len(), 1);
        assert!(queue.drain_one(&transport).await.unwrap());

        assert_eq!(transport.lines(), vec!["ssl \"BankA\" 3", "cgp 1"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_writer_keeps_draining_after_failed_write() {
        let queue = Arc::new(CommandQueue::new(QUEUE_CAPACITY));
        let transport = Arc::new(FlakyTransport::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let writer = tokio::spawn(queue.clone().run_writer(transport.clone(), stop_rx));

        queue.enqueue(Command::StatusGet).unwrap();
        queue.enqueue(Command::ChangeGroupPoll(1)).unwrap();
        queue.enqueue(Command::ChangeGroupPoll(2)).unwrap();
        queue.set_connected();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while transport.inner.lines().len() < 2 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(transport.inner.lines(), vec!["cgp 1", "cgp 2"]);
        assert!(queue.is_empty());
        assert!(!queue.is_draining());

        stop_tx.send(true).unwrap();
        writer.await.unwrap();
    }

    #[test]
    fn test_reset_clears_everything() {
        let queue = CommandQueue::new(QUEUE_CAPACITY);
        queue.set_connected();
        queue.enqueue(Command::StatusGet).unwrap();
        assert!(queue.begin_drain().is_some());
        assert!(queue.is_draining());
        queue.enqueue(Command::StatusGet).unwrap();

        queue.reset();

        assert!(queue.is_empty());
        assert!(!queue.is_draining());
        assert!(!queue.is_connected());
    }

    #[test]
    fn test_malformed_commands_never_queued() {
        let queue = Arc::new(CommandQueue::new(QUEUE_CAPACITY));
        let sender = CommandSender::new(queue.clone());

        assert!(sender.send(Command::Raw("sg\ncgp 1".into())).is_err());
        assert!(sender.send(Command::Get("PGM \"Gain\"".into())).is_err());
        assert!(queue.enqueue(QueuedCommand::new("cgp 1\r\n")).is_err());
        assert!(queue.is_empty());

        sender.send(Command::Raw("sg".into())).unwrap();
        assert_eq!(queue.pending_lines(), vec!["sg"]);
    }

    #[test]
    fn test_labelled_sender() {
        let queue = Arc::new(CommandQueue::new(QUEUE_CAPACITY));
        let sender = CommandSender::new(queue.clone()).labelled("fader-1");
        sender.send(Command::Get("Gain".into())).unwrap();

        let pending = queue.pending();
        assert_eq!(pending[0].label.as_deref(), Some("fader-1"));
        assert_eq!(pending[0].line, "cg \"Gain\"");
    }
}
