use crate::error::{QsysError, Result};
use tokio::sync::broadcast;

const FEEDBACK_CHANNEL_CAPACITY: usize = 100;

/// Broadcast publisher owned by a control point
pub(crate) struct FeedbackSender<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> FeedbackSender<T> {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(FEEDBACK_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an update; having no listeners is fine
    pub(crate) fn publish(&self, update: T) {
        let _ = self.tx.send(update);
    }

    pub(crate) fn subscribe(&self) -> FeedbackReceiver<T> {
        FeedbackReceiver::new(self.tx.subscribe())
    }
}

/// Receiver for control point feedback
pub struct FeedbackReceiver<T> {
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> FeedbackReceiver<T> {
    pub(crate) fn new(rx: broadcast::Receiver<T>) -> Self {
        Self { rx }
    }

    /// Receive the next feedback update
    ///
    /// Fails with `ConnectionClosed` once the control point is gone.
    pub async fn recv(&mut self) -> Result<T> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => QsysError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                QsysError::ChannelError(format!("Lagged by {} messages", n))
            }
        })
    }

    /// Try to receive a feedback update without blocking
    ///
    /// Returns `None` if no update is available.
    pub fn try_recv(&mut self) -> Result<Option<T>> {
        match self.rx.try_recv() {
            Ok(update) => Ok(Some(update)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(QsysError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(QsysError::ChannelError(format!("Lagged by {} messages", n)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_sees_updates() {
        let sender = FeedbackSender::new();
        let mut a = sender.subscribe();
        let mut b = sender.subscribe();

        sender.publish(7u16);

        assert_eq!(a.recv().await.unwrap(), 7);
        assert_eq!(b.try_recv().unwrap(), Some(7));
        assert_eq!(b.try_recv().unwrap(), None);
    }

    #[tokio::test]
    async fn test_closed_when_sender_dropped() {
        let sender = FeedbackSender::<bool>::new();
        let mut rx = sender.subscribe();
        drop(sender);
        assert!(matches!(rx.recv().await, Err(QsysError::ConnectionClosed)));
    }
}
