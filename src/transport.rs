use crate::error::{QsysError, Result};
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::sleep;

/// Default external control protocol port
pub const DEFAULT_PORT: u16 = 1702;

const MAX_BACKOFF: Duration = Duration::from_secs(60);
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event emitted by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link came up
    Connected,
    /// The link went down
    Disconnected,
    /// One received line with its delimiter removed
    Line(String),
}

/// Duplex line-oriented link to a core
///
/// Implementations deliver received lines and connection changes as
/// [`TransportEvent`]s over a channel handed out at construction, and accept
/// fully terminated outbound text through [`Transport::write`].
pub trait Transport: Send + Sync {
    /// Write text to the link. The caller supplies the line terminator.
    fn write<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Whether the link is currently up
    fn is_connected(&self) -> bool;

    /// Stop the link and any reconnect attempts
    fn close(&self) {}
}

/// TCP client transport with automatic reconnect
pub struct TcpTransport {
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl TcpTransport {
    /// Start connecting to `host:port` in the background
    ///
    /// Returns the transport and the receiver for its events. The connection
    /// is retried with exponential backoff until [`Transport::close`] is
    /// called. Must be called from within a tokio runtime.
    pub fn spawn(host: impl Into<String>, port: u16) -> (Arc<Self>, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        let transport = Arc::new(Self {
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            stop_tx,
        });

        let addr = format!("{}:{}", host.into(), port);
        tokio::spawn(transport.clone().run(addr, events_tx, stop_rx));

        (transport, events_rx)
    }

    async fn run(
        self: Arc<Self>,
        addr: String,
        events: mpsc::Sender<TransportEvent>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut backoff = Duration::from_secs(0);

        loop {
            if backoff > Duration::from_secs(0) {
                tracing::info!("Reconnecting to {} in {:?}", addr, backoff);
                tokio::select! {
                    _ = sleep(backoff) => {}
                    _ = stop_rx.changed() => break,
                }
            }

            tracing::info!("Connecting to {}", addr);
            let stream = tokio::select! {
                result = TcpStream::connect(&addr) => result,
                _ = stop_rx.changed() => break,
            };

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("Failed to connect to {}: {}", addr, e);
                    backoff = next_backoff(backoff);
                    continue;
                }
            };

            backoff = Duration::from_secs(0);
            let (read, write) = stream.into_split();
            *self.writer.lock().await = Some(write);
            self.connected.store(true, Ordering::SeqCst);

            if events.send(TransportEvent::Connected).await.is_err() {
                break;
            }

            let stopped = self.read_lines(read, &events, &mut stop_rx).await;

            self.connected.store(false, Ordering::SeqCst);
            *self.writer.lock().await = None;
            let _ = events.send(TransportEvent::Disconnected).await;

            if stopped {
                break;
            }
            backoff = next_backoff(backoff);
        }

        tracing::info!("Transport to {} stopped", addr);
    }

    /// Forward lines until the peer closes, an error occurs or we are told
    /// to stop. Returns `true` when stopped.
    async fn read_lines(
        &self,
        read: tokio::net::tcp::OwnedReadHalf,
        events: &mpsc::Sender<TransportEvent>,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        let mut lines = BufReader::new(read).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let line = line.trim_end_matches('\r').to_string();
                        tracing::trace!("RX: '{}'", line);
                        if events.send(TransportEvent::Line(line)).await.is_err() {
                            return true;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Connection closed by core");
                        return false;
                    }
                    Err(e) => {
                        tracing::error!("Read error: {}", e);
                        return false;
                    }
                },
                _ = stop_rx.changed() => return true,
            }
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    if current == Duration::from_secs(0) {
        Duration::from_secs(1)
    } else {
        (current * 2).min(MAX_BACKOFF)
    }
}

impl Transport for TcpTransport {
    fn write<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut writer = self.writer.lock().await;
            let stream = writer.as_mut().ok_or(QsysError::NotConnected)?;
            stream.write_all(text.as_bytes()).await?;
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        let _ = self.stop_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let mut backoff = Duration::from_secs(0);
        backoff = next_backoff(backoff);
        assert_eq!(backoff, Duration::from_secs(1));
        backoff = next_backoff(backoff);
        assert_eq!(backoff, Duration::from_secs(2));
        for _ in 0..10 {
            backoff = next_backoff(backoff);
        }
        assert_eq!(backoff, MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_tcp_lines_and_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (transport, mut events) = TcpTransport::spawn("127.0.0.1", port);
        let (mut socket, _) = listener.accept().await.unwrap();

        assert_eq!(events.recv().await, Some(TransportEvent::Connected));
        assert!(transport.is_connected());

        socket.write_all(b"cgpa\r\ncv \"Gain\" \"0dB\" 0 1\n").await.unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Line("cgpa".into())));
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Line("cv \"Gain\" \"0dB\" 0 1".into()))
        );

        transport.write("sg\n").await.unwrap();
        let mut buf = [0u8; 3];
        socket.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"sg\n");

        drop(socket);
        assert_eq!(events.recv().await, Some(TransportEvent::Disconnected));
        assert!(!transport.is_connected());
        assert!(matches!(transport.write("sg\n").await, Err(QsysError::NotConnected)));

        transport.close();
    }
}
