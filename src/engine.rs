use crate::config::Credentials;
use crate::error::{QsysError, Result};
use crate::protocol::Command;
use crate::queue::CommandQueue;
use crate::router::{Routed, Router};
use crate::subscription::SubscriptionManager;
use crate::transport::{Transport, TransportEvent};
use crate::types::{ConnectionState, CoreStatus};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Connection lifecycle and inbound dispatch for one core
///
/// Consumes transport events in order: link changes drive the queue and the
/// subscription lifecycle, received lines go through the router, and login
/// prompts are answered from the configured credentials.
pub struct Engine {
    queue: Arc<CommandQueue>,
    router: Router,
    subscriptions: Arc<SubscriptionManager>,
    transport: Arc<dyn Transport>,
    credentials: Option<Credentials>,
    state_tx: watch::Sender<ConnectionState>,
    status_tx: watch::Sender<Option<CoreStatus>>,
}

impl Engine {
    pub fn new(
        queue: Arc<CommandQueue>,
        router: Router,
        subscriptions: Arc<SubscriptionManager>,
        transport: Arc<dyn Transport>,
        credentials: Option<Credentials>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (status_tx, _) = watch::channel(None);
        Self {
            queue,
            router,
            subscriptions,
            transport,
            credentials,
            state_tx,
            status_tx,
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<Option<CoreStatus>> {
        self.status_tx.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::info!("Connection state: {} -> {}", previous, state);
        }
    }

    fn subscribe_all(&self) {
        if let Err(e) = self.subscriptions.resubscribe() {
            tracing::warn!("Subscription incomplete: {}", e);
        }
        self.set_state(ConnectionState::Subscribed);
    }

    /// Give up on the session after an unrecoverable login problem
    fn halt(&self, error: QsysError) -> Result<()> {
        tracing::error!("{}", error);
        self.queue.reset();
        self.transport.close();
        self.set_state(ConnectionState::Disconnected);
        Err(error)
    }

    /// Apply one transport event
    ///
    /// Fails only for errors that end the session (login refused or not
    /// possible).
    pub fn handle_event(&self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::Connected => {
                tracing::info!("Connected to core");
                self.queue.set_connected();
                self.set_state(ConnectionState::Connected);
                self.subscribe_all();
            }
            TransportEvent::Disconnected => {
                tracing::info!("Disconnected from core");
                self.queue.reset();
                self.status_tx.send_replace(None);
                self.set_state(ConnectionState::Disconnected);
            }
            TransportEvent::Line(line) => {
                tracing::debug!("RX: '{}'", line);
                self.handle_line(&line)?;
            }
        }
        Ok(())
    }

    fn handle_line(&self, line: &str) -> Result<()> {
        match self.router.route(line) {
            Routed::LoginRequired => {
                let Some(credentials) = &self.credentials else {
                    return self.halt(QsysError::CredentialsRequired);
                };
                tracing::info!("Core requires login, logging in as '{}'", credentials.username);
                self.queue.clear();
                self.set_state(ConnectionState::AwaitingLogin);
                let login = Command::Login {
                    username: credentials.username.clone(),
                    password: credentials.password.clone(),
                };
                if let Err(e) = login.validate().and_then(|()| self.queue.enqueue(login)) {
                    tracing::warn!("Failed to send login: {}", e);
                }
            }
            Routed::LoginSuccess => {
                tracing::info!("Login accepted");
                self.subscribe_all();
            }
            Routed::LoginFailed => return self.halt(QsysError::LoginFailed),
            Routed::Status(status) => {
                tracing::info!(
                    "Core status: design '{}' primary={} active={}",
                    status.design_name,
                    status.is_primary,
                    status.is_active
                );
                self.status_tx.send_replace(Some(status));
            }
            Routed::Unroutable { tag } => {
                tracing::debug!("{}", QsysError::UnroutableNotification(tag));
            }
            Routed::Empty
            | Routed::Failed
            | Routed::HeartbeatReply
            | Routed::Delivered { .. }
            | Routed::Ignored => {}
        }
        Ok(())
    }

    /// Process events until the transport goes away, a stop is requested,
    /// or the session fails.
    pub async fn run(self, mut events: mpsc::Receiver<TransportEvent>, mut stop_rx: watch::Receiver<bool>) -> Result<()> {
        let result = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_event(event) {
                            break Err(e);
                        }
                    }
                    None => break Ok(()),
                },
                _ = stop_rx.changed() => break Ok(()),
            }
        };

        self.queue.reset();
        self.set_state(ConnectionState::Disconnected);
        tracing::debug!("Engine stopped");
        result
    }
}
