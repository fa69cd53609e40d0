use crate::camera::Camera;
use crate::config::DspConfig;
use crate::dialer::Dialer;
use crate::engine::Engine;
use crate::error::{QsysError, Result};
use crate::heartbeat::HeartbeatMonitor;
use crate::level::LevelControl;
use crate::protocol::Command;
use crate::queue::{CommandQueue, CommandSender, QUEUE_CAPACITY};
use crate::registry::Registry;
use crate::router::Router;
use crate::subscription::{ChangeGroups, SubscriptionManager};
use crate::transport::{TcpTransport, Transport, TransportEvent};
use crate::types::{ConnectionState, CoreStatus, DspPreset};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Client for one Q-Sys core
///
/// The `QsysClient` owns the connection to the core, the outbound command
/// queue and every configured control point. Control points are built once
/// from the configuration; the change groups are rebuilt on every connect.
pub struct QsysClient {
    levels: BTreeMap<String, Arc<LevelControl>>,
    dialers: BTreeMap<String, Arc<Dialer>>,
    cameras: BTreeMap<String, Arc<Camera>>,
    presets: Vec<DspPreset>,
    groups: ChangeGroups,
    commands: CommandSender,
    queue: Arc<CommandQueue>,
    heartbeat: Arc<HeartbeatMonitor>,
    transport: Arc<dyn Transport>,
    state_rx: watch::Receiver<ConnectionState>,
    status_rx: watch::Receiver<Option<CoreStatus>>,
    stop_tx: watch::Sender<bool>,
    engine: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl QsysClient {
    /// Connect to the core named in `config` over TCP
    ///
    /// Returns as soon as the client is built; the connection is made (and
    /// remade) in the background. Watch [`QsysClient::connection_state`] to
    /// know when the core is subscribed.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use qsys_control::{DspConfig, QsysClient};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let config = DspConfig::from_json(&std::fs::read_to_string("dsp.json")?)?;
    ///     let client = QsysClient::connect(config).await?;
    ///     if let Some(level) = client.level("fader-1") {
    ///         level.set_volume(40_000)?;
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(config: DspConfig) -> Result<Self> {
        config.heartbeat.validate()?;
        let (transport, events) = TcpTransport::spawn(config.host.clone(), config.port);
        Self::with_transport(config, transport, events)
    }

    /// Build a client on top of any transport
    ///
    /// `events` must be the event receiver belonging to `transport`. Must be
    /// called from within a tokio runtime.
    pub fn with_transport(
        config: DspConfig,
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Result<Self> {
        config.heartbeat.validate()?;
        let config = config.prefixed();
        let queue = Arc::new(CommandQueue::new(QUEUE_CAPACITY));
        let commands = CommandSender::new(queue.clone());

        let mut registry = Registry::new();

        let mut levels = BTreeMap::new();
        for (key, block) in &config.level_control_blocks {
            if block.disabled {
                tracing::debug!("Skipping disabled level block '{}'", key);
                continue;
            }
            let level = Arc::new(LevelControl::new(key.clone(), block, commands.clone()));
            registry.register(level.clone())?;
            levels.insert(key.clone(), level);
        }

        let mut dialers = BTreeMap::new();
        for (key, block) in &config.dialer_control_blocks {
            let dialer = Arc::new(Dialer::new(key.clone(), block, commands.clone()));
            registry.register(dialer.clone())?;
            dialers.insert(key.clone(), dialer);
        }

        let mut cameras = BTreeMap::new();
        for (key, block) in &config.camera_control_blocks {
            let camera = Arc::new(Camera::new(key.clone(), block, commands.clone()));
            registry.register(camera.clone())?;
            cameras.insert(key.clone(), camera);
        }

        let presets = config
            .presets
            .iter()
            .map(|(key, preset)| DspPreset {
                key: key.clone(),
                label: preset.label.clone(),
                preset: preset.preset.clone(),
            })
            .collect();

        tracing::info!(
            "Configured {} levels, {} dialers, {} cameras for {}:{}",
            levels.len(),
            dialers.len(),
            cameras.len(),
            config.host,
            config.port
        );

        let registry = Arc::new(registry);
        let groups = ChangeGroups::default();
        let (stop_tx, stop_rx) = watch::channel(false);

        let heartbeat = Arc::new(HeartbeatMonitor::new(
            config.heartbeat.clone(),
            groups.heartbeat,
            queue.clone(),
            stop_rx.clone(),
        ));
        let subscriptions = Arc::new(SubscriptionManager::new(
            registry.clone(),
            queue.clone(),
            groups.clone(),
            heartbeat.clone(),
        ));
        let engine = Engine::new(
            queue.clone(),
            Router::new(registry, heartbeat.clone()),
            subscriptions,
            transport.clone(),
            config.credentials.clone(),
        );
        let state_rx = engine.state();
        let status_rx = engine.status();

        tokio::spawn(queue.clone().run_writer(transport.clone(), stop_rx.clone()));
        let engine = tokio::spawn(async move {
            let result = engine.run(events, stop_rx).await;
            if let Err(e) = &result {
                tracing::error!("Session ended: {}", e);
            }
            result
        });

        Ok(Self {
            levels,
            dialers,
            cameras,
            presets,
            groups,
            commands,
            queue,
            heartbeat,
            transport,
            state_rx,
            status_rx,
            stop_tx,
            engine: Mutex::new(Some(engine)),
        })
    }

    pub fn level(&self, key: &str) -> Option<Arc<LevelControl>> {
        self.levels.get(key).cloned()
    }

    pub fn levels(&self) -> impl Iterator<Item = (&str, &Arc<LevelControl>)> {
        self.levels.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn dialer(&self, key: &str) -> Option<Arc<Dialer>> {
        self.dialers.get(key).cloned()
    }

    pub fn dialers(&self) -> impl Iterator<Item = (&str, &Arc<Dialer>)> {
        self.dialers.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn camera(&self, key: &str) -> Option<Arc<Camera>> {
        self.cameras.get(key).cloned()
    }

    pub fn cameras(&self) -> impl Iterator<Item = (&str, &Arc<Camera>)> {
        self.cameras.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Configured DSP presets, in key order
    pub fn presets(&self) -> &[DspPreset] {
        &self.presets
    }

    /// Load the preset at `index` in [`QsysClient::presets`]
    pub fn run_preset(&self, index: usize) -> Result<()> {
        let preset = self
            .presets
            .get(index)
            .ok_or_else(|| QsysError::UnknownPreset(index.to_string()))?;
        self.load_preset(preset)
    }

    /// Load the preset configured under `key`
    pub fn run_preset_named(&self, key: &str) -> Result<()> {
        let preset = self
            .presets
            .iter()
            .find(|p| p.key == key)
            .ok_or_else(|| QsysError::UnknownPreset(key.to_string()))?;
        self.load_preset(preset)
    }

    fn load_preset(&self, preset: &DspPreset) -> Result<()> {
        tracing::info!("Running preset '{}' ({})", preset.label, preset.preset);
        self.commands.send(Command::snapshot_from_preset(&preset.preset)?)?;
        self.commands.send(Command::ChangeGroupPoll(self.groups.feedback))
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every connection state change
    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Last status reported by the core, cleared on disconnect
    pub fn core_status(&self) -> Option<CoreStatus> {
        self.status_rx.borrow().clone()
    }

    /// Ask the core for its status; the reply updates [`QsysClient::core_status`]
    pub fn request_status(&self) -> Result<()> {
        self.commands.send(Command::StatusGet)
    }

    /// Queue an arbitrary protocol line
    pub fn send_raw(&self, line: impl Into<String>) -> Result<()> {
        self.commands.send(Command::Raw(line.into()))
    }

    /// Commands waiting to be written
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// Consecutive unanswered heartbeat probes
    pub fn heartbeat_misses(&self) -> u32 {
        self.heartbeat.misses()
    }

    /// Stop the session and close the transport
    ///
    /// Returns the error that ended the session, if any.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down");
        let _ = self.stop_tx.send(true);
        self.transport.close();

        let engine = self
            .engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match engine {
            Some(handle) => handle
                .await
                .map_err(|e| QsysError::ChannelError(format!("Engine task failed: {}", e)))?,
            None => Ok(()),
        }
    }
}

impl Drop for QsysClient {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
        self.transport.close();
    }
}
