//! Rust library for controlling QSC Q-Sys cores
//!
//! This library speaks the Q-Sys external control protocol (ECP) over TCP and
//! keeps a set of configured control points in sync with the core. It
//! supports:
//!
//! - Level blocks: volume (position or absolute) and mute
//! - VoIP/POTS dialers: dialing, keypad, DND and auto-answer
//! - PTZ cameras: movement, privacy and snapshot presets
//! - DSP snapshot presets
//! - Change group subscriptions rebuilt on every (re)connect
//! - Heartbeat supervision and automatic resubscription
//! - Login for cores with access control enabled
//!
//! # Quick Start
//!
//! ```no_run
//! use qsys_control::{ConnectionState, DspConfig, LevelFeedback, QsysClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DspConfig::from_json(r#"{
//!         "host": "192.168.1.50",
//!         "levelControlBlocks": {
//!             "program": {
//!                 "label": "Program",
//!                 "levelInstanceTag": "PGM_GAIN",
//!                 "muteInstanceTag": "PGM_MUTE",
//!                 "hasLevel": true,
//!                 "hasMute": true
//!             }
//!         }
//!     }"#)?;
//!
//!     let client = QsysClient::connect(config).await?;
//!
//!     // Wait for the change groups to be built
//!     let mut state = client.watch_connection_state();
//!     state.wait_for(|s| *s == ConnectionState::Subscribed).await?;
//!
//!     if let Some(program) = client.level("program") {
//!         program.mute_off()?;
//!         program.set_volume(32_768)?;
//!
//!         let mut updates = program.subscribe();
//!         while let Ok(update) = updates.recv().await {
//!             match update {
//!                 LevelFeedback::Volume(v) => println!("Volume: {}", v),
//!                 LevelFeedback::Mute(m) => println!("Muted: {}", m),
//!             }
//!         }
//!     }
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Custom Transports
//!
//! Anything implementing [`Transport`] can carry the protocol, for example a
//! serial bridge or an in-memory fake for tests:
//!
//! ```no_run
//! use qsys_control::{DspConfig, QsysClient, TcpTransport, DEFAULT_PORT};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (transport, events) = TcpTransport::spawn("192.168.1.50", DEFAULT_PORT);
//!     let client = QsysClient::with_transport(DspConfig::default(), transport, events)?;
//!     client.request_status()?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Client**: Builds control points from configuration and owns the session
//! - **Engine**: Connection lifecycle, login and inbound dispatch
//! - **Subscription / Heartbeat**: Change group lifecycle and liveness probes
//! - **Router / Registry**: Maps change notifications to control points
//! - **Queue**: Bounded outbound command queue with a single writer
//! - **Transport**: Line-oriented TCP link with reconnect
//! - **Protocol / Parser**: ECP commands, replies and tokenization
//! - **Level / Dialer / Camera**: Control point implementations

mod camera;
mod client;
mod config;
mod dialer;
mod engine;
mod error;
mod feedback;
mod heartbeat;
mod level;
mod parser;
mod protocol;
mod queue;
mod registry;
mod router;
mod subscription;
mod transport;
mod types;

// Public exports
pub use camera::{Camera, CameraFeedback};
pub use client::QsysClient;
pub use config::{
    CameraConfig, CameraPresetConfig, Credentials, DialerConfig, DspConfig, HeartbeatConfig,
    LevelControlBlockConfig, PresetConfig,
};
pub use dialer::{Dialer, DialerFeedback, DialerState};
pub use engine::Engine;
pub use error::{QsysError, Result};
pub use feedback::FeedbackReceiver;
pub use heartbeat::{HeartbeatMonitor, HeartbeatStatus};
pub use level::{LevelControl, LevelFeedback, LevelType};
pub use parser::{quote, tokenize};
pub use protocol::{ChangeNotification, Command, Message};
pub use queue::{CommandQueue, CommandSender, QueuedCommand, QUEUE_CAPACITY};
pub use registry::{ControlPoint, ControlPointKind, Registry, TagBinding, TagRole};
pub use router::{Routed, Router};
pub use subscription::{ChangeGroups, SubscriptionManager};
pub use transport::{TcpTransport, Transport, TransportEvent, DEFAULT_PORT};
pub use types::{
    CameraPreset, ChangeGroupId, ConnectionState, CoreStatus, DspPreset, KeypadKey, PtzControl,
    Tag, LEVEL_FULL_SCALE,
};
