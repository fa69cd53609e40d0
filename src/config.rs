//! Device configuration.
//!
//! Mirrors the properties block of the device configuration file:
//!
//! ```json
//! {
//!     "host": "10.0.0.20",
//!     "port": 1702,
//!     "prefix": "",
//!     "credentials": { "username": "admin", "password": "1234" },
//!     "levelControlBlocks": {
//!         "fader-1": {
//!             "label": "Program",
//!             "levelInstanceTag": "PGM_VOL",
//!             "muteInstanceTag": "PGM_MUTE",
//!             "hasLevel": true,
//!             "hasMute": true
//!         }
//!     },
//!     "presets": { "preset-1": { "label": "Default", "preset": "Room 1" } },
//!     "dialerControlBlocks": {},
//!     "cameraControlBlocks": {}
//! }
//! ```

use crate::error::{QsysError, Result};
use crate::transport::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Top level device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DspConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Prepended to every tag, preset and key
    #[serde(default)]
    pub prefix: String,

    #[serde(default)]
    pub credentials: Option<Credentials>,

    #[serde(default)]
    pub level_control_blocks: BTreeMap<String, LevelControlBlockConfig>,

    #[serde(default)]
    pub dialer_control_blocks: BTreeMap<String, DialerConfig>,

    #[serde(default)]
    pub camera_control_blocks: BTreeMap<String, CameraConfig>,

    #[serde(default)]
    pub presets: BTreeMap<String, PresetConfig>,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for DspConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            prefix: String::new(),
            credentials: None,
            level_control_blocks: BTreeMap::new(),
            dialer_control_blocks: BTreeMap::new(),
            camera_control_blocks: BTreeMap::new(),
            presets: BTreeMap::new(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl DspConfig {
    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.heartbeat.validate()?;
        Ok(config)
    }

    /// Return a copy with the prefix applied to every key, tag and preset
    pub fn prefixed(&self) -> Self {
        let mut config = self.clone();
        let prefix = config.prefix.clone();
        if prefix.is_empty() {
            return config;
        }

        config.level_control_blocks = std::mem::take(&mut config.level_control_blocks)
            .into_iter()
            .map(|(key, mut block)| {
                prefix_tag(&prefix, &mut block.level_instance_tag);
                prefix_tag(&prefix, &mut block.mute_instance_tag);
                (format!("{}{}", prefix, key), block)
            })
            .collect();

        config.dialer_control_blocks = std::mem::take(&mut config.dialer_control_blocks)
            .into_iter()
            .map(|(key, mut dialer)| {
                for tag in dialer.tag_fields_mut() {
                    prefix_tag(&prefix, tag);
                }
                (format!("{}{}", prefix, key), dialer)
            })
            .collect();

        for camera in config.camera_control_blocks.values_mut() {
            for tag in camera.tag_fields_mut() {
                prefix_tag(&prefix, tag);
            }
            for preset in camera.presets.values_mut() {
                preset.bank = format!("{}{}", prefix, preset.bank);
            }
        }

        for preset in config.presets.values_mut() {
            preset.preset = format!("{}{}", prefix, preset.preset);
        }

        config
    }
}

fn prefix_tag(prefix: &str, tag: &mut Option<String>) {
    if let Some(tag) = tag.as_mut() {
        *tag = format!("{}{}", prefix, tag);
    }
}

/// Login credentials for cores with access control enabled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Heartbeat timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatConfig {
    /// Time between probes
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Time allowed for a probe reply before the probe counts as missed
    #[serde(default = "default_reply_grace_ms")]
    pub reply_grace_ms: u64,

    /// Every this many consecutive misses triggers a resubscribe
    #[serde(default = "default_miss_threshold")]
    pub miss_threshold: u32,
}

fn default_interval_ms() -> u64 {
    20_000
}

fn default_reply_grace_ms() -> u64 {
    1_000
}

fn default_miss_threshold() -> u32 {
    5
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            reply_grace_ms: default_reply_grace_ms(),
            miss_threshold: default_miss_threshold(),
        }
    }
}

impl HeartbeatConfig {
    /// Reject timings the probe loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(QsysError::invalid_value("heartbeat.intervalMs", "0"));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn reply_grace(&self) -> Duration {
        Duration::from_millis(self.reply_grace_ms)
    }
}

/// Fader block with optional level and mute controls
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelControlBlockConfig {
    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub level_instance_tag: Option<String>,

    #[serde(default)]
    pub mute_instance_tag: Option<String>,

    /// Disabled blocks are not created
    #[serde(default)]
    pub disabled: bool,

    #[serde(default)]
    pub has_level: bool,

    #[serde(default)]
    pub has_mute: bool,

    #[serde(default)]
    pub is_mic: bool,

    /// Use the raw control value instead of the normalized position
    #[serde(default)]
    pub use_absolute_value: bool,

    /// Unmute when the level is raised
    #[serde(default)]
    pub unmute_on_vol_change: bool,
}

/// Snapshot preset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetConfig {
    #[serde(default)]
    pub label: String,

    /// Snapshot bank followed by the snapshot number, e.g. `Room 1`
    pub preset: String,
}

/// VoIP/POTS dialer block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialerConfig {
    /// Clear the dial string when a call ends
    #[serde(default, alias = "ClearOnHangup")]
    pub clear_on_hangup: bool,

    #[serde(default)]
    pub incoming_call_ringer_tag: Option<String>,
    #[serde(default)]
    pub dial_string_tag: Option<String>,
    #[serde(default)]
    pub disconnect_tag: Option<String>,
    #[serde(default)]
    pub connect_tag: Option<String>,
    #[serde(default)]
    pub call_status_tag: Option<String>,
    #[serde(default)]
    pub hook_status_tag: Option<String>,
    #[serde(default)]
    pub do_not_disturb_tag: Option<String>,
    #[serde(default)]
    pub auto_answer_tag: Option<String>,

    #[serde(default)]
    pub keypad_backspace_tag: Option<String>,
    #[serde(default)]
    pub keypad_clear_tag: Option<String>,
    #[serde(default)]
    pub keypad0_tag: Option<String>,
    #[serde(default)]
    pub keypad1_tag: Option<String>,
    #[serde(default)]
    pub keypad2_tag: Option<String>,
    #[serde(default)]
    pub keypad3_tag: Option<String>,
    #[serde(default)]
    pub keypad4_tag: Option<String>,
    #[serde(default)]
    pub keypad5_tag: Option<String>,
    #[serde(default)]
    pub keypad6_tag: Option<String>,
    #[serde(default)]
    pub keypad7_tag: Option<String>,
    #[serde(default)]
    pub keypad8_tag: Option<String>,
    #[serde(default)]
    pub keypad9_tag: Option<String>,
    #[serde(default)]
    pub keypad_pound_tag: Option<String>,
    #[serde(default)]
    pub keypad_star_tag: Option<String>,
}

impl DialerConfig {
    fn tag_fields_mut(&mut self) -> [&mut Option<String>; 22] {
        [
            &mut self.incoming_call_ringer_tag,
            &mut self.dial_string_tag,
            &mut self.disconnect_tag,
            &mut self.connect_tag,
            &mut self.call_status_tag,
            &mut self.hook_status_tag,
            &mut self.do_not_disturb_tag,
            &mut self.auto_answer_tag,
            &mut self.keypad_backspace_tag,
            &mut self.keypad_clear_tag,
            &mut self.keypad0_tag,
            &mut self.keypad1_tag,
            &mut self.keypad2_tag,
            &mut self.keypad3_tag,
            &mut self.keypad4_tag,
            &mut self.keypad5_tag,
            &mut self.keypad6_tag,
            &mut self.keypad7_tag,
            &mut self.keypad8_tag,
            &mut self.keypad9_tag,
            &mut self.keypad_pound_tag,
            &mut self.keypad_star_tag,
        ]
    }
}

/// Camera block driven through the core's PTZ controls
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraConfig {
    #[serde(default)]
    pub pan_left_tag: Option<String>,
    #[serde(default)]
    pub pan_right_tag: Option<String>,
    #[serde(default)]
    pub pan_speed_tag: Option<String>,
    #[serde(default)]
    pub tilt_up_tag: Option<String>,
    #[serde(default)]
    pub tilt_down_tag: Option<String>,
    #[serde(default)]
    pub tilt_speed_tag: Option<String>,
    #[serde(default)]
    pub zoom_in_tag: Option<String>,
    #[serde(default)]
    pub zoom_out_tag: Option<String>,
    #[serde(default)]
    pub zoom_speed_tag: Option<String>,
    #[serde(default)]
    pub home_tag: Option<String>,
    #[serde(default)]
    pub preset_bank_tag: Option<String>,
    #[serde(default)]
    pub privacy: Option<String>,
    #[serde(default)]
    pub online_status: Option<String>,

    #[serde(default)]
    pub presets: BTreeMap<String, CameraPresetConfig>,
}

impl CameraConfig {
    fn tag_fields_mut(&mut self) -> [&mut Option<String>; 13] {
        [
            &mut self.pan_left_tag,
            &mut self.pan_right_tag,
            &mut self.pan_speed_tag,
            &mut self.tilt_up_tag,
            &mut self.tilt_down_tag,
            &mut self.tilt_speed_tag,
            &mut self.zoom_in_tag,
            &mut self.zoom_out_tag,
            &mut self.zoom_speed_tag,
            &mut self.home_tag,
            &mut self.preset_bank_tag,
            &mut self.privacy,
            &mut self.online_status,
        ]
    }
}

/// Camera preset stored in a snapshot bank
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraPresetConfig {
    #[serde(default)]
    pub label: String,
    pub bank: String,
    pub number: u32,
}
