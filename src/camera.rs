use crate::config::CameraConfig;
use crate::error::{QsysError, Result};
use crate::feedback::{FeedbackReceiver, FeedbackSender};
use crate::protocol::Command;
use crate::queue::CommandSender;
use crate::registry::{bind, ControlPoint, ControlPointKind, TagBinding, TagRole};
use crate::types::{CameraPreset, PtzControl};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Camera feedback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraFeedback {
    Online(bool),
    /// A preset label changed; re-read [`Camera::presets`]
    PresetsChanged,
}

#[derive(Debug, Default)]
struct CameraState {
    online: bool,
    /// Tag of the last movement started, released by `PtzControl::Stop`
    last_move: Option<String>,
    presets: Vec<CameraPreset>,
}

/// PTZ camera driven through the core
pub struct Camera {
    key: String,
    bindings: Vec<TagBinding>,
    commands: CommandSender,
    state: Mutex<CameraState>,
    feedback: FeedbackSender<CameraFeedback>,
}

impl Camera {
    pub fn new(key: impl Into<String>, config: &CameraConfig, commands: CommandSender) -> Self {
        let key = key.into();

        let mut bindings = Vec::new();
        bind(&mut bindings, &config.pan_left_tag, TagRole::PanLeft, false);
        bind(&mut bindings, &config.pan_right_tag, TagRole::PanRight, false);
        bind(&mut bindings, &config.pan_speed_tag, TagRole::PanSpeed, false);
        bind(&mut bindings, &config.tilt_up_tag, TagRole::TiltUp, false);
        bind(&mut bindings, &config.tilt_down_tag, TagRole::TiltDown, false);
        bind(&mut bindings, &config.tilt_speed_tag, TagRole::TiltSpeed, false);
        bind(&mut bindings, &config.zoom_in_tag, TagRole::ZoomIn, false);
        bind(&mut bindings, &config.zoom_out_tag, TagRole::ZoomOut, false);
        bind(&mut bindings, &config.zoom_speed_tag, TagRole::ZoomSpeed, false);
        bind(&mut bindings, &config.home_tag, TagRole::Home, false);
        bind(&mut bindings, &config.preset_bank_tag, TagRole::PresetBank, false);
        bind(&mut bindings, &config.privacy, TagRole::Privacy, false);
        bind(&mut bindings, &config.online_status, TagRole::OnlineStatus, true);

        let presets = config
            .presets
            .values()
            .enumerate()
            .map(|(i, p)| CameraPreset {
                id: i + 1,
                label: p.label.clone(),
                bank: p.bank.clone(),
                number: p.number,
            })
            .collect();

        Self {
            commands: commands.labelled(&key),
            key,
            bindings,
            state: Mutex::new(CameraState {
                presets,
                ..Default::default()
            }),
            feedback: FeedbackSender::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, CameraState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_online(&self) -> bool {
        self.state().online
    }

    pub fn subscribe(&self) -> FeedbackReceiver<CameraFeedback> {
        self.feedback.subscribe()
    }

    fn tag(&self, role: TagRole) -> Option<&str> {
        self.bindings
            .iter()
            .find(|b| b.role == role)
            .map(|b| b.tag.as_str())
    }

    /// Start a movement, or release the last one on `Stop`
    ///
    /// Controls without a configured tag are ignored.
    pub fn move_camera(&self, control: PtzControl) -> Result<()> {
        let role = match control {
            PtzControl::Stop => {
                let last = self.state().last_move.clone();
                return match last {
                    Some(tag) => self.commands.send(Command::set_bool(tag, false)),
                    None => Ok(()),
                };
            }
            PtzControl::PanLeft => TagRole::PanLeft,
            PtzControl::PanRight => TagRole::PanRight,
            PtzControl::TiltUp => TagRole::TiltUp,
            PtzControl::TiltDown => TagRole::TiltDown,
            PtzControl::ZoomIn => TagRole::ZoomIn,
            PtzControl::ZoomOut => TagRole::ZoomOut,
            PtzControl::Home => TagRole::Home,
        };

        let Some(tag) = self.tag(role) else {
            tracing::debug!("{} has no tag for {:?}", self.key, control);
            return Ok(());
        };
        self.state().last_move = Some(tag.to_string());
        self.commands.send(Command::set_bool(tag, true))
    }

    pub fn privacy_on(&self) -> Result<()> {
        self.set_privacy(true)
    }

    pub fn privacy_off(&self) -> Result<()> {
        self.set_privacy(false)
    }

    fn set_privacy(&self, on: bool) -> Result<()> {
        let tag = self
            .tag(TagRole::Privacy)
            .ok_or_else(|| QsysError::UnknownControlPoint(format!("{} has no privacy tag", self.key)))?;
        self.commands.send(Command::set_bool(tag, on))
    }

    /// Configured presets, numbered from 1 in key order
    pub fn presets(&self) -> Vec<CameraPreset> {
        self.state().presets.clone()
    }

    fn preset(&self, id: usize) -> Result<CameraPreset> {
        id.checked_sub(1)
            .and_then(|i| self.state().presets.get(i).cloned())
            .ok_or_else(|| QsysError::UnknownPreset(format!("{} preset {}", self.key, id)))
    }

    /// Recall preset `id` (1-based)
    pub fn recall_preset(&self, id: usize) -> Result<()> {
        tracing::debug!("{} recall camera preset {}", self.key, id);
        let preset = self.preset(id)?;
        self.commands.send(Command::SnapshotLoad {
            bank: preset.bank,
            number: Some(preset.number),
            ramp: Some("0".to_string()),
        })
    }

    /// Store the current position in preset `id` (1-based)
    pub fn save_preset(&self, id: usize) -> Result<()> {
        let preset = self.preset(id)?;
        self.commands.send(Command::SnapshotSave {
            bank: preset.bank,
            number: preset.number,
        })
    }

    /// Rename preset `id` (1-based); empty or unchanged labels are ignored
    pub fn rename_preset(&self, id: usize, label: &str) -> Result<()> {
        {
            let mut state = self.state();
            let index = id.checked_sub(1).unwrap_or(usize::MAX);
            let preset = state
                .presets
                .get_mut(index)
                .ok_or_else(|| QsysError::UnknownPreset(format!("{} preset {}", self.key, id)))?;
            if label.is_empty() || preset.label == label {
                return Ok(());
            }
            preset.label = label.to_string();
        }
        self.feedback.publish(CameraFeedback::PresetsChanged);
        Ok(())
    }

    /// Save preset `id` and give it a new label
    pub fn store_preset(&self, id: usize, label: &str) -> Result<()> {
        self.save_preset(id)?;
        self.rename_preset(id, label)
    }
}

impl ControlPoint for Camera {
    fn key(&self) -> &str {
        &self.key
    }

    fn kind(&self) -> ControlPointKind {
        ControlPointKind::Camera
    }

    fn tags(&self) -> &[TagBinding] {
        &self.bindings
    }

    fn on_change(&self, tag: &str, primary: &str, _secondary: Option<&str>) -> Result<()> {
        tracing::debug!("CameraOnline {} Response: '{}'", tag, primary);
        let online = match primary {
            "true" => true,
            "false" => false,
            _ => return Ok(()),
        };
        self.state().online = online;
        self.feedback.publish(CameraFeedback::Online(online));
        Ok(())
    }
}
