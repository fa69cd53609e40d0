use crate::config::LevelControlBlockConfig;
use crate::error::{QsysError, Result};
use crate::feedback::{FeedbackReceiver, FeedbackSender};
use crate::protocol::Command;
use crate::queue::CommandSender;
use crate::registry::{bind, ControlPoint, ControlPointKind, TagBinding, TagRole};
use crate::types::LEVEL_FULL_SCALE;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Interval between repeated steps while a volume button is held
const VOLUME_REPEAT_INTERVAL: Duration = Duration::from_millis(100);

/// Level control feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelFeedback {
    Mute(bool),
    /// Volume scaled to 0-65535
    Volume(u16),
}

/// Whether a level block is a speaker or microphone level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelType {
    Speaker,
    Microphone,
}

#[derive(Debug, Default)]
struct LevelState {
    muted: bool,
    volume: u16,
    mute_subscribed: bool,
    level_subscribed: bool,
}

/// Fader with optional level and mute controls
pub struct LevelControl {
    key: String,
    label: String,
    level_type: LevelType,
    level_tag: Option<String>,
    mute_tag: Option<String>,
    use_absolute_value: bool,
    unmute_on_volume_change: bool,
    bindings: Vec<TagBinding>,
    commands: CommandSender,
    state: Mutex<LevelState>,
    repeat: Mutex<Option<JoinHandle<()>>>,
    feedback: FeedbackSender<LevelFeedback>,
}

impl LevelControl {
    /// Build a level control from its block configuration
    ///
    /// Mute is watched before level, matching the subscription order of
    /// the block.
    pub fn new(key: impl Into<String>, config: &LevelControlBlockConfig, commands: CommandSender) -> Self {
        let key = key.into();
        let level_tag = config
            .level_instance_tag
            .clone()
            .filter(|t| config.has_level && !t.is_empty());
        let mute_tag = config
            .mute_instance_tag
            .clone()
            .filter(|t| config.has_mute && !t.is_empty());

        let mut bindings = Vec::new();
        bind(&mut bindings, &mute_tag, TagRole::Mute, true);
        bind(&mut bindings, &level_tag, TagRole::Level, true);

        tracing::debug!(
            "Adding LevelControl '{}' LevelTag: {:?} MuteTag: {:?}",
            key,
            level_tag,
            mute_tag
        );

        Self {
            commands: commands.labelled(&key),
            key,
            label: config.label.clone(),
            level_type: if config.is_mic {
                LevelType::Microphone
            } else {
                LevelType::Speaker
            },
            level_tag,
            mute_tag,
            use_absolute_value: config.use_absolute_value,
            unmute_on_volume_change: config.unmute_on_vol_change,
            bindings,
            state: Mutex::new(LevelState::default()),
            repeat: Mutex::new(None),
            feedback: FeedbackSender::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, LevelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn level_type(&self) -> LevelType {
        self.level_type
    }

    pub fn level_tag(&self) -> Option<&str> {
        self.level_tag.as_deref()
    }

    pub fn mute_tag(&self) -> Option<&str> {
        self.mute_tag.as_deref()
    }

    pub fn is_muted(&self) -> bool {
        self.state().muted
    }

    /// Last reported volume, scaled to 0-65535
    pub fn volume(&self) -> u16 {
        self.state().volume
    }

    /// Whether feedback has arrived for at least one subscribed control
    pub fn is_subscribed(&self) -> bool {
        let state = self.state();
        (self.mute_tag.is_some() && state.mute_subscribed)
            || (self.level_tag.is_some() && state.level_subscribed)
    }

    /// Subscribe to mute and volume feedback
    pub fn subscribe(&self) -> FeedbackReceiver<LevelFeedback> {
        self.feedback.subscribe()
    }

    fn level_tag_or_err(&self) -> Result<&str> {
        self.level_tag
            .as_deref()
            .ok_or_else(|| QsysError::UnknownControlPoint(format!("{} has no level control", self.key)))
    }

    fn mute_tag_or_err(&self) -> Result<&str> {
        self.mute_tag
            .as_deref()
            .ok_or_else(|| QsysError::UnknownControlPoint(format!("{} has no mute control", self.key)))
    }

    pub fn mute_on(&self) -> Result<()> {
        self.commands.send(Command::set_bool(self.mute_tag_or_err()?, true))
    }

    pub fn mute_off(&self) -> Result<()> {
        self.commands.send(Command::set_bool(self.mute_tag_or_err()?, false))
    }

    pub fn mute_toggle(&self) -> Result<()> {
        let muted = self.is_muted();
        self.commands.send(Command::set_bool(self.mute_tag_or_err()?, !muted))
    }

    /// Set the volume on a 0-65535 scale
    pub fn set_volume(&self, level: u16) -> Result<()> {
        tracing::debug!("{} volume: {}", self.key, level);
        self.unmute_for_volume_change()?;

        let tag = self.level_tag_or_err()?.to_string();
        let command = if self.use_absolute_value {
            Command::SetValue {
                tag,
                value: level.to_string(),
            }
        } else {
            Command::SetPosition {
                tag,
                position: f64::from(level) / f64::from(LEVEL_FULL_SCALE),
            }
        };
        self.commands.send(command)
    }

    /// Step the volume up; repeats while pressed
    pub fn volume_up(&self, pressed: bool) -> Result<()> {
        if pressed {
            self.unmute_for_volume_change()?;
        }
        self.ramp(pressed, Command::step_up)
    }

    /// Step the volume down; repeats while pressed
    pub fn volume_down(&self, pressed: bool) -> Result<()> {
        self.ramp(pressed, Command::step_down)
    }

    /// Request the current value of every control
    pub fn poll(&self) -> Result<()> {
        for tag in [&self.level_tag, &self.mute_tag].into_iter().flatten() {
            self.commands.send(Command::Get(tag.clone()))?;
        }
        Ok(())
    }

    fn unmute_for_volume_change(&self) -> Result<()> {
        if self.unmute_on_volume_change && self.mute_tag.is_some() && self.is_muted() {
            self.mute_off()?;
        }
        Ok(())
    }

    fn ramp(&self, pressed: bool, step: fn(String) -> Command) -> Result<()> {
        let mut repeat = self.repeat.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = repeat.take() {
            handle.abort();
        }
        if !pressed {
            return Ok(());
        }

        let tag = self.level_tag_or_err()?.to_string();
        self.commands.send(step(tag.clone()))?;

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime for volume repeat on '{}', stepping once", self.key);
            return Ok(());
        };
        let commands = self.commands.clone();
        *repeat = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(VOLUME_REPEAT_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = commands.send(step(tag.clone())) {
                    tracing::debug!("Volume repeat stopped: {}", e);
                    break;
                }
            }
        }));
        Ok(())
    }

    fn apply_mute(&self, tag: &str, value: &str) -> Result<()> {
        let muted = match value {
            "true" | "muted" | "1" => true,
            "false" | "unmuted" | "0" => false,
            _ => return Err(QsysError::invalid_value(tag, value)),
        };
        {
            let mut state = self.state();
            state.muted = muted;
            state.mute_subscribed = true;
        }
        self.feedback.publish(LevelFeedback::Mute(muted));
        Ok(())
    }

    fn apply_level(&self, tag: &str, position: &str, absolute: Option<&str>) -> Result<()> {
        let volume = if self.use_absolute_value {
            let raw = absolute.ok_or_else(|| QsysError::invalid_value(tag, position))?;
            let value: f64 = raw.parse().map_err(|_| QsysError::invalid_value(tag, raw))?;
            value.clamp(0.0, f64::from(LEVEL_FULL_SCALE)) as u16
        } else {
            let value: f64 = position
                .parse()
                .map_err(|_| QsysError::invalid_value(tag, position))?;
            (value.clamp(0.0, 1.0) * f64::from(LEVEL_FULL_SCALE)) as u16
        };

        tracing::debug!("Level {} VolumeLevel: '{}'", tag, volume);
        {
            let mut state = self.state();
            state.volume = volume;
            state.level_subscribed = true;
        }
        self.feedback.publish(LevelFeedback::Volume(volume));
        Ok(())
    }
}

impl ControlPoint for LevelControl {
    fn key(&self) -> &str {
        &self.key
    }

    fn kind(&self) -> ControlPointKind {
        ControlPointKind::Level
    }

    fn tags(&self) -> &[TagBinding] {
        &self.bindings
    }

    fn on_change(&self, tag: &str, primary: &str, secondary: Option<&str>) -> Result<()> {
        tracing::debug!("Level {} Response: '{}'", tag, primary);
        if self.mute_tag.as_deref().is_some_and(|t| t.eq_ignore_ascii_case(tag)) {
            self.apply_mute(tag, primary)
        } else if self.level_tag.as_deref().is_some_and(|t| t.eq_ignore_ascii_case(tag)) {
            self.apply_level(tag, primary, secondary)
        } else {
            Ok(())
        }
    }

    fn refresh(&self) -> Result<()> {
        self.poll()
    }
}

impl Drop for LevelControl {
    fn drop(&mut self) {
        if let Some(handle) = self.repeat.get_mut().ok().and_then(Option::take) {
            handle.abort();
        }
    }
}
