use serde::{Deserialize, Serialize};
use std::fmt;

/// Named control on the core
pub type Tag = String;

/// Change group identifier
pub type ChangeGroupId = u32;

/// Full-scale value used for level feedback and volume commands
pub const LEVEL_FULL_SCALE: u16 = u16::MAX;

/// Session state with the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No transport connection
    Disconnected,
    /// Transport is up, subscriptions not yet sent
    Connected,
    /// The core issued a login challenge and we are waiting for the outcome
    AwaitingLogin,
    /// Change groups have been (re)built
    Subscribed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::AwaitingLogin => "awaiting-login",
            ConnectionState::Subscribed => "subscribed",
        };
        f.write_str(name)
    }
}

/// Core status reported by `sr`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreStatus {
    /// Name of the running design
    pub design_name: String,

    /// Design code
    pub design_code: String,

    /// Whether this core is the primary of a redundant pair
    pub is_primary: bool,

    /// Whether this core is currently active
    pub is_active: bool,
}

/// Dialer keypad buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeypadKey {
    Num0,
    Num1,
    Num2,
    Num3,
    Num4,
    Num5,
    Num6,
    Num7,
    Num8,
    Num9,
    Star,
    Pound,
    Clear,
    Backspace,
}

impl KeypadKey {
    /// Map a DTMF digit to its keypad button
    pub fn from_dtmf(digit: char) -> Option<Self> {
        let key = match digit {
            '0' => KeypadKey::Num0,
            '1' => KeypadKey::Num1,
            '2' => KeypadKey::Num2,
            '3' => KeypadKey::Num3,
            '4' => KeypadKey::Num4,
            '5' => KeypadKey::Num5,
            '6' => KeypadKey::Num6,
            '7' => KeypadKey::Num7,
            '8' => KeypadKey::Num8,
            '9' => KeypadKey::Num9,
            '*' => KeypadKey::Star,
            '#' => KeypadKey::Pound,
            _ => return None,
        };
        Some(key)
    }
}

/// Camera pan/tilt/zoom actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PtzControl {
    Stop,
    PanLeft,
    PanRight,
    TiltUp,
    TiltDown,
    ZoomIn,
    ZoomOut,
    Home,
}

/// Camera preset as exposed to consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraPreset {
    /// 1-based position in the preset list
    pub id: usize,
    pub label: String,
    pub bank: String,
    pub number: u32,
}

/// Configured DSP snapshot preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DspPreset {
    pub key: String,
    pub label: String,

    /// Snapshot bank, optionally followed by the snapshot number
    pub preset: String,
}
