use thiserror::Error;

/// Result type for Q-Sys operations
pub type Result<T> = std::result::Result<T, QsysError>;

/// Errors that can occur when talking to a Q-Sys core
#[derive(Error, Debug)]
pub enum QsysError {
    /// A received line could not be split into fields
    #[error("Malformed line: {reason}")]
    MalformedLine {
        /// What was wrong with the line
        reason: String,
    },

    /// The outbound command queue is at capacity and the command was dropped
    #[error("Command queue full, dropped: {line}")]
    QueueFull {
        /// The dropped command line
        line: String,
    },

    /// A change notification named a tag no control point owns
    #[error("No control point owns tag: {0}")]
    UnroutableNotification(String),

    /// The core asked for a login but no credentials are configured
    #[error("Core requires login but no credentials are configured")]
    CredentialsRequired,

    /// The core rejected the configured credentials
    #[error("Core rejected the configured credentials")]
    LoginFailed,

    /// Too many heartbeat probes went unanswered
    #[error("Heartbeat missed {misses} times, subscriptions presumed lost")]
    HeartbeatLost {
        /// Consecutive unanswered probes
        misses: u32,
    },

    /// Two control points claim the same tag
    #[error("Tag '{tag}' is already owned by control point '{owner}'")]
    DuplicateTag {
        /// The contested tag
        tag: String,
        /// Key of the control point that registered it first
        owner: String,
    },

    /// No control point with the given key exists
    #[error("Unknown control point: {0}")]
    UnknownControlPoint(String),

    /// No preset with the given name or number exists
    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    /// A value could not be interpreted
    #[error("Invalid value for '{tag}': {value}")]
    InvalidValue {
        /// Tag the value belongs to
        tag: String,
        /// The offending value
        value: String,
    },

    /// The transport has no open connection
    #[error("Not connected")]
    NotConnected,

    /// Connection was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl QsysError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        QsysError::MalformedLine {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_value(tag: &str, value: &str) -> Self {
        QsysError::InvalidValue {
            tag: tag.to_string(),
            value: value.to_string(),
        }
    }
}
