use crate::error::{QsysError, Result};
use crate::parser::{quote, tokenize};
use crate::types::{ChangeGroupId, CoreStatus};
use std::fmt;

/// Outbound command
///
/// Each variant serializes to exactly one protocol line without terminator.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `cgc <id>`
    ChangeGroupCreate(ChangeGroupId),
    /// `cgd <id>`
    ChangeGroupDestroy(ChangeGroupId),
    /// `cga <id> "<tag>"`
    ChangeGroupAdd { group: ChangeGroupId, tag: String },
    /// `cgp <id>`, answered by a line ending in `cgpa`
    ChangeGroupPoll(ChangeGroupId),
    /// `cgsna <id> <ms>`
    ChangeGroupAutoPoll { group: ChangeGroupId, interval_ms: u64 },
    /// `csv "<tag>" <value>`
    SetValue { tag: String, value: String },
    /// `csp "<tag>" <position>`, position normalized to 0.0-1.0
    SetPosition { tag: String, position: f64 },
    /// `css "<tag>" <text>`, also used for `++`/`--` steps
    SetString { tag: String, value: String },
    /// `ct "<tag>"`
    Trigger(String),
    /// `cg "<tag>"`
    Get(String),
    /// `ssl "<bank>" <number> [ramp]`
    SnapshotLoad {
        bank: String,
        number: Option<u32>,
        ramp: Option<String>,
    },
    /// `sss "<bank>" <number>`
    SnapshotSave { bank: String, number: u32 },
    /// `sg`
    StatusGet,
    /// `login "<user>" "<pass>"`
    Login { username: String, password: String },
    /// Any other line, sent verbatim
    Raw(String),
}

impl Command {
    /// `css "<tag>" ++`
    pub fn step_up(tag: impl Into<String>) -> Self {
        Command::SetString {
            tag: tag.into(),
            value: "++".to_string(),
        }
    }

    /// `css "<tag>" --`
    pub fn step_down(tag: impl Into<String>) -> Self {
        Command::SetString {
            tag: tag.into(),
            value: "--".to_string(),
        }
    }

    /// `csv "<tag>" 1` or `csv "<tag>" 0`
    pub fn set_bool(tag: impl Into<String>, on: bool) -> Self {
        Command::SetValue {
            tag: tag.into(),
            value: if on { "1" } else { "0" }.to_string(),
        }
    }

    /// Build a snapshot load from a preset definition such as `BankA 3`
    /// or `"Bank A" 3 0`.
    pub fn snapshot_from_preset(preset: &str) -> Result<Self> {
        let fields = tokenize(preset)?;
        let mut fields = fields.into_iter();
        let bank = fields
            .next()
            .ok_or_else(|| QsysError::invalid_value("preset", preset))?;
        let number = fields
            .next()
            .map(|n| n.parse::<u32>().map_err(|_| QsysError::invalid_value(&bank, &n)))
            .transpose()?;
        let ramp = fields.next();

        Ok(Command::SnapshotLoad { bank, number, ramp })
    }

    /// Check that the command renders as exactly one well-formed line
    ///
    /// Quoted names may not contain a double quote or a line break, and no
    /// other field may contain a line break.
    pub fn validate(&self) -> Result<()> {
        let (quoted, plain): (Vec<&str>, Vec<&str>) = match self {
            Command::ChangeGroupAdd { tag, .. }
            | Command::Trigger(tag)
            | Command::Get(tag)
            | Command::SetPosition { tag, .. } => (vec![tag.as_str()], vec![]),
            Command::SetValue { tag, value } | Command::SetString { tag, value } => {
                (vec![tag.as_str()], vec![value.as_str()])
            }
            Command::SnapshotLoad { bank, ramp, .. } => {
                (vec![bank.as_str()], ramp.as_deref().into_iter().collect())
            }
            Command::SnapshotSave { bank, .. } => (vec![bank.as_str()], vec![]),
            Command::Login { username, password } => {
                (vec![username.as_str(), password.as_str()], vec![])
            }
            Command::Raw(line) => (vec![], vec![line.as_str()]),
            Command::ChangeGroupCreate(_)
            | Command::ChangeGroupDestroy(_)
            | Command::ChangeGroupPoll(_)
            | Command::ChangeGroupAutoPoll { .. }
            | Command::StatusGet => (vec![], vec![]),
        };

        if let Some(name) = quoted.into_iter().find(|n| n.contains('"') || has_line_break(n)) {
            return Err(QsysError::invalid_value(self.mnemonic(), name));
        }
        if let Some(value) = plain.into_iter().find(|v| has_line_break(v)) {
            return Err(QsysError::invalid_value(self.mnemonic(), value));
        }
        Ok(())
    }

    /// Short mnemonic of the command, used in logs
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Command::ChangeGroupCreate(_) => "cgc",
            Command::ChangeGroupDestroy(_) => "cgd",
            Command::ChangeGroupAdd { .. } => "cga",
            Command::ChangeGroupPoll(_) => "cgp",
            Command::ChangeGroupAutoPoll { .. } => "cgsna",
            Command::SetValue { .. } => "csv",
            Command::SetPosition { .. } => "csp",
            Command::SetString { .. } => "css",
            Command::Trigger(_) => "ct",
            Command::Get(_) => "cg",
            Command::SnapshotLoad { .. } => "ssl",
            Command::SnapshotSave { .. } => "sss",
            Command::StatusGet => "sg",
            Command::Login { .. } => "login",
            Command::Raw(_) => "raw",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::ChangeGroupCreate(id) => write!(f, "cgc {}", id),
            Command::ChangeGroupDestroy(id) => write!(f, "cgd {}", id),
            Command::ChangeGroupAdd { group, tag } => write!(f, "cga {} {}", group, quote(tag)),
            Command::ChangeGroupPoll(id) => write!(f, "cgp {}", id),
            Command::ChangeGroupAutoPoll { group, interval_ms } => {
                write!(f, "cgsna {} {}", group, interval_ms)
            }
            Command::SetValue { tag, value } => write!(f, "csv {} {}", quote(tag), value),
            Command::SetPosition { tag, position } => write!(f, "csp {} {}", quote(tag), position),
            Command::SetString { tag, value } => write!(f, "css {} {}", quote(tag), value),
            Command::Trigger(tag) => write!(f, "ct {}", quote(tag)),
            Command::Get(tag) => write!(f, "cg {}", quote(tag)),
            Command::SnapshotLoad { bank, number, ramp } => {
                write!(f, "ssl {}", quote(bank))?;
                if let Some(number) = number {
                    write!(f, " {}", number)?;
                }
                if let Some(ramp) = ramp {
                    write!(f, " {}", ramp)?;
                }
                Ok(())
            }
            Command::SnapshotSave { bank, number } => write!(f, "sss {} {}", quote(bank), number),
            Command::StatusGet => f.write_str("sg"),
            Command::Login { username, password } => {
                write!(f, "login {} {}", quote(username), quote(password))
            }
            Command::Raw(line) => f.write_str(line),
        }
    }
}

pub(crate) fn has_line_break(text: &str) -> bool {
    text.contains(['\n', '\r'])
}

/// Marker sent by the core when it requires a login
pub const LOGIN_REQUIRED: &str = "login_required";

/// Marker sent by the core after accepting credentials
pub const LOGIN_SUCCESS: &str = "login_success";

/// Marker sent by the core after rejecting credentials
pub const LOGIN_FAILED: &str = "login_failed";

/// Token that terminates the reply to a change group poll
pub const POLL_ACK: &str = "cgpa";

/// Change group value notification
///
/// `cv "<tag>" "<text>" <value> <position>`; trailing fields may be absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub tag: String,
    pub text: String,
    pub value: Option<String>,
    pub position: Option<String>,
}

/// Classified inbound line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    LoginRequired,
    LoginSuccess,
    LoginFailed,
    /// Reply to a change group poll; used as the heartbeat
    PollAck,
    Status(CoreStatus),
    Change(ChangeNotification),
    /// Anything else, including acknowledgements we do not track
    Other,
}

impl Message {
    /// Classify a raw line and its fields.
    ///
    /// Checks run in a fixed order: login markers, poll acknowledgement,
    /// status reply, change notification.
    pub fn classify(raw: &str, fields: &[String]) -> Result<Message> {
        if raw.contains(LOGIN_REQUIRED) {
            return Ok(Message::LoginRequired);
        }
        if raw.contains(LOGIN_SUCCESS) {
            return Ok(Message::LoginSuccess);
        }
        if raw.contains(LOGIN_FAILED) {
            return Ok(Message::LoginFailed);
        }
        if raw.trim_end().ends_with(POLL_ACK) {
            return Ok(Message::PollAck);
        }

        match fields.first().map(String::as_str) {
            Some("sr") => parse_status(fields).map(Message::Status),
            Some("cv") => parse_change(fields).map(Message::Change),
            _ => Ok(Message::Other),
        }
    }
}

fn parse_status(fields: &[String]) -> Result<CoreStatus> {
    if fields.len() != 5 {
        return Err(QsysError::malformed(format!(
            "status reply has {} fields, expected 5",
            fields.len()
        )));
    }

    Ok(CoreStatus {
        design_name: fields[1].clone(),
        design_code: fields[2].clone(),
        is_primary: parse_flag(&fields[3]),
        is_active: parse_flag(&fields[4]),
    })
}

fn parse_flag(field: &str) -> bool {
    matches!(field, "1" | "true")
}

fn parse_change(fields: &[String]) -> Result<ChangeNotification> {
    if fields.len() < 3 {
        return Err(QsysError::malformed(format!(
            "change notification has {} fields, expected at least 3",
            fields.len()
        )));
    }

    Ok(ChangeNotification {
        tag: fields[1].clone(),
        text: fields[2].clone(),
        value: fields.get(3).cloned(),
        position: fields.get(4).cloned(),
    })
}
