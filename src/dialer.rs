use crate::config::DialerConfig;
use crate::error::{QsysError, Result};
use crate::feedback::{FeedbackReceiver, FeedbackSender};
use crate::protocol::Command;
use crate::queue::CommandSender;
use crate::registry::{bind, ControlPoint, ControlPointKind, TagBinding, TagRole};
use crate::types::KeypadKey;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Delay before reading back state after a dial or keypad press
const FOLLOW_UP_POLL_DELAY: Duration = Duration::from_millis(50);

/// Dialer feedback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialerFeedback {
    DialString(String),
    OffHook(bool),
    CallerId(String),
    DoNotDisturb(bool),
    AutoAnswer(bool),
    IncomingCall(bool),
}

/// Snapshot of the dialer state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialerState {
    pub dial_string: String,
    pub off_hook: bool,
    pub caller_id: String,
    pub do_not_disturb: bool,
    pub auto_answer: bool,
    pub incoming_call: bool,
}

/// VoIP or POTS dialer block
pub struct Dialer {
    key: String,
    clear_on_hangup: bool,
    bindings: Vec<TagBinding>,
    commands: CommandSender,
    state: Mutex<DialerState>,
    feedback: FeedbackSender<DialerFeedback>,
}

impl Dialer {
    pub fn new(key: impl Into<String>, config: &DialerConfig, commands: CommandSender) -> Self {
        let key = key.into();

        let mut bindings = Vec::new();
        bind(&mut bindings, &config.incoming_call_ringer_tag, TagRole::IncomingCallRinger, true);
        bind(&mut bindings, &config.dial_string_tag, TagRole::DialString, true);
        bind(&mut bindings, &config.disconnect_tag, TagRole::Disconnect, true);
        bind(&mut bindings, &config.connect_tag, TagRole::Connect, true);
        bind(&mut bindings, &config.call_status_tag, TagRole::CallStatus, true);
        bind(&mut bindings, &config.hook_status_tag, TagRole::HookStatus, true);
        bind(&mut bindings, &config.do_not_disturb_tag, TagRole::DoNotDisturb, true);
        bind(&mut bindings, &config.auto_answer_tag, TagRole::AutoAnswer, true);

        let keypad = [
            (&config.keypad_backspace_tag, KeypadKey::Backspace),
            (&config.keypad_clear_tag, KeypadKey::Clear),
            (&config.keypad0_tag, KeypadKey::Num0),
            (&config.keypad1_tag, KeypadKey::Num1),
            (&config.keypad2_tag, KeypadKey::Num2),
            (&config.keypad3_tag, KeypadKey::Num3),
            (&config.keypad4_tag, KeypadKey::Num4),
            (&config.keypad5_tag, KeypadKey::Num5),
            (&config.keypad6_tag, KeypadKey::Num6),
            (&config.keypad7_tag, KeypadKey::Num7),
            (&config.keypad8_tag, KeypadKey::Num8),
            (&config.keypad9_tag, KeypadKey::Num9),
            (&config.keypad_pound_tag, KeypadKey::Pound),
            (&config.keypad_star_tag, KeypadKey::Star),
        ];
        for (tag, button) in keypad {
            bind(&mut bindings, tag, TagRole::Keypad(button), false);
        }

        Self {
            commands: commands.labelled(&key),
            key,
            clear_on_hangup: config.clear_on_hangup,
            bindings,
            state: Mutex::new(DialerState::default()),
            feedback: FeedbackSender::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, DialerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> DialerState {
        self.state().clone()
    }

    pub fn is_off_hook(&self) -> bool {
        self.state().off_hook
    }

    pub fn subscribe(&self) -> FeedbackReceiver<DialerFeedback> {
        self.feedback.subscribe()
    }

    fn tag(&self, role: TagRole) -> Result<&str> {
        self.bindings
            .iter()
            .find(|b| b.role == role)
            .map(|b| b.tag.as_str())
            .ok_or_else(|| QsysError::UnknownControlPoint(format!("{} has no {:?} tag", self.key, role)))
    }

    fn role_of(&self, tag: &str) -> Option<TagRole> {
        self.bindings.iter().find(|b| b.tag == tag).map(|b| b.role)
    }

    /// Send `command` after a short delay so the core has applied the
    /// preceding change.
    fn follow_up(&self, command: Command) {
        let commands = self.commands.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(FOLLOW_UP_POLL_DELAY).await;
                    if let Err(e) = commands.send(command) {
                        tracing::debug!("Dialer follow-up poll dropped: {}", e);
                    }
                });
            }
            Err(_) => {
                if let Err(e) = commands.send(command) {
                    tracing::debug!("Dialer follow-up poll dropped: {}", e);
                }
            }
        }
    }

    fn poll_call_status(&self) -> Result<()> {
        let tag = self.tag(TagRole::CallStatus)?;
        self.follow_up(Command::Get(tag.to_string()));
        Ok(())
    }

    /// Toggle the hook: disconnect when off hook, connect otherwise
    pub fn dial(&self) -> Result<()> {
        let role = if self.is_off_hook() {
            TagRole::Disconnect
        } else {
            TagRole::Connect
        };
        self.commands.send(Command::Trigger(self.tag(role)?.to_string()))?;
        self.poll_call_status()
    }

    /// Dial `number`; ignored while a call is up
    pub fn dial_number(&self, number: &str) -> Result<()> {
        if self.is_off_hook() {
            tracing::debug!("{} ignoring dial while off hook", self.key);
            return Ok(());
        }

        if !number.is_empty() {
            self.commands.send(Command::SetString {
                tag: self.tag(TagRole::DialString)?.to_string(),
                value: number.to_string(),
            })?;
        }
        self.commands
            .send(Command::Trigger(self.tag(TagRole::Connect)?.to_string()))?;
        self.poll_call_status()
    }

    pub fn end_call(&self) -> Result<()> {
        self.commands
            .send(Command::Trigger(self.tag(TagRole::Disconnect)?.to_string()))
    }

    pub fn accept_call(&self) -> Result<()> {
        self.dial()
    }

    pub fn reject_call(&self) -> Result<()> {
        self.end_call()
    }

    /// Press a keypad button, then read back the dial string
    pub fn send_keypad(&self, button: KeypadKey) -> Result<()> {
        let tag = self.tag(TagRole::Keypad(button))?;
        self.commands.send(Command::Trigger(tag.to_string()))?;
        self.follow_up(Command::Get(self.tag(TagRole::DialString)?.to_string()));
        Ok(())
    }

    /// Press the keypad button for a DTMF digit; other characters are ignored
    pub fn send_dtmf(&self, digit: char) -> Result<()> {
        match KeypadKey::from_dtmf(digit) {
            Some(button) => self.send_keypad(button),
            None => Ok(()),
        }
    }

    pub fn do_not_disturb_on(&self) -> Result<()> {
        self.set_flag(TagRole::DoNotDisturb, true)
    }

    pub fn do_not_disturb_off(&self) -> Result<()> {
        self.set_flag(TagRole::DoNotDisturb, false)
    }

    pub fn do_not_disturb_toggle(&self) -> Result<()> {
        let on = self.state().do_not_disturb;
        self.set_flag(TagRole::DoNotDisturb, !on)
    }

    pub fn auto_answer_on(&self) -> Result<()> {
        self.set_flag(TagRole::AutoAnswer, true)
    }

    pub fn auto_answer_off(&self) -> Result<()> {
        self.set_flag(TagRole::AutoAnswer, false)
    }

    pub fn auto_answer_toggle(&self) -> Result<()> {
        let on = self.state().auto_answer;
        self.set_flag(TagRole::AutoAnswer, !on)
    }

    fn set_flag(&self, role: TagRole, on: bool) -> Result<()> {
        self.commands.send(Command::set_bool(self.tag(role)?, on))
    }

    fn update(&self, apply: impl FnOnce(&mut DialerState) -> Option<DialerFeedback>) {
        let update = {
            let mut state = self.state();
            apply(&mut *state)
        };
        if let Some(update) = update {
            self.feedback.publish(update);
        }
    }

    fn set_off_hook(&self, off_hook: bool) {
        self.update(|s| {
            s.off_hook = off_hook;
            Some(DialerFeedback::OffHook(off_hook))
        });
    }

    fn set_caller_id(&self, caller_id: &str) {
        self.update(|s| {
            s.caller_id = caller_id.to_string();
            Some(DialerFeedback::CallerId(caller_id.to_string()))
        });
    }

    fn apply_call_status(&self, status: &str) -> Result<()> {
        if ["Dialing", "Connected", "Ringing"].iter().any(|s| status.contains(s)) {
            self.set_off_hook(true);
            if let Some(caller_id) = status.split(' ').nth(1) {
                self.set_caller_id(caller_id);
            }
        } else if status == "Disconnected" || status == "Idle" {
            self.set_off_hook(false);
            self.set_caller_id("");
            if self.clear_on_hangup {
                self.send_keypad(KeypadKey::Clear)?;
            }
        }
        Ok(())
    }
}

fn on_off(value: &str) -> Option<bool> {
    match value {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

fn true_false(value: &str) -> Option<bool> {
    match value {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

impl ControlPoint for Dialer {
    fn key(&self) -> &str {
        &self.key
    }

    fn kind(&self) -> ControlPointKind {
        ControlPointKind::Dialer
    }

    fn tags(&self) -> &[TagBinding] {
        &self.bindings
    }

    fn on_change(&self, tag: &str, primary: &str, _secondary: Option<&str>) -> Result<()> {
        tracing::debug!("Dialer {} Response: '{}'", tag, primary);

        match self.role_of(tag) {
            Some(TagRole::DialString) => self.update(|s| {
                s.dial_string = primary.to_string();
                Some(DialerFeedback::DialString(primary.to_string()))
            }),
            Some(TagRole::DoNotDisturb) => self.update(|s| {
                let on = on_off(primary)?;
                s.do_not_disturb = on;
                Some(DialerFeedback::DoNotDisturb(on))
            }),
            Some(TagRole::AutoAnswer) => self.update(|s| {
                let on = on_off(primary)?;
                s.auto_answer = on;
                Some(DialerFeedback::AutoAnswer(on))
            }),
            Some(TagRole::HookStatus) => {
                if let Some(off_hook) = true_false(primary) {
                    self.set_off_hook(off_hook);
                }
            }
            Some(TagRole::IncomingCallRinger) => self.update(|s| {
                let ringing = true_false(primary)?;
                s.incoming_call = ringing;
                Some(DialerFeedback::IncomingCall(ringing))
            }),
            Some(TagRole::CallStatus) => return self.apply_call_status(primary),
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{CommandQueue, QUEUE_CAPACITY};
    use std::sync::Arc;

    fn config() -> DialerConfig {
        DialerConfig {
            clear_on_hangup: true,
            dial_string_tag: Some("VoIP Dial".into()),
            connect_tag: Some("VoIP Connect".into()),
            disconnect_tag: Some("VoIP Disconnect".into()),
            call_status_tag: Some("VoIP Status".into()),
            hook_status_tag: Some("VoIP Hook".into()),
            do_not_disturb_tag: Some("VoIP DND".into()),
            auto_answer_tag: Some("VoIP AA".into()),
            keypad_clear_tag: Some("VoIP Clear".into()),
            keypad1_tag: Some("VoIP 1".into()),
            keypad_pound_tag: Some("VoIP Pound".into()),
            ..Default::default()
        }
    }

    fn dialer() -> (Dialer, Arc<CommandQueue>) {
        let queue = Arc::new(CommandQueue::new(QUEUE_CAPACITY));
        let dialer = Dialer::new("dialer-1", &config(), CommandSender::new(queue.clone()));
        (dialer, queue)
    }

    #[test]
    fn test_keypad_tags_are_not_watched() {
        let (dialer, _) = dialer();
        let watched: Vec<_> = dialer
            .tags()
            .iter()
            .filter(|b| b.watch)
            .map(|b| b.tag.as_str())
            .collect();
        assert_eq!(
            watched,
            vec![
                "VoIP Dial",
                "VoIP Disconnect",
                "VoIP Connect",
                "VoIP Status",
                "VoIP Hook",
                "VoIP DND",
                "VoIP AA"
            ]
        );
        assert_eq!(dialer.tags().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dial_number_polls_call_status() {
        let (dialer, queue) = dialer();
        dialer.dial_number("5551234").unwrap();

        assert_eq!(
            queue.pending_lines(),
            vec!["css \"VoIP Dial\" 5551234", "ct \"VoIP Connect\""]
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(queue.pending_lines()[2], "cg \"VoIP Status\"");
    }

    #[tokio::test]
    async fn test_dial_number_ignored_off_hook() {
        let (dialer, queue) = dialer();
        dialer.on_change("VoIP Hook", "true", None).unwrap();

        dialer.dial_number("5551234").unwrap();
        assert!(queue.is_empty());

        dialer.dial().unwrap();
        assert_eq!(queue.pending_lines(), vec!["ct \"VoIP Disconnect\""]);
    }

    #[test]
    fn test_call_status_sets_caller_id() {
        let (dialer, _) = dialer();
        let mut rx = dialer.subscribe();

        dialer.on_change("VoIP Status", "Connected 5551234", None).unwrap();

        let state = dialer.snapshot();
        assert!(state.off_hook);
        assert_eq!(state.caller_id, "5551234");
        assert_eq!(rx.try_recv().unwrap(), Some(DialerFeedback::OffHook(true)));
        assert_eq!(
            rx.try_recv().unwrap(),
            Some(DialerFeedback::CallerId("5551234".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hangup_clears_keypad() {
        let (dialer, queue) = dialer();
        dialer.on_change("VoIP Status", "Connected 5551234", None).unwrap();

        dialer.on_change("VoIP Status", "Idle", None).unwrap();

        let state = dialer.snapshot();
        assert!(!state.off_hook);
        assert!(state.caller_id.is_empty());
        assert_eq!(queue.pending_lines(), vec!["ct \"VoIP Clear\""]);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(queue.pending_lines(), vec!["ct \"VoIP Clear\"", "cg \"VoIP Dial\""]);
    }

    #[test]
    fn test_flags() {
        let (dialer, queue) = dialer();
        dialer.on_change("VoIP DND", "on", None).unwrap();
        dialer.on_change("VoIP AA", "bogus", None).unwrap();

        let state = dialer.snapshot();
        assert!(state.do_not_disturb);
        assert!(!state.auto_answer);

        dialer.do_not_disturb_toggle().unwrap();
        dialer.auto_answer_toggle().unwrap();
        assert_eq!(
            queue.pending_lines(),
            vec!["csv \"VoIP DND\" 0", "csv \"VoIP AA\" 1"]
        );
    }

    #[test]
    fn test_dtmf_and_missing_keys() {
        let (dialer, queue) = dialer();
        dialer.send_dtmf('x').unwrap();
        assert!(queue.is_empty());

        assert!(dialer.send_keypad(KeypadKey::Num9).is_err());
        dialer.send_dtmf('#').unwrap();
        assert_eq!(queue.pending_lines()[0], "ct \"VoIP Pound\"");
    }
}
