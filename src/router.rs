use crate::error::Result;
use crate::heartbeat::HeartbeatMonitor;
use crate::parser::tokenize;
use crate::protocol::{ChangeNotification, Message};
use crate::registry::{ControlPoint, ControlPointKind, Registry, TagRole};
use crate::types::CoreStatus;
use std::sync::Arc;

/// What the router did with a line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Blank line
    Empty,
    /// The line could not be interpreted; already logged
    Failed,
    LoginRequired,
    LoginSuccess,
    LoginFailed,
    /// Poll reply; the heartbeat counter was reset
    HeartbeatReply,
    Status(CoreStatus),
    /// A change notification reached the control point with this key
    Delivered { key: String },
    /// No control point owns the tag
    Unroutable { tag: String },
    /// Nothing to do
    Ignored,
}

/// Classifies inbound lines and dispatches change notifications
///
/// Notifications carry no type information, so the tag is tried against
/// level points (level and mute tags), then dialer points (any tag), then
/// camera points (online status tag). The first match wins.
pub struct Router {
    registry: Arc<Registry>,
    heartbeat: Arc<HeartbeatMonitor>,
}

impl Router {
    pub fn new(registry: Arc<Registry>, heartbeat: Arc<HeartbeatMonitor>) -> Self {
        Self { registry, heartbeat }
    }

    /// Route one line. Never fails: errors are logged with the raw line.
    pub fn route(&self, line: &str) -> Routed {
        match self.try_route(line) {
            Ok(routed) => routed,
            Err(e) => {
                tracing::warn!("Error parsing response '{}': {}", line, e);
                Routed::Failed
            }
        }
    }

    fn try_route(&self, line: &str) -> Result<Routed> {
        let fields = tokenize(line)?;
        if fields.is_empty() {
            return Ok(Routed::Empty);
        }

        let routed = match Message::classify(line, &fields)? {
            Message::LoginRequired => Routed::LoginRequired,
            Message::LoginSuccess => Routed::LoginSuccess,
            Message::LoginFailed => Routed::LoginFailed,
            Message::PollAck => {
                tracing::debug!("Found poll response");
                self.heartbeat.record_reply();
                Routed::HeartbeatReply
            }
            Message::Status(status) => Routed::Status(status),
            Message::Change(notification) => self.dispatch(&notification)?,
            Message::Other => Routed::Ignored,
        };

        Ok(routed)
    }

    fn dispatch(&self, change: &ChangeNotification) -> Result<Routed> {
        tracing::debug!("cv parse tag: {}", change.tag);

        for point in self.registry.points_of(ControlPointKind::Level) {
            let role = point
                .tags()
                .iter()
                .find(|b| b.tag == change.tag && matches!(b.role, TagRole::Level | TagRole::Mute))
                .map(|b| b.role);

            match role {
                Some(TagRole::Level) => {
                    let primary = change
                        .position
                        .as_deref()
                        .or(change.value.as_deref())
                        .unwrap_or(&change.text);
                    return deliver(point, &change.tag, primary, change.value.as_deref());
                }
                Some(_) => return deliver(point, &change.tag, &change.text, None),
                None => {}
            }
        }

        for point in self.registry.points_of(ControlPointKind::Dialer) {
            if point.tags().iter().any(|b| b.tag == change.tag) {
                return deliver(point, &change.tag, &change.text, None);
            }
        }

        for point in self.registry.points_of(ControlPointKind::Camera) {
            if point
                .tags()
                .iter()
                .any(|b| b.tag == change.tag && b.role == TagRole::OnlineStatus)
            {
                return deliver(point, &change.tag, &change.text, None);
            }
        }

        tracing::debug!("No control point owns tag '{}'", change.tag);
        Ok(Routed::Unroutable {
            tag: change.tag.clone(),
        })
    }
}

fn deliver(point: &Arc<dyn ControlPoint>, tag: &str, primary: &str, secondary: Option<&str>) -> Result<Routed> {
    point.on_change(tag, primary, secondary)?;
    Ok(Routed::Delivered {
        key: point.key().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeartbeatConfig;
    use crate::queue::{CommandQueue, QUEUE_CAPACITY};
    use crate::registry::tests::FakePoint;
    use crate::registry::TagBinding;
    use crate::types::KeypadKey;
    use tokio::sync::watch;

    struct Fixture {
        router: Router,
        heartbeat: Arc<HeartbeatMonitor>,
        fader: Arc<FakePoint>,
        other_fader: Arc<FakePoint>,
        dialer: Arc<FakePoint>,
        camera: Arc<FakePoint>,
        _stop: watch::Sender<bool>,
    }

    fn fixture() -> Fixture {
        let fader = FakePoint::new(
            "fader-1",
            ControlPointKind::Level,
            vec![
                TagBinding::watched("PGM Mute", TagRole::Mute),
                TagBinding::watched("PGM Gain", TagRole::Level),
            ],
        );
        let other_fader = FakePoint::new(
            "fader-2",
            ControlPointKind::Level,
            vec![TagBinding::watched("Mic Gain", TagRole::Level)],
        );
        let dialer = FakePoint::new(
            "dialer-1",
            ControlPointKind::Dialer,
            vec![
                TagBinding::watched("Call Status", TagRole::CallStatus),
                TagBinding::unwatched("Key 1", TagRole::Keypad(KeypadKey::Num1)),
            ],
        );
        let camera = FakePoint::new(
            "cam-1",
            ControlPointKind::Camera,
            vec![
                TagBinding::unwatched("Cam Privacy", TagRole::Privacy),
                TagBinding::watched("Cam Online", TagRole::OnlineStatus),
            ],
        );

        let mut registry = Registry::new();
        registry.register(fader.clone()).unwrap();
        registry.register(other_fader.clone()).unwrap();
        registry.register(dialer.clone()).unwrap();
        registry.register(camera.clone()).unwrap();

        let queue = Arc::new(CommandQueue::new(QUEUE_CAPACITY));
        let (stop_tx, stop_rx) = watch::channel(false);
        let heartbeat = Arc::new(HeartbeatMonitor::new(HeartbeatConfig::default(), 2, queue, stop_rx));

        Fixture {
            router: Router::new(Arc::new(registry), heartbeat.clone()),
            heartbeat,
            fader,
            other_fader,
            dialer,
            camera,
            _stop: stop_tx,
        }
    }

    #[test]
    fn test_level_notification_reaches_only_owner() {
        let f = fixture();
        let routed = f.router.route(r#"cv "PGM Gain" "-10.0dB" -10 0.5"#);

        assert_eq!(routed, Routed::Delivered { key: "fader-1".into() });
        assert_eq!(
            f.fader.received(),
            vec![("PGM Gain".to_string(), "0.5".to_string(), Some("-10".to_string()))]
        );
        assert!(f.other_fader.received().is_empty());
        assert!(f.dialer.received().is_empty());
        assert!(f.camera.received().is_empty());
    }

    #[test]
    fn test_mute_notification_passes_text() {
        let f = fixture();
        f.router.route(r#"cv "PGM Mute" "muted" 1 1"#);
        assert_eq!(
            f.fader.received(),
            vec![("PGM Mute".to_string(), "muted".to_string(), None)]
        );
    }

    #[test]
    fn test_unregistered_tag_is_dropped() {
        let f = fixture();
        let routed = f.router.route(r#"cv "Nobody" "x" 0 0"#);

        assert_eq!(routed, Routed::Unroutable { tag: "Nobody".into() });
        assert!(f.fader.received().is_empty());
        assert!(f.other_fader.received().is_empty());
        assert!(f.dialer.received().is_empty());
        assert!(f.camera.received().is_empty());
    }

    #[test]
    fn test_dialer_matches_any_tag() {
        let f = fixture();
        f.router.route(r#"cv "Call Status" "Connected 5551234" 3 1"#);
        f.router.route(r#"cv "Key 1" "" 0 0"#);

        assert_eq!(
            f.dialer.received(),
            vec![
                ("Call Status".to_string(), "Connected 5551234".to_string(), None),
                ("Key 1".to_string(), "".to_string(), None),
            ]
        );
    }

    #[test]
    fn test_camera_matches_only_online_status() {
        let f = fixture();
        assert_eq!(
            f.router.route(r#"cv "Cam Online" "true" 1 1"#),
            Routed::Delivered { key: "cam-1".into() }
        );
        assert_eq!(
            f.router.route(r#"cv "Cam Privacy" "true" 1 1"#),
            Routed::Unroutable { tag: "Cam Privacy".into() }
        );
        assert_eq!(f.camera.received().len(), 1);
    }

    #[test]
    fn test_poll_reply_resets_heartbeat() {
        let f = fixture();
        f.heartbeat.probe().unwrap();
        f.heartbeat.probe().unwrap();

        assert_eq!(f.router.route("cgpa"), Routed::HeartbeatReply);
        assert_eq!(f.heartbeat.misses(), 0);
    }

    #[test]
    fn test_bad_lines_do_not_stop_routing() {
        let f = fixture();
        assert_eq!(f.router.route(r#"cv "PGM Gain 1 0.5"#), Routed::Failed);
        assert_eq!(f.router.route(""), Routed::Empty);
        assert_eq!(f.router.route("cv"), Routed::Failed);
        assert_eq!(
            f.router.route(r#"cv "PGM Gain" "0dB" 0 1"#),
            Routed::Delivered { key: "fader-1".into() }
        );
    }

    #[test]
    fn test_status_and_login_lines() {
        let f = fixture();
        assert!(matches!(f.router.route(r#"sr "Design" "code" 1 1"#), Routed::Status(_)));
        assert_eq!(f.router.route("login_required"), Routed::LoginRequired);
        assert_eq!(f.router.route("cgc 1"), Routed::Ignored);
    }
}
