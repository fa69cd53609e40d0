//! Control points and the tag registry.
//!
//! A control point declares the tags it owns up front as a list of
//! [`TagBinding`]s. The registry is filled once while the client is built and
//! is read-only afterwards, so lookups need no locking.

use crate::error::{QsysError, Result};
use crate::protocol::has_line_break;
use crate::types::KeypadKey;
use std::collections::HashMap;
use std::sync::Arc;

/// Family of a control point; decides the routing pass it takes part in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlPointKind {
    Level,
    Dialer,
    Camera,
}

/// What a tag means to the control point that owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagRole {
    Level,
    Mute,
    DialString,
    CallStatus,
    HookStatus,
    AutoAnswer,
    DoNotDisturb,
    IncomingCallRinger,
    Connect,
    Disconnect,
    Keypad(KeypadKey),
    PanLeft,
    PanRight,
    PanSpeed,
    TiltUp,
    TiltDown,
    TiltSpeed,
    ZoomIn,
    ZoomOut,
    ZoomSpeed,
    Home,
    PresetBank,
    Privacy,
    OnlineStatus,
}

/// A tag owned by a control point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagBinding {
    pub tag: String,
    pub role: TagRole,
    /// Whether the tag is added to the feedback change group
    pub watch: bool,
}

impl TagBinding {
    pub fn watched(tag: impl Into<String>, role: TagRole) -> Self {
        Self {
            tag: tag.into(),
            role,
            watch: true,
        }
    }

    pub fn unwatched(tag: impl Into<String>, role: TagRole) -> Self {
        Self {
            tag: tag.into(),
            role,
            watch: false,
        }
    }
}

/// Push binding for `tag` unless it is unset or empty
pub(crate) fn bind(bindings: &mut Vec<TagBinding>, tag: &Option<String>, role: TagRole, watch: bool) {
    if let Some(tag) = tag.as_deref().filter(|t| !t.is_empty()) {
        bindings.push(TagBinding {
            tag: tag.to_string(),
            role,
            watch,
        });
    }
}

/// Anything that owns tags and wants their change notifications
pub trait ControlPoint: Send + Sync {
    /// Unique key of the control point
    fn key(&self) -> &str;

    fn kind(&self) -> ControlPointKind;

    /// Declared tags, in subscription order
    fn tags(&self) -> &[TagBinding];

    /// Handle a change notification for one of our tags
    ///
    /// `primary` is the value the router selected for the tag's role;
    /// `secondary` carries the raw control value where one applies.
    fn on_change(&self, tag: &str, primary: &str, secondary: Option<&str>) -> Result<()>;

    /// Request current values once the first subscription is in place
    fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

/// Tag to control point mapping
#[derive(Default)]
pub struct Registry {
    points: Vec<Arc<dyn ControlPoint>>,
    owners: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a control point
    ///
    /// Fails with [`QsysError::DuplicateTag`] if another control point
    /// already owns one of its tags, or [`QsysError::InvalidValue`] for a tag
    /// that cannot be sent quoted; nothing is registered in either case.
    pub fn register(&mut self, point: Arc<dyn ControlPoint>) -> Result<()> {
        for binding in point.tags() {
            if binding.tag.contains('"') || has_line_break(&binding.tag) {
                return Err(QsysError::invalid_value(point.key(), &binding.tag));
            }
            if let Some(&owner) = self.owners.get(&binding.tag) {
                return Err(QsysError::DuplicateTag {
                    tag: binding.tag.clone(),
                    owner: self.points[owner].key().to_string(),
                });
            }
        }

        let index = self.points.len();
        for binding in point.tags() {
            self.owners.insert(binding.tag.clone(), index);
        }
        tracing::debug!(
            "Registered control point '{}' ({:?}) with {} tags",
            point.key(),
            point.kind(),
            point.tags().len()
        );
        self.points.push(point);
        Ok(())
    }

    /// Control points in registration order
    pub fn points(&self) -> impl Iterator<Item = &Arc<dyn ControlPoint>> {
        self.points.iter()
    }

    /// Control points of one kind, in registration order
    pub fn points_of(&self, kind: ControlPointKind) -> impl Iterator<Item = &Arc<dyn ControlPoint>> {
        self.points.iter().filter(move |p| p.kind() == kind)
    }

    /// The control point owning `tag`, if any
    pub fn owner_of(&self, tag: &str) -> Option<&Arc<dyn ControlPoint>> {
        self.owners.get(tag).map(|&index| &self.points[index])
    }

    /// Tags to add to the feedback change group, in registration order
    pub fn watched_tags(&self) -> Vec<&str> {
        self.points
            .iter()
            .flat_map(|p| p.tags().iter())
            .filter(|b| b.watch)
            .map(|b| b.tag.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Control point that records what it receives
    pub(crate) struct FakePoint {
        pub(crate) key: String,
        pub(crate) kind: ControlPointKind,
        pub(crate) bindings: Vec<TagBinding>,
        pub(crate) received: Mutex<Vec<(String, String, Option<String>)>>,
        pub(crate) refreshes: AtomicUsize,
    }

    impl FakePoint {
        pub(crate) fn new(key: &str, kind: ControlPointKind, bindings: Vec<TagBinding>) -> Arc<Self> {
            Arc::new(Self {
                key: key.to_string(),
                kind,
                bindings,
                received: Mutex::new(Vec::new()),
                refreshes: AtomicUsize::new(0),
            })
        }

        pub(crate) fn received(&self) -> Vec<(String, String, Option<String>)> {
            self.received.lock().unwrap().clone()
        }
    }

    impl ControlPoint for FakePoint {
        fn key(&self) -> &str {
            &self.key
        }

        fn kind(&self) -> ControlPointKind {
            self.kind
        }

        fn tags(&self) -> &[TagBinding] {
            &self.bindings
        }

        fn on_change(&self, tag: &str, primary: &str, secondary: Option<&str>) -> Result<()> {
            self.received.lock().unwrap().push((
                tag.to_string(),
                primary.to_string(),
                secondary.map(str::to_string),
            ));
            Ok(())
        }

        fn refresh(&self) -> Result<()> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_unquotable_tag_rejected() {
        let mut registry = Registry::new();
        let err = registry
            .register(FakePoint::new(
                "fader-1",
                ControlPointKind::Level,
                vec![TagBinding::watched("PGM \"Gain\"", TagRole::Level)],
            ))
            .unwrap_err();

        assert!(matches!(err, QsysError::InvalidValue { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_tag_rejected() {
        let mut registry = Registry::new();
        registry
            .register(FakePoint::new(
                "fader-1",
                ControlPointKind::Level,
                vec![TagBinding::watched("Gain", TagRole::Level)],
            ))
            .unwrap();

        let err = registry
            .register(FakePoint::new(
                "cam-1",
                ControlPointKind::Camera,
                vec![
                    TagBinding::watched("Online", TagRole::OnlineStatus),
                    TagBinding::unwatched("Gain", TagRole::Privacy),
                ],
            ))
            .unwrap_err();

        assert!(matches!(err, QsysError::DuplicateTag { ref tag, ref owner } if tag == "Gain" && owner == "fader-1"));
        assert_eq!(registry.len(), 1);
        assert!(registry.owner_of("Online").is_none());
    }

    #[test]
    fn test_watched_tags_in_registration_order() {
        let mut registry = Registry::new();
        registry
            .register(FakePoint::new(
                "fader-1",
                ControlPointKind::Level,
                vec![
                    TagBinding::watched("Mute 1", TagRole::Mute),
                    TagBinding::watched("Gain 1", TagRole::Level),
                ],
            ))
            .unwrap();
        registry
            .register(FakePoint::new(
                "dialer-1",
                ControlPointKind::Dialer,
                vec![
                    TagBinding::watched("Status", TagRole::CallStatus),
                    TagBinding::unwatched("Key 1", TagRole::Keypad(KeypadKey::Num1)),
                ],
            ))
            .unwrap();

        assert_eq!(registry.watched_tags(), vec!["Mute 1", "Gain 1", "Status"]);
        assert_eq!(registry.owner_of("Key 1").unwrap().key(), "dialer-1");
        assert_eq!(registry.points_of(ControlPointKind::Dialer).count(), 1);
    }

    #[test]
    fn test_bind_skips_empty_tags() {
        let mut bindings = Vec::new();
        bind(&mut bindings, &None, TagRole::Mute, true);
        bind(&mut bindings, &Some(String::new()), TagRole::Mute, true);
        bind(&mut bindings, &Some("Gain".into()), TagRole::Level, true);
        assert_eq!(bindings, vec![TagBinding::watched("Gain", TagRole::Level)]);
    }
}
