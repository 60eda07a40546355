//! Server event model and match predicates.

use serde::{Deserialize, Serialize};

use super::DeviceId;

/// Kind of a server-delivered event.
///
/// Core kinds are the legacy stream every client understands; the remaining
/// kinds require the input extension and carry the device hierarchy and
/// sub-pixel detail the legacy stream lacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    // Core (legacy) events
    CoreMotion,
    CoreButtonPress,
    CoreButtonRelease,
    CoreKeyPress,
    CoreKeyRelease,
    Enter,
    Leave,
    // Extended input events
    Motion,
    ButtonPress,
    ButtonRelease,
    KeyPress,
    KeyRelease,
    TouchBegin,
    TouchUpdate,
    TouchEnd,
    HierarchyChanged,
    DeviceChanged,
    PropertyChanged,
    BarrierHit,
    BarrierLeave,
}

impl EventKind {
    /// `true` for the legacy stream.
    pub fn is_core(&self) -> bool {
        matches!(
            self,
            EventKind::CoreMotion
                | EventKind::CoreButtonPress
                | EventKind::CoreButtonRelease
                | EventKind::CoreKeyPress
                | EventKind::CoreKeyRelease
                | EventKind::Enter
                | EventKind::Leave
        )
    }

    /// `true` for the touch family, which is subject to the exclusive
    /// subscription rule.
    pub fn is_touch(&self) -> bool {
        matches!(
            self,
            EventKind::TouchBegin | EventKind::TouchUpdate | EventKind::TouchEnd
        )
    }
}

/// Crossing details carried by [`EventKind::Enter`]/[`EventKind::Leave`].
pub mod crossing {
    pub const ANCESTOR: u32 = 0;
    pub const VIRTUAL: u32 = 1;
    pub const INFERIOR: u32 = 2;
    /// The pointer moved between windows with no ancestry relation, which
    /// is what a screen switch reports.
    pub const NONLINEAR: u32 = 3;
    pub const NONLINEAR_VIRTUAL: u32 = 4;
}

/// Change flags carried in the `detail` field of
/// [`EventKind::HierarchyChanged`] events.
pub mod hierarchy {
    pub const MASTER_ADDED: u32 = 1 << 0;
    pub const MASTER_REMOVED: u32 = 1 << 1;
    pub const SLAVE_ADDED: u32 = 1 << 2;
    pub const SLAVE_REMOVED: u32 = 1 << 3;
    pub const SLAVE_ATTACHED: u32 = 1 << 4;
    pub const SLAVE_DETACHED: u32 = 1 << 5;
    pub const DEVICE_ENABLED: u32 = 1 << 6;
    pub const DEVICE_DISABLED: u32 = 1 << 7;
}

/// One event observed on one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    pub kind: EventKind,
    /// Extension major opcode for extended events; `None` for core events.
    pub extension_opcode: Option<u8>,
    /// Delivering device (the master, for attached slaves).
    pub device: DeviceId,
    /// Originating device (the slave the hardware event came from).
    pub source: DeviceId,
    /// Kind-specific detail: button number, keycode, touch sequence id,
    /// crossing detail, or hierarchy change flags.
    pub detail: u32,
    /// Pointer position in root coordinates.  Extended motion events carry
    /// sub-pixel fractions; core events are whole pixels.
    pub root_x: f64,
    pub root_y: f64,
    /// Index of the screen the event was delivered on.
    pub screen: usize,
    /// Logical button state at the time of the event, bit `n` set when
    /// button `n` is held.
    pub buttons: u32,
    /// `true` when the event was synthesized from a touch sequence for
    /// legacy pointer observers.
    pub emulated: bool,
}

impl ServerEvent {
    /// `true` if logical button `n` was held when the event fired.
    pub fn button_pressed(&self, n: u8) -> bool {
        self.buttons & (1 << n) != 0
    }
}

/// Predicate over events; every field is optional and unset fields match
/// anything.  Consumed by a single wait call together with its deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventPredicate {
    kind: Option<EventKind>,
    extension_opcode: Option<u8>,
    device: Option<DeviceId>,
    detail: Option<u32>,
}

impl EventPredicate {
    /// Matches every event.
    pub fn any() -> Self {
        Self::default()
    }

    /// Matches one event kind.
    pub fn kind(kind: EventKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Restricts to events carrying this extension opcode.
    pub fn with_opcode(mut self, opcode: u8) -> Self {
        self.extension_opcode = Some(opcode);
        self
    }

    /// Restricts to one delivering device.
    pub fn on_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    /// Restricts the kind-specific detail (button number, keycode, ...).
    pub fn with_detail(mut self, detail: u32) -> Self {
        self.detail = Some(detail);
        self
    }

    /// `true` if the event satisfies every set field.
    pub fn matches(&self, event: &ServerEvent) -> bool {
        self.kind.map_or(true, |k| k == event.kind)
            && self
                .extension_opcode
                .map_or(true, |op| event.extension_opcode == Some(op))
            && self.device.map_or(true, |d| d == event.device)
            && self.detail.map_or(true, |d| d == event.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn motion_on(device: DeviceId) -> ServerEvent {
        ServerEvent {
            kind: EventKind::Motion,
            extension_opcode: Some(131),
            device,
            source: device,
            detail: 0,
            root_x: 10.0,
            root_y: 20.0,
            screen: 0,
            buttons: 0,
            emulated: false,
        }
    }

    #[test]
    fn test_any_predicate_matches_everything() {
        assert!(EventPredicate::any().matches(&motion_on(2)));
    }

    #[test]
    fn test_predicate_narrows_by_each_field() {
        let ev = motion_on(2);

        assert!(EventPredicate::kind(EventKind::Motion).matches(&ev));
        assert!(!EventPredicate::kind(EventKind::ButtonPress).matches(&ev));

        assert!(EventPredicate::kind(EventKind::Motion)
            .with_opcode(131)
            .matches(&ev));
        assert!(!EventPredicate::kind(EventKind::Motion)
            .with_opcode(99)
            .matches(&ev));

        assert!(EventPredicate::any().on_device(2).matches(&ev));
        assert!(!EventPredicate::any().on_device(7).matches(&ev));
    }

    #[test]
    fn test_detail_match_distinguishes_buttons() {
        let mut press = motion_on(2);
        press.kind = EventKind::CoreButtonPress;
        press.detail = 4;

        let wheel_up = EventPredicate::kind(EventKind::CoreButtonPress).with_detail(4);
        let wheel_down = EventPredicate::kind(EventKind::CoreButtonPress).with_detail(5);
        assert!(wheel_up.matches(&press));
        assert!(!wheel_down.matches(&press));
    }

    #[test]
    fn test_button_state_mask() {
        let mut ev = motion_on(2);
        ev.buttons = 1 << 1;
        assert!(ev.button_pressed(1));
        assert!(!ev.button_pressed(3));
    }

    #[test]
    fn test_kind_classification() {
        assert!(EventKind::CoreMotion.is_core());
        assert!(!EventKind::Motion.is_core());
        assert!(EventKind::TouchUpdate.is_touch());
        assert!(!EventKind::Motion.is_touch());
    }
}
