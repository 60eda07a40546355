//! Raw input event model.
//!
//! Input hardware on Linux reports through evdev as a stream of
//! `(type, code, value)` tuples: a relative mouse move is
//! `(Relative, REL_X, dx)`, a button press is `(Key, BTN_LEFT, 1)`.  A group
//! of tuples only forms a complete input frame once a synchronization marker
//! `(Synchronization, SYN_REPORT, 0)` is seen; consumers are free to buffer
//! everything up to that point.
//!
//! The constants here are the subset of the kernel's code space that the
//! recorded devices in the test corpus actually use.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level event type, the first element of every event tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum EventType {
    /// Frame delimiters (`SYN_*`).
    Synchronization = 0x00,
    /// Keys and buttons (`KEY_*`, `BTN_*`).
    Key = 0x01,
    /// Relative axes (`REL_*`).
    Relative = 0x02,
    /// Absolute axes (`ABS_*`).
    Absolute = 0x03,
    /// Miscellaneous (`MSC_*`).
    Misc = 0x04,
    /// Binary switches (`SW_*`).
    Switch = 0x05,
}

impl TryFrom<u16> for EventType {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(EventType::Synchronization),
            0x01 => Ok(EventType::Key),
            0x02 => Ok(EventType::Relative),
            0x03 => Ok(EventType::Absolute),
            0x04 => Ok(EventType::Misc),
            0x05 => Ok(EventType::Switch),
            _ => Err(()),
        }
    }
}

/// A single low-level input event with its offset from the start of the
/// recording (zero for programmatically injected events).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Time offset relative to the first event of the sequence.
    pub offset: Duration,
    /// Event type.
    pub event_type: EventType,
    /// Event code within the type's code space.
    pub code: u16,
    /// Signed value: delta for relative axes, position for absolute axes,
    /// 1/0 for key press/release.
    pub value: i32,
}

impl RawEvent {
    /// Creates an event with a zero time offset.
    pub fn new(event_type: EventType, code: u16, value: i32) -> Self {
        Self {
            offset: Duration::ZERO,
            event_type,
            code,
            value,
        }
    }

    /// Returns `true` if this event is a frame delimiter.
    pub fn is_sync(&self) -> bool {
        self.event_type == EventType::Synchronization && self.code == codes::SYN_REPORT
    }
}

/// Event code constants, named as in the kernel's code space.
pub mod codes {
    // Synchronization
    pub const SYN_REPORT: u16 = 0x00;

    // Relative axes
    pub const REL_X: u16 = 0x00;
    pub const REL_Y: u16 = 0x01;
    pub const REL_HWHEEL: u16 = 0x06;
    pub const REL_WHEEL: u16 = 0x08;

    // Absolute axes
    pub const ABS_X: u16 = 0x00;
    pub const ABS_Y: u16 = 0x01;
    pub const ABS_PRESSURE: u16 = 0x18;
    pub const ABS_DISTANCE: u16 = 0x19;
    pub const ABS_TOOL_WIDTH: u16 = 0x1c;
    pub const ABS_MT_SLOT: u16 = 0x2f;
    pub const ABS_MT_TOUCH_MAJOR: u16 = 0x30;
    pub const ABS_MT_POSITION_X: u16 = 0x35;
    pub const ABS_MT_POSITION_Y: u16 = 0x36;
    pub const ABS_MT_TRACKING_ID: u16 = 0x39;

    // Keyboard keys (AT set)
    pub const KEY_Q: u16 = 16;
    pub const KEY_W: u16 = 17;
    pub const KEY_E: u16 = 18;
    pub const KEY_R: u16 = 19;
    pub const KEY_T: u16 = 20;
    pub const KEY_Y: u16 = 21;
    pub const KEY_MUTE: u16 = 113;
    pub const KEY_VOLUMEDOWN: u16 = 114;
    pub const KEY_VOLUMEUP: u16 = 115;

    // Buttons
    pub const BTN_LEFT: u16 = 0x110;
    pub const BTN_RIGHT: u16 = 0x111;
    pub const BTN_MIDDLE: u16 = 0x112;
    pub const BTN_TOOL_PEN: u16 = 0x140;
    pub const BTN_TOOL_FINGER: u16 = 0x145;
    pub const BTN_TOUCH: u16 = 0x14a;

    /// First button code; everything in `BTN_MISC..KEY_OK` is a button
    /// rather than a keyboard key.
    pub const BTN_MISC: u16 = 0x100;
    pub const KEY_OK: u16 = 0x160;
}

/// Returns `true` if a `Key` code denotes a button rather than a keyboard key.
pub fn is_button_code(code: u16) -> bool {
    (codes::BTN_MISC..codes::KEY_OK).contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_roundtrip() {
        for raw in 0u16..=5 {
            let ty = EventType::try_from(raw).unwrap();
            assert_eq!(ty as u16, raw);
        }
        assert!(EventType::try_from(0x15).is_err());
    }

    #[test]
    fn test_sync_detection() {
        let sync = RawEvent::new(EventType::Synchronization, codes::SYN_REPORT, 0);
        let motion = RawEvent::new(EventType::Relative, codes::REL_X, -3);
        assert!(sync.is_sync());
        assert!(!motion.is_sync());
    }

    #[test]
    fn test_button_code_classification() {
        assert!(is_button_code(codes::BTN_LEFT));
        assert!(is_button_code(codes::BTN_TOUCH));
        assert!(!is_button_code(codes::KEY_Q));
        assert!(!is_button_code(codes::KEY_VOLUMEUP));
    }
}
